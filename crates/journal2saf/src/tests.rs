//! Shared fixtures: a test configuration and a mocked OJS journal.

use std::collections::BTreeSet;

use serde_json::json;
use wiremock::{
  matchers::{method, path},
  Mock, MockServer, ResponseTemplate,
};

use super::*;
use crate::remote::Remote;

/// Configuration pointing at `server` with a representative metadata mapping.
pub(crate) fn test_config(server: &str) -> Config {
  let toml = format!(
    r#"
    [general]
    journal_server = "{server}"
    api_token = "acb"
    token = "remote-secret"

    [export]
    export_path = "/tmp/journal2saf-test-export"
    collection = "123456789/26132"
    doi_prefix = "https://doi.org/"

    [scp]
    server = "dspace.example.com"
    user = "dspace"
    key_filename = "~/.ssh/id_rsa"

    [dspace]
    server_zipsource = "/dspace/upload/"
    server_doifiles = "/dspace/doi"
    docker_dspace = "/dspace/bin/dspace"
    eperson = "admin@example.com"
    docker_mapfile = "/dspace/mapfiles/"
    docker_zipsource = "/dspace/upload"

    [docker]
    user = "dspace"
    container = "dspace"

    [[meta]]
    field = "dc.title"
    value = "publication.fullTitle | publication.title"

    [[meta]]
    field = "dc.contributor.author"
    value = "publication.authors"

    [[meta]]
    field = "dc.description.abstract"
    value = "publication.abstract"

    [[meta]]
    field = "dc.subject"
    value = "publication.keywords"

    [[meta]]
    field = "dc.date.issued"
    value = "issue.year | publication.datePublished"

    [[meta]]
    field = "dc.language.iso"
    value = "language"

    [[meta]]
    field = "dc.type"
    value = "type"

    [[meta]]
    field = "dc.identifier.uri"
    value = "submission.urlPublished"

    [[meta]]
    field = "dc.publisher"
    value = "context.publisherInstitution"

    [[meta]]
    field = "local.bibliographicCitation.journaltitle"
    value = "context.name"

    [[meta]]
    field = "local.bibliographicCitation.volume"
    value = "\"Vol. \" + issue.volume"

    [[meta]]
    field = "local.bibliographicCitation.pagestart"
    value = "pagestart"

    [[meta]]
    field = "local.bibliographicCitation.pageend"
    value = "pageend"
    "#
  );
  Config::from_toml_str(&toml).expect("valid test configuration")
}

/// Mounts a journal `hsg` with one published and one unpublished submission.
///
/// The published submission 103 has publication 102 in issue 188 (volume 21) and three galleys:
///
/// | galley | submission file | state                       |
/// |--------|-----------------|-----------------------------|
/// | 7      | 398             | downloadable PDF            |
/// | 8      | 399             | downloadable PDF            |
/// | 9      | 400             | `urlRemote` already set     |
pub(crate) async fn mount_journal(server: &MockServer) {
  let uri = server.uri();
  let journal = format!("{uri}/hsg");
  let context = json!({
    "id": 3,
    "urlPath": "hsg",
    "url": journal,
    "_href": format!("{journal}/api/v1/contexts/3"),
    "name": {"de_DE": "Hallesche Beiträge zur Zeitgeschichte", "en_US": ""},
  });
  let galley = |id: i64, file_id: i64, url_remote: &str| {
    json!({
      "id": id,
      "publicationId": 102,
      "submissionFileId": file_id,
      "urlRemote": url_remote,
      "label": "PDF",
      "file": {"id": file_id, "submissionId": 103, "mimetype": "application/pdf"},
    })
  };

  let responses = [
    ("/_/api/v1/contexts", json!({"itemsMax": 1, "items": [context.clone()]})),
    (
      "/hsg/api/v1/contexts/3",
      json!({
        "id": 3,
        "urlPath": "hsg",
        "url": journal,
        "contactEmail": "redaktion@example.com",
        "publisherInstitution": "Universitäts- und Landesbibliothek Sachsen-Anhalt",
        "name": {"de_DE": "Hallesche Beiträge zur Zeitgeschichte", "en_US": ""},
      }),
    ),
    (
      "/hsg/api/v1/submissions",
      json!({
        "itemsMax": 2,
        "items": [
          {
            "id": 103,
            "status": 3,
            "_href": format!("{journal}/api/v1/submissions/103"),
            "currentPublicationId": 102,
            "urlPublished": format!("{journal}/article/view/103"),
            "publications": [
              {"id": 101, "_href": format!("{journal}/api/v1/submissions/103/publications/101")},
              {"id": 102, "_href": format!("{journal}/api/v1/submissions/103/publications/102")}
            ]
          },
          {"id": 104, "status": 1, "publications": []}
        ]
      }),
    ),
    ("/hsg/api/v1/submissions/103", json!({"id": 103, "status": 3, "locale": "de_DE"})),
    (
      "/hsg/api/v1/submissions/103/publications/102",
      json!({
        "id": 102,
        "submissionId": 103,
        "issueId": 188,
        "pages": "12-34",
        "datePublished": "2021-05-03",
        "fullTitle": {"de_DE": "Bergbau & Umwelt im Mansfelder Land", "en_US": ""},
        "abstract": {
          "de_DE": "<p>Eine ausführliche Darstellung der Folgen des Kupferschieferbergbaus.</p>",
          "en_US": "<p>Too short.</p>"
        },
        "authors": [
          {"givenName": {"de_DE": "Anna"}, "familyName": {"de_DE": "Schmidt"}},
          {"givenName": {"de_DE": "admin"}, "familyName": {"de_DE": "Weber"}}
        ],
        "keywords": {"de_DE": ["Bergbau", "Halden"], "en_US": []},
        "galleys": [
          galley(7, 398, ""),
          galley(8, 399, ""),
          galley(9, 400, "https://dspace.example.com/handle/123456789/1")
        ]
      }),
    ),
    ("/hsg/api/v1/issues/188", json!({"id": 188, "volume": 21, "year": 2021})),
  ];
  for (route, body) in responses {
    Mock::given(method("GET"))
      .and(path(route))
      .respond_with(ResponseTemplate::new(200).set_body_json(body))
      .mount(server)
      .await;
  }

  for (galley_id, file_id) in [(7, 398), (8, 399)] {
    Mock::given(method("GET"))
      .and(path(format!("/hsg/article/download/103/{galley_id}/{file_id}")))
      .respond_with(
        ResponseTemplate::new(200)
          .insert_header("Content-Type", "application/pdf")
          .insert_header("Content-Disposition", format!("attachment; filename=\"Schmidt Bergbau {file_id}.pdf\""))
          .set_body_bytes(format!("%PDF-1.4 file {file_id}").into_bytes()),
      )
      .mount(server)
      .await;
  }
}

/// Mounts an OMP press `press` with one published monograph.
///
/// Submission 60 has publication 6 at series position 4 and two publication formats:
///
/// | format | submission file | state                                             |
/// |--------|-----------------|---------------------------------------------------|
/// | 11     | 501             | downloadable PDF, served without a file name      |
/// | 12     | none            | no file registered for the format                 |
pub(crate) async fn mount_press(server: &MockServer) {
  let press = format!("{}/press", server.uri());
  let context = json!({
    "id": 5,
    "urlPath": "press",
    "url": press,
    "_href": format!("{press}/api/v1/contexts/5"),
    "primaryLocale": "en_US",
    "name": {"en_US": "Mining History Press"},
  });
  let publication_format = |id: i64, name: &str| {
    json!({"id": id, "publicationId": 6, "urlRemote": "", "name": {"en_US": name}})
  };

  let responses = [
    ("/_/api/v1/contexts", json!({"itemsMax": 1, "items": [context.clone()]})),
    ("/press/api/v1/contexts/5", context),
    (
      "/press/api/v1/submissions",
      json!({
        "itemsMax": 1,
        "items": [{
          "id": 60,
          "status": 3,
          "_href": format!("{press}/api/v1/submissions/60"),
          "currentPublicationId": 6,
          "urlPublished": format!("{press}/catalog/book/60"),
          "publications": [{"id": 6, "_href": format!("{press}/api/v1/submissions/60/publications/6")}]
        }]
      }),
    ),
    ("/press/api/v1/submissions/60", json!({"id": 60, "status": 3, "locale": "en_US"})),
    (
      "/press/api/v1/submissions/60/publications/6",
      json!({
        "id": 6,
        "submissionId": 60,
        "seriesPosition": "4",
        "fullTitle": {"en_US": "Copper Mining in the Harz"},
        "authors": [{"givenName": {"en_US": "Jonas"}, "familyName": {"en_US": "Weber"}}],
        "publicationFormats": [publication_format(11, "PDF"), publication_format(12, "Print")]
      }),
    ),
    (
      "/press/api/v1/submissions/60/files",
      json!({"itemsMax": 2, "items": [
        {"id": 501, "assocId": 11, "mimetype": "application/pdf"},
        {"id": 502, "assocId": 99, "mimetype": "application/pdf"}
      ]}),
    ),
  ];
  for (route, body) in responses {
    Mock::given(method("GET"))
      .and(path(route))
      .respond_with(ResponseTemplate::new(200).set_body_json(body))
      .mount(server)
      .await;
  }

  Mock::given(method("GET"))
    .and(path("/press/catalog/download/60/11/501"))
    .respond_with(
      ResponseTemplate::new(200)
        .insert_header("Content-Type", "application/pdf")
        .set_body_bytes(b"%PDF-1.7 monograph".to_vec()),
    )
    .mount(server)
    .await;
}

/// In-memory stand-in for the repository host.
#[derive(Debug, Default)]
pub(crate) struct FakeRemote {
  /// Remote files by full path
  pub files:     BTreeMap<String, Vec<u8>>,
  /// Directories that exist remotely
  pub dirs:      BTreeSet<String>,
  /// Canned command output: first entry whose pattern occurs in the command wins
  pub responses: Vec<(String, Vec<String>)>,
  /// Commands run so far
  pub commands:  Vec<String>,
}

impl FakeRemote {
  /// Registers `lines` as the output of commands containing `pattern`.
  pub fn respond(&mut self, pattern: &str, lines: &[&str]) {
    self.responses.push((pattern.to_string(), lines.iter().map(|l| l.to_string()).collect()));
  }
}

impl Remote for FakeRemote {
  fn put(&mut self, local: &Path, target: &str) -> Result<u64, SafError> {
    let bytes = std::fs::read(local)?;
    let size = bytes.len() as u64;
    self.files.insert(target.replace("//", "/"), bytes);
    Ok(size)
  }

  fn get(&mut self, source: &str, local: &Path) -> Result<u64, SafError> {
    let bytes = self.files.get(source).ok_or_else(|| SafError::Remote(format!("no such file {source}")))?;
    std::fs::write(local, bytes)?;
    Ok(bytes.len() as u64)
  }

  fn list_dir(&mut self, dir: &str) -> Result<Vec<String>, SafError> {
    if !self.dirs.contains(dir) {
      return Err(SafError::Remote(format!("no such directory {dir}")));
    }
    let prefix = format!("{}/", dir.trim_end_matches('/'));
    Ok(self.files.keys().filter_map(|path| path.strip_prefix(&prefix)).map(str::to_string).collect())
  }

  fn remove(&mut self, path: &str) -> Result<(), SafError> {
    self.files.remove(path).map(|_| ()).ok_or_else(|| SafError::Remote(format!("no such file {path}")))
  }

  fn exec(&mut self, command: &str) -> Result<Vec<String>, SafError> {
    self.commands.push(command.to_string());
    Ok(
      self
        .responses
        .iter()
        .find(|(pattern, _)| command.contains(pattern.as_str()))
        .map(|(_, lines)| lines.clone())
        .unwrap_or_default(),
    )
  }
}

#[test]
fn test_parse_item_name() {
  assert_eq!(
    parse_item_name("hsg_publication_id_102_submission_file_id_398.zip"),
    Some(("102".to_string(), "398".to_string()))
  );
  // underscores in the journal path do not confuse the parser
  assert_eq!(
    parse_item_name("hall_beitr_publication_id_5_submission_file_id_6.doi"),
    Some(("5".to_string(), "6".to_string()))
  );
  assert_eq!(parse_item_name("hsg_publication_id_x_submission_file_id_6.zip"), None);
}

#[test]
fn test_human_size() {
  assert_eq!(human_size(512), "512 bytes");
  assert_eq!(human_size(3 * 1024 * 1024 + 7), "3 Mb");
}

#[test]
fn test_config_fixture_parses_all_expressions() -> anyhow::Result<()> {
  let config = test_config("https://ojs.example.com");
  for meta in &config.meta {
    expr::Expr::parse(&meta.value)?;
  }
  Ok(())
}
