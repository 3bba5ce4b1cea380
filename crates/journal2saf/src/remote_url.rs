//! Write back of DOIs to the journal system.
//!
//! Requires the remote-url plugin on the OJS/OMP server. Every `<export>/*.doi` file holds a
//! DOI like `doi:10.25673/4711`; the resolvable URL `<doi_prefix>10.25673/4711` is stored as the
//! `urlRemote` of the publication named in the file name, and the file is renamed to
//! `*.doi.done`.

use reqwest::StatusCode;

use super::*;

/// Resolvable DOI URL from the content of a DOI file.
///
/// # Examples
///
/// ```
/// use journal2saf::remote_url::doi_url;
///
/// assert_eq!(doi_url("https://doi.org/", "doi:10.25673/4711\n"), "https://doi.org/10.25673/4711");
/// ```
pub fn doi_url(doi_prefix: &str, content: &str) -> String {
  let doi = content.rsplit(':').next().unwrap_or_default();
  format!("{doi_prefix}{doi}").trim().to_string()
}

/// Stores retrieved DOIs as remote URLs of their publications.
pub struct WriteRemoteUrl<'a> {
  /// Active configuration
  config: &'a Config,
  /// Client talking to the remote-url plugin
  client: &'a JournalClient,
}

impl<'a> WriteRemoteUrl<'a> {
  /// Creates the write-back stage.
  pub fn new(config: &'a Config, client: &'a JournalClient) -> Self { Self { config, client } }

  /// Sends every pending DOI file and returns how many were stored.
  pub async fn write(&self, report: &mut Report) -> Result<usize, SafError> {
    info!("process dois");
    let pattern = self.config.export.export_path.join("*.doi");
    let mut doi_files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?.filter_map(Result::ok).collect();
    doi_files.sort();
    if doi_files.is_empty() {
      info!("no dois found...");
    }

    let mut count_doi_set = 0;
    for doi_file in doi_files {
      let name = doi_file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
      let Some((publication_id, _)) = parse_item_name(&name) else {
        warn!("cannot read publication id from {name}, skip");
        report.add("WARNING: unknown DOI file", &name);
        continue;
      };
      let remote_url = doi_url(&self.config.export.doi_prefix, &std::fs::read_to_string(&doi_file)?);
      info!("got DOI {remote_url} for publication_id {publication_id}");

      let status = self.client.set_remote_url(&publication_id, &remote_url).await?;
      if status == StatusCode::OK {
        info!("successfully committed remote_url {remote_url} with publication_id {publication_id}");
        let done = doi_file.with_file_name(format!("{name}.done"));
        std::fs::rename(&doi_file, &done)?;
        debug!("rename DOI file to {}", done.display());
        report.add("rename DOI file to", done.display());
        count_doi_set += 1;
      } else {
        let reason = status.canonical_reason().unwrap_or("unknown");
        error!("rename DOI file to failed {reason}");
        report.add("ERROR: rename DOI file to failed", format!("{name}: {} {reason}", status.as_u16()));
      }
    }
    if count_doi_set > 0 {
      info!("{count_doi_set} DOIs successfully set");
    }
    Ok(count_doi_set)
  }
}

#[cfg(test)]
mod tests {
  use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
  };

  use super::*;
  use crate::tests::test_config;

  #[test]
  fn test_doi_url() {
    assert_eq!(doi_url("https://doi.org/", "doi:10.25673/38476"), "https://doi.org/10.25673/38476");
    assert_eq!(doi_url("https://doi.org/", "10.25673/38476 \n"), "https://doi.org/10.25673/38476");
  }

  #[traced_test]
  #[tokio::test]
  async fn test_write_posts_and_renames() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/"))
      .and(body_string_contains("publication_id=102"))
      .and(body_string_contains("token=remote-secret"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/"))
      .and(body_string_contains("publication_id=55"))
      .respond_with(ResponseTemplate::new(403))
      .mount(&server)
      .await;

    let dir = tempfile::tempdir()?;
    let ok = "hsg_publication_id_102_submission_file_id_398.doi";
    let denied = "hsg_publication_id_55_submission_file_id_77.doi";
    std::fs::write(dir.path().join(ok), "doi:10.25673/4711")?;
    std::fs::write(dir.path().join(denied), "doi:10.25673/4712")?;
    std::fs::write(dir.path().join("hsg_publication_id_1_submission_file_id_2.doi.done"), "doi:10.25673/1")?;

    let config = test_config(&server.uri()).with_export_path(dir.path());
    let client = JournalClient::new(&config)?;
    let mut report = Report::default();
    let count = WriteRemoteUrl::new(&config, &client).write(&mut report).await?;

    assert_eq!(count, 1);
    assert!(dir.path().join(format!("{ok}.done")).exists());
    assert!(dir.path().join(denied).exists());
    assert_eq!(report.get("ERROR: rename DOI file to failed"), [format!("{denied}: 403 Forbidden")]);
    assert!(logs_contain("1 DOIs successfully set"));
    Ok(())
  }

  #[tokio::test]
  async fn test_get_method_uses_query() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/"))
      .and(wiremock::matchers::query_param("remote_url", "https://doi.org/10.25673/4711"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("hsg_publication_id_102_submission_file_id_398.doi"), "doi:10.25673/4711")?;
    let mut config = test_config(&server.uri()).with_export_path(dir.path());
    config.general.remote_url_method = crate::config::RemoteUrlMethod::Get;
    let client = JournalClient::new(&config)?;
    let count = WriteRemoteUrl::new(&config, &client).write(&mut Report::default()).await?;
    assert_eq!(count, 1);
    Ok(())
  }
}
