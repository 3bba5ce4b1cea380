//! Harvesting of published submissions from the journal server.
//!
//! [`DataPoll`] walks the REST API from the site-wide list of contexts down to the file records
//! of every published publication:
//!
//! ```text
//! contexts -> context detail -> submissions -> submission detail
//!          -> publication detail -> issue detail -> galleys / publicationFormats
//! ```
//!
//! Which files were exported by earlier runs is derived from the file names in the export
//! directory (see [`crate::parse_item_name`]). A submission is exported as a single item named
//! after one of its files, so once any item of a publication exists all file records of that
//! publication are marked [`FileState::Processed`] and will not be downloaded again.

use std::collections::{HashMap, HashSet};

use super::*;

/// Harvests publishers and their published submissions.
pub struct DataPoll<'a> {
  /// Active configuration
  config:    &'a Config,
  /// API client
  client:    &'a JournalClient,
  /// Already exported files: submission file id -> publication id
  processed:    HashMap<String, String>,
  /// Publications with an exported item
  publications: HashSet<String>,
}

impl<'a> DataPoll<'a> {
  /// Creates a poller; call [`determine_done`](DataPoll::determine_done) before harvesting.
  pub fn new(config: &'a Config, client: &'a JournalClient) -> Self {
    Self { config, client, processed: HashMap::new(), publications: HashSet::new() }
  }

  /// Registers every item already present in the export directory.
  ///
  /// # Errors
  ///
  /// Returns [`SafError::ExportPath`] (and reports it) if the export directory is missing.
  pub fn determine_done(&mut self, report: &mut Report) -> Result<(), SafError> {
    let export_path = &self.config.export.export_path;
    let entries = match std::fs::read_dir(export_path) {
      Ok(entries) => entries,
      Err(e) => {
        error!("export path failure {}: {e}", export_path.display());
        report.add("ERROR", format!("export path failure {}: {e}", export_path.display()));
        return Err(SafError::ExportPath(export_path.display().to_string()));
      },
    };
    for entry in entries.flatten() {
      if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
        continue;
      }
      let name = entry.file_name();
      if let Some((publication_id, submission_file_id)) = parse_item_name(&name.to_string_lossy()) {
        self.publications.insert(publication_id.clone());
        self.processed.insert(submission_file_id, publication_id);
      }
    }
    debug!("{} files already processed", self.processed.len());
    Ok(())
  }

  /// Whether the file `submission_file_id` of `publication_id` was exported before.
  pub fn is_processed(&self, submission_file_id: &str, publication_id: &str) -> bool {
    self.processed.get(submission_file_id).is_some_and(|p| p == publication_id)
  }

  /// Whether any item of `publication_id` was exported before.
  pub fn is_publication_processed(&self, publication_id: &str) -> bool {
    self.publications.contains(publication_id)
  }

  /// Requests all enabled contexts and applies the allow and deny lists.
  pub async fn request_publishers(
    &self,
    report: &mut Report,
  ) -> Result<Vec<Publisher>, SafError> {
    let mut items = self.client.get_paginated(|offset| self.client.contexts_url(offset)).await?;
    let paths: Vec<_> = items.iter().filter_map(|i| i["urlPath"].as_str()).collect();
    info!("Items: {paths:?}");

    for item in items.iter_mut() {
      if let Some(href) = item["_href"].as_str().map(str::to_string) {
        let extra = self.client.get_json(&href).await?;
        model::merge_json(item, extra);
      }
    }

    let export = &self.config.export;
    let url_path = |item: &Value| item["urlPath"].as_str().unwrap_or_default().to_string();
    if !export.allow.is_empty() {
      items.retain(|item| export.allow.contains(&url_path(item)));
      info!("filter allow-list {:?}", export.allow);
    }
    if !export.deny.is_empty() {
      items.retain(|item| !export.deny.contains(&url_path(item)));
      info!("filter deny-list {:?}", export.deny);
    }
    let kept: Vec<_> = items.iter().map(url_path).collect();
    info!("after filter {kept:?}");
    for path in &kept {
      report.add("processed journals", path);
    }

    let publishers = items.into_iter().map(Publisher::from_json).collect::<Result<Vec<_>, _>>()?;
    info!("got all published items ({}), done...", publishers.len());
    Ok(publishers)
  }

  /// Refreshes each publisher's data from its own API link.
  pub async fn request_contexts(&self, publishers: &mut [Publisher]) -> Result<(), SafError> {
    for publisher in publishers.iter_mut().filter(|p| !p.href.is_empty()) {
      let detail = self.client.get_json(&publisher.href).await?;
      publisher.merge(detail);
      let locale = publisher.data["primaryLocale"].as_str().unwrap_or("en_US").to_string();
      info!(
        "request {} ({}) / Contact Email {}",
        publisher.href,
        publisher.name(&locale),
        publisher.data["contactEmail"].as_str().unwrap_or("-")
      );
    }
    Ok(())
  }

  /// Looks up the submission file id of an OMP publication format.
  async fn submission_file_id(
    &self,
    submission_href: &str,
    format_id: i64,
  ) -> Result<Option<String>, SafError> {
    let files = self.client.get_json(&format!("{submission_href}/files")).await?;
    Ok(
      files["items"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|file| file["assocId"].as_i64() == Some(format_id))
        .and_then(|file| model::json_text(&file["id"])),
    )
  }

  /// Harvests the published submissions of every publisher.
  pub async fn request_submissions(
    &self,
    publishers: &mut [Publisher],
    report: &mut Report,
  ) -> Result<(), SafError> {
    let system = self.config.general.system;
    for publisher in publishers.iter_mut() {
      let url_path = publisher.url_path.clone();
      debug!("request submissions for {url_path}");
      let journal_url = publisher.url.clone();
      let items = self
        .client
        .get_paginated(|offset| self.client.submissions_url(&journal_url, offset))
        .await?;
      info!("request all submissions for {url_path}: got {} submissions", items.len());

      let (mut published, mut not_published) = (0, 0);
      for item in items {
        if item["status"].as_i64() != Some(PKP_STATUS_PUBLISHED) {
          not_published += 1;
          continue;
        }
        published += 1;
        let href = item["_href"].as_str().unwrap_or_default().to_string();
        debug!("process submission {href}");
        let mut submission = Submission::new(item.clone());
        if !href.is_empty() {
          model::merge_json(&mut submission.data, self.client.get_json(&href).await?);
        }
        let submission_id = submission.id();
        let current_publication = model::json_text(&item["currentPublicationId"]).unwrap_or_default();

        // older versions of a publication are not exported when the current one is known
        let publications = item["publications"].as_array().cloned().unwrap_or_default();
        let (current, older): (Vec<_>, Vec<_>) = publications
          .into_iter()
          .partition(|p| model::json_text(&p["id"]).as_deref() == Some(current_publication.as_str()));
        let publications = if current.is_empty() { older } else { current };

        for publication in &publications {
          let publ_href = publication["_href"].as_str().unwrap_or_default();
          let mut detail = publication.clone();
          if !publ_href.is_empty() {
            model::merge_json(&mut detail, self.client.get_json(publ_href).await?);
          }
          if let Some(issue_id) = model::json_text(&detail["issueId"]).filter(|id| id != "0") {
            let issue_url = self.client.issue_url(&journal_url, &issue_id);
            submission.issue = Some(self.client.get_json(&issue_url).await?);
          }

          let records = detail[system.file_records_key()].as_array().cloned().unwrap_or_default();
          let mut reported = false;
          for record in records {
            let mut record = FileRecord::from_json(record);
            if let Some(remote_url) = record.url_remote() {
              debug!("remote_url already set for {publ_href} ({remote_url}), continue");
              report.add(
                format!("{url_path}: remote_url already set for (publication_id, submission_id)"),
                format!("({current_publication}, {submission_id})"),
              );
              record.state = FileState::Skip;
              submission.files.push(record);
              continue;
            }
            if !self.is_publication_processed(&record.publication_id) && system == System::Omp {
              record.submission_file_id = self.submission_file_id(&href, record.id).await?;
              if record.submission_file_id.is_none() {
                warn!("no submission file for publicationFormat {} of {publ_href}", record.id);
                report.add(
                  "WARNING: no submission file for (publication_id, publicationFormat)",
                  format!("({}, {})", record.publication_id, record.id),
                );
                record.state = FileState::Skip;
                submission.files.push(record);
                continue;
              }
            }
            let file_id = record.submission_file_id.clone().unwrap_or_default();
            if self.is_publication_processed(&record.publication_id)
              || self.is_processed(&file_id, &record.publication_id)
            {
              info!("file exists in export {publ_href}, skip");
              if !reported {
                report.add("already processed submissions", submission_id);
                reported = true;
              }
              record.state = FileState::Processed;
            }
            submission.files.push(record);
          }
          submission.publication = detail;
        }
        publisher.submissions.push(submission);
      }
      info!("request {published} publications, {not_published} unpublished skipped");
    }
    Ok(())
  }

  /// Runs the complete harvest: done-detection, publishers, contexts and submissions.
  pub async fn poll(&mut self, report: &mut Report) -> Result<Vec<Publisher>, SafError> {
    self.determine_done(report)?;
    let mut publishers = self.request_publishers(report).await?;
    info!("process {} publishers", publishers.len());
    self.request_contexts(&mut publishers).await?;
    self.request_submissions(&mut publishers, report).await?;
    Ok(publishers)
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
  };

  use super::*;
  use crate::tests::{mount_journal, mount_press, test_config};

  #[test]
  fn test_determine_done_reads_export_names() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("hsg_publication_id_102_submission_file_id_398.zip.done"), "")?;
    std::fs::write(dir.path().join("hsg_publication_id_55_submission_file_id_77.doi"), "")?;
    std::fs::write(dir.path().join("README"), "")?;
    std::fs::create_dir(dir.path().join("hsg"))?;

    let config = test_config("https://ojs.example.com").with_export_path(dir.path());
    let client = JournalClient::new(&config)?;
    let mut poll = DataPoll::new(&config, &client);
    let mut report = Report::default();
    poll.determine_done(&mut report)?;

    assert!(poll.is_processed("398", "102"));
    assert!(poll.is_processed("77", "55"));
    assert!(!poll.is_processed("398", "103"));
    assert!(report.is_empty());
    Ok(())
  }

  #[test]
  fn test_determine_done_missing_export() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = test_config("https://ojs.example.com").with_export_path(&dir.path().join("nope"));
    let client = JournalClient::new(&config)?;
    let mut poll = DataPoll::new(&config, &client);
    let mut report = Report::default();
    assert!(matches!(poll.determine_done(&mut report), Err(SafError::ExportPath(_))));
    assert!(report.has_errors());
    Ok(())
  }

  #[traced_test]
  #[tokio::test]
  async fn test_publishers_allow_and_deny() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let uri = server.uri();
    Mock::given(method("GET"))
      .and(path("/_/api/v1/contexts"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "itemsMax": 3,
        "items": [
          {"id": 1, "urlPath": "cicadina", "url": format!("{uri}/cicadina")},
          {"id": 2, "urlPath": "hdwiso", "url": format!("{uri}/hdwiso")},
          {"id": 3, "urlPath": "hsg", "url": format!("{uri}/hsg")}
        ]
      })))
      .mount(&server)
      .await;

    let config = test_config(&uri)
      .with_allow(vec!["hdwiso".into(), "hsg".into()])
      .with_deny(vec!["hsg".into()]);
    let client = JournalClient::new(&config)?;
    let poll = DataPoll::new(&config, &client);
    let mut report = Report::default();
    let publishers = poll.request_publishers(&mut report).await?;

    assert_eq!(publishers.len(), 1);
    assert_eq!(publishers[0].url_path, "hdwiso");
    assert_eq!(report.get("processed journals"), ["hdwiso"]);
    Ok(())
  }

  #[traced_test]
  #[tokio::test]
  async fn test_poll_marks_file_states() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_journal(&server).await;

    let dir = tempfile::tempdir()?;
    // an earlier run exported the publication, named after its second galley
    std::fs::write(dir.path().join("hsg_publication_id_102_submission_file_id_399.zip.done"), "")?;
    let config = test_config(&server.uri()).with_export_path(dir.path());
    let client = JournalClient::new(&config)?;
    let mut poll = DataPoll::new(&config, &client);
    let mut report = Report::default();
    let publishers = poll.poll(&mut report).await?;

    assert_eq!(publishers.len(), 1);
    let submissions = &publishers[0].submissions;
    // the unpublished submission is not harvested
    assert_eq!(submissions.len(), 1);
    let submission = &submissions[0];
    assert_eq!(submission.locale(), "de_DE");
    assert_eq!(submission.issue.as_ref().map(|i| i["volume"].clone()), Some(json!(21)));
    let states: Vec<_> = submission.files.iter().map(|f| f.state).collect();
    // the sibling galley belongs to the same item and is done as well
    assert_eq!(states, vec![FileState::Processed, FileState::Processed, FileState::Skip]);
    assert_eq!(report.get("already processed submissions"), ["103"]);
    assert!(logs_contain("1 unpublished skipped"));
    assert!(logs_contain("(Hallesche Beiträge zur Zeitgeschichte) / Contact Email redaktion@example.com"));
    Ok(())
  }

  #[traced_test]
  #[tokio::test]
  async fn test_poll_other_publication_stays_pending() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_journal(&server).await;

    let dir = tempfile::tempdir()?;
    // same submission file id, but an older publication
    std::fs::write(dir.path().join("hsg_publication_id_101_submission_file_id_398.zip.done"), "")?;
    let config = test_config(&server.uri()).with_export_path(dir.path());
    let client = JournalClient::new(&config)?;
    let mut report = Report::default();
    let publishers = DataPoll::new(&config, &client).poll(&mut report).await?;

    let states: Vec<_> = publishers[0].submissions[0].files.iter().map(|f| f.state).collect();
    assert_eq!(states, vec![FileState::Pending, FileState::Pending, FileState::Skip]);
    assert!(report.get("already processed submissions").is_empty());
    Ok(())
  }

  #[traced_test]
  #[tokio::test]
  async fn test_poll_omp_formats() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_press(&server).await;

    let dir = tempfile::tempdir()?;
    let mut config = test_config(&server.uri()).with_export_path(dir.path());
    config.general.system = System::Omp;
    let client = JournalClient::new(&config)?;
    let mut report = Report::default();
    let publishers = DataPoll::new(&config, &client).poll(&mut report).await?;

    assert_eq!(publishers[0].url_path, "press");
    let submission = &publishers[0].submissions[0];
    assert!(submission.issue.is_none());
    assert_eq!(submission.series_position(), "4");
    let files: Vec<_> =
      submission.files.iter().map(|f| (f.id, f.submission_file_id.as_deref(), f.state)).collect();
    assert_eq!(files, vec![(11, Some("501"), FileState::Pending), (12, None, FileState::Skip)]);
    assert_eq!(report.get("WARNING: no submission file for (publication_id, publicationFormat)"), ["(6, 12)"]);
    assert!(logs_contain("(Mining History Press) / Contact Email -"));
    Ok(())
  }
}
