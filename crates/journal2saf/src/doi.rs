//! Retrieval of DOI marker files from the repository host.
//!
//! After DSpace has registered a DOI for an imported item it drops a file named like the zip
//! (`<urlPath>_publication_id_<P>_submission_file_id_<F>.doi`) into `dspace.server_doifiles`.
//! Those files are moved into the local export directory, where
//! [`remote_url`](crate::remote_url) picks them up.

use super::*;
use crate::remote::{Remote, RemoteHost};

/// Fetches DOI files from the repository host.
pub struct RetrieveDoi<'a> {
  /// Active configuration
  config: &'a Config,
}

impl<'a> RetrieveDoi<'a> {
  /// Creates the retrieval stage.
  pub fn new(config: &'a Config) -> Self { Self { config } }

  /// Names of DOI files already present locally, written back (`.doi.done`) or not (`.doi`).
  pub fn determine_done(&self) -> Result<Vec<String>, SafError> {
    let mut done = Vec::new();
    for entry in std::fs::read_dir(&self.config.export.export_path)?.flatten() {
      let name = entry.file_name().to_string_lossy().into_owned();
      if name.ends_with(".doi") {
        done.push(name);
      } else if let Some(doi) = name.strip_suffix(".done").filter(|n| n.ends_with(".doi")) {
        done.push(doi.to_string());
      }
    }
    done.sort();
    Ok(done)
  }

  /// Connects to the `[scp]` host and retrieves new DOI files.
  pub fn retrieve(&self, report: &mut Report) -> Result<usize, SafError> {
    let done = self.determine_done()?;
    let mut remote = RemoteHost::connect(self.config.scp()?, report)?;
    self.retrieve_files(&mut remote, &done, report)
  }

  /// Downloads every remote DOI file not in `done` and deletes it remotely.
  ///
  /// Returns the number of files copied.
  ///
  /// # Errors
  ///
  /// A missing remote directory is reported under `remote not found` and returned as
  /// [`SafError::Remote`].
  pub fn retrieve_files(
    &self,
    remote: &mut impl Remote,
    done: &[String],
    report: &mut Report,
  ) -> Result<usize, SafError> {
    let doi_path = self.config.dspace()?.server_doifiles.trim_end_matches('/');
    let doi_files = match remote.list_dir(doi_path) {
      Ok(files) => files,
      Err(e) => {
        error!("{doi_path} not found remote, {e}");
        report.add("ERROR: remote not found", doi_path);
        return Err(SafError::Remote(format!("{doi_path} not found remote")));
      },
    };
    if doi_files.is_empty() {
      info!("no new DOI files");
    }

    let (mut count, mut count_done) = (0, 0);
    for doi_file in doi_files {
      if done.contains(&doi_file) {
        count_done += 1;
        continue;
      }
      let source = format!("{doi_path}/{doi_file}");
      remote.get(&source, &self.config.export.export_path.join(&doi_file))?;
      info!("got file --> {doi_file}");
      remote.remove(&source)?;
      info!("delete remote --> {doi_file}");
      report.add("retrieved DOI files", &doi_file);
      count += 1;
    }
    if count_done > 0 {
      info!("{count_done} DOI files already processed");
    }
    info!("{count} DOI files copied");
    Ok(count)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tests::{test_config, FakeRemote};

  #[test]
  fn test_determine_done() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("hsg_publication_id_1_submission_file_id_2.doi"), "doi:10.1/a")?;
    std::fs::write(dir.path().join("hsg_publication_id_3_submission_file_id_4.doi.done"), "")?;
    std::fs::write(dir.path().join("hsg_publication_id_3_submission_file_id_4.zip.done"), "")?;
    let config = test_config("https://ojs.example.com").with_export_path(dir.path());

    let done = RetrieveDoi::new(&config).determine_done()?;
    assert_eq!(done, vec![
      "hsg_publication_id_1_submission_file_id_2.doi",
      "hsg_publication_id_3_submission_file_id_4.doi"
    ]);
    Ok(())
  }

  #[test]
  fn test_retrieve_files_skips_done() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = test_config("https://ojs.example.com").with_export_path(dir.path());
    let mut remote = FakeRemote::default();
    remote.dirs.insert("/dspace/doi".into());
    remote.files.insert("/dspace/doi/hsg_publication_id_1_submission_file_id_2.doi".into(), b"doi:10.1/a".to_vec());
    remote.files.insert("/dspace/doi/hsg_publication_id_5_submission_file_id_6.doi".into(), b"doi:10.1/b".to_vec());

    let done = vec!["hsg_publication_id_1_submission_file_id_2.doi".to_string()];
    let mut report = Report::default();
    let count = RetrieveDoi::new(&config).retrieve_files(&mut remote, &done, &mut report)?;

    assert_eq!(count, 1);
    let local = dir.path().join("hsg_publication_id_5_submission_file_id_6.doi");
    assert_eq!(std::fs::read_to_string(local)?, "doi:10.1/b");
    assert!(!remote.files.contains_key("/dspace/doi/hsg_publication_id_5_submission_file_id_6.doi"));
    assert!(remote.files.contains_key("/dspace/doi/hsg_publication_id_1_submission_file_id_2.doi"));
    Ok(())
  }

  #[test]
  fn test_missing_remote_directory_is_fatal() -> anyhow::Result<()> {
    let config = test_config("https://ojs.example.com");
    let mut report = Report::default();
    let result = RetrieveDoi::new(&config).retrieve_files(&mut FakeRemote::default(), &[], &mut report);
    assert!(matches!(result, Err(SafError::Remote(_))));
    assert_eq!(report.get("ERROR: remote not found"), ["/dspace/doi"]);
    Ok(())
  }
}
