//! Transfer of SAF zips to the repository host.
//!
//! Every `<export>/*.zip` is uploaded to `dspace.server_zipsource` and renamed locally to
//! `*.zip.done`, which marks the item as transferred for later runs.

use super::*;
use crate::remote::{Remote, RemoteHost};

/// Uploads finished SAF zips.
pub struct CopySaf<'a> {
  /// Active configuration
  config: &'a Config,
}

impl<'a> CopySaf<'a> {
  /// Creates the copy stage.
  pub fn new(config: &'a Config) -> Self { Self { config } }

  /// Zips waiting for transfer, sorted by name.
  pub fn saf_files(&self) -> Result<Vec<PathBuf>, SafError> {
    let export_path = &self.config.export.export_path;
    if !export_path.exists() {
      return Ok(Vec::new());
    }
    let pattern = export_path.join("*.zip");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?.filter_map(Result::ok).collect();
    files.sort();
    Ok(files)
  }

  /// Connects to the `[scp]` host and uploads every waiting zip.
  ///
  /// Returns the names of the uploaded zips.
  pub fn copy(&self, report: &mut Report) -> Result<Vec<String>, SafError> {
    let files = self.saf_files()?;
    if files.is_empty() {
      info!("no SAF files found to copy");
      return Ok(Vec::new());
    }
    let mut remote = RemoteHost::connect(self.config.scp()?, report)?;
    self.copy_files(&mut remote, &files, report)
  }

  /// Uploads `files` through `remote` and marks each as done.
  pub fn copy_files(
    &self,
    remote: &mut impl Remote,
    files: &[PathBuf],
    report: &mut Report,
  ) -> Result<Vec<String>, SafError> {
    let target_dir = self.config.dspace()?.server_zipsource.trim_end_matches('/');
    let mut copied = Vec::new();
    for file in files {
      let name = file.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
      info!("transfer file {}", file.display());
      info!("target: '{target_dir}/{name}'");
      report.add("transfer files", &name);
      remote.put(file, &format!("{target_dir}/{name}"))?;

      let done = file.with_file_name(format!("{name}.done"));
      std::fs::rename(file, &done)?;
      info!("rename file {name} to {name}.done");
      copied.push(name);
    }
    Ok(copied)
  }
}
