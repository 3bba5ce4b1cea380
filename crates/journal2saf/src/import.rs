//! DSpace batch import over SSH.
//!
//! DSpace runs in a docker container on the repository host. For every transferred zip the
//! importer is invoked through `docker exec`, the handle of the new item is read back from the
//! import mapfile and the DOI registered for that handle is looked up with `doi-organiser`.
//! In dry-run mode the item is deleted again right after the lookup.

use super::*;
use crate::{
  config::{Docker, Dspace},
  remote::{Remote, RemoteHost},
};

/// Builds the shell commands run on the repository host.
#[derive(Debug, Clone, Copy)]
pub struct ImportCommands<'a> {
  /// DSpace paths and import options
  dspace: &'a Dspace,
  /// Container running DSpace
  docker: &'a Docker,
}

impl<'a> ImportCommands<'a> {
  /// Commands for the configured container.
  pub fn new(dspace: &'a Dspace, docker: &'a Docker) -> Self { Self { dspace, docker } }

  /// `docker exec` prefix running as the configured user.
  fn docker_exec(&self) -> String {
    format!("docker exec --user {} {}", self.docker.user, self.docker.container)
  }

  /// Removes a mapfile left over from an earlier import of the same zip.
  pub fn delete_mapfile(&self, mapfile: &str) -> String {
    format!("{} rm {}{mapfile}", self.docker_exec(), self.dspace.docker_mapfile)
  }

  /// Imports `zip` from the container's zip source directory.
  pub fn import(&self, zip: &str) -> String {
    let dspace = self.dspace;
    let command = format!(
      "{} {} import --add --eperson {} --source {} --zip {zip} --mapfile {}{zip}.map {}",
      self.docker_exec(),
      dspace.docker_dspace,
      dspace.eperson,
      dspace.docker_zipsource,
      dspace.docker_mapfile,
      dspace.extra
    );
    command.trim_end().to_string()
  }

  /// Prints a mapfile.
  pub fn read_mapfile(&self, mapfile: &str) -> String {
    format!("{} cat {}{mapfile}", self.docker_exec(), self.dspace.docker_mapfile)
  }

  /// Lists the DOI registered for `handle`.
  pub fn doi_lookup(&self, handle: &str) -> String {
    format!("{} {} doi-organiser --list | grep {handle}", self.docker_exec(), self.dspace.docker_dspace)
  }

  /// Deletes the items listed in a mapfile.
  pub fn delete_import(&self, mapfile: &str) -> String {
    format!(
      "{} {} import --delete --eperson {} --mapfile {}{mapfile} -disable_inheritance",
      self.docker_exec(),
      self.dspace.docker_dspace,
      self.dspace.eperson,
      self.dspace.docker_mapfile
    )
  }
}

/// Outcome of importing one zip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
  /// Zip file name
  pub zip:    String,
  /// First error line of a failed import
  pub failed: Option<String>,
  /// Handle of the imported item
  pub handle: Option<String>,
  /// DOI URL of the imported item
  pub doi:    Option<String>,
}

/// Handle of the imported item: last token of the last mapfile line.
pub fn parse_handle(lines: &[String]) -> Option<String> {
  lines
    .iter()
    .rev()
    .filter(|line| !line.starts_with("ERROR"))
    .find_map(|line| line.split_whitespace().last())
    .map(str::to_string)
}

/// DOI from `doi-organiser --list` output, e.g. `10.25673/4711 123456789/42 ...`.
pub fn parse_doi(lines: &[String]) -> Option<String> {
  lines
    .iter()
    .filter(|line| !line.starts_with("ERROR"))
    .find_map(|line| line.split_whitespace().next())
    .map(str::to_string)
}

/// Runs DSpace imports for transferred zips.
pub struct DspaceImport<'a> {
  /// Active configuration
  config: &'a Config,
}

impl<'a> DspaceImport<'a> {
  /// Creates the import stage.
  pub fn new(config: &'a Config) -> Self { Self { config } }

  /// Connects to the `[scp]` host and imports `zips`.
  ///
  /// Without an explicit list, every zip in `dspace.server_zipsource` is imported.
  pub fn import(&self, zips: Option<&[String]>, report: &mut Report) -> Result<Vec<ImportResult>, SafError> {
    if zips.is_some_and(|zips| zips.is_empty()) {
      info!("nothing transferred, no import");
      return Ok(Vec::new());
    }
    let mut remote = RemoteHost::connect(self.config.scp()?, report)?;
    let zips = match zips {
      Some(zips) => zips.to_vec(),
      None => remote
        .list_dir(&self.config.dspace()?.server_zipsource)?
        .into_iter()
        .filter(|name| name.ends_with(".zip"))
        .collect(),
    };
    self.import_zips(&mut remote, &zips, report)
  }

  /// Imports each zip through `remote` and reports the outcome.
  pub fn import_zips(
    &self,
    remote: &mut impl Remote,
    zips: &[String],
    report: &mut Report,
  ) -> Result<Vec<ImportResult>, SafError> {
    let commands = ImportCommands::new(self.config.dspace()?, self.config.docker()?);
    let mut results = Vec::new();
    for zip in zips {
      info!("****start import process for {zip}****");
      let mapfile = format!("{zip}.map");
      info!("delete old mapfile {mapfile}");
      remote.exec(&commands.delete_mapfile(&mapfile))?;

      info!("start SAF import to dspace");
      let output = remote.exec(&commands.import(zip))?;
      let failed = output.iter().find(|line| line.contains("ERROR")).cloned();
      if let Some(line) = &failed {
        warn!("import {zip} failed: {line}, try next one...");
        report.add("ERROR: import failed", format!("{zip}: {line}"));
        results.push(ImportResult { zip: zip.clone(), failed, handle: None, doi: None });
        continue;
      }

      let handle = parse_handle(&remote.exec(&commands.read_mapfile(&mapfile))?);
      info!("handle -------> {}", handle.as_deref().unwrap_or("-"));
      let doi = match &handle {
        Some(handle) => parse_doi(&remote.exec(&commands.doi_lookup(handle))?)
          .map(|doi| format!("{}{doi}", self.config.export.doi_prefix)),
        None => None,
      };
      info!("DOI: {}", doi.as_deref().unwrap_or("-"));
      report.add(
        "imported",
        format!("{zip}: handle {}, doi {}", handle.as_deref().unwrap_or("-"), doi.as_deref().unwrap_or("-")),
      );

      if self.config.general.dry_run {
        remote.exec(&commands.delete_import(&mapfile))?;
        info!("delete item with handle in {mapfile} done...");
        report.add("dry run, deleted import", zip);
      }
      results.push(ImportResult { zip: zip.clone(), failed: None, handle, doi });
    }
    Ok(results)
  }
}
