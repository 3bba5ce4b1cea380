//! Pipeline dispatcher.
//!
//! A run consists of any subset of the [`Task`]s. They always execute in pipeline order, one
//! after the other, sharing a single [`Report`]. The first failing task stops the run; its error
//! is recorded in the report under `ERROR`.

use tokio::task::block_in_place;

use super::*;
use crate::{
  copy::CopySaf, doi::RetrieveDoi, import::DspaceImport, poll::DataPoll, remote_url::WriteRemoteUrl,
  saf::ExportSaf,
};

/// A pipeline stage. The derived order is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
  /// Harvest the journal server, write SAF folders and zip them
  Export,
  /// Upload the zips to the repository host
  Copy,
  /// Run the DSpace importer for the uploaded zips
  Import,
  /// Fetch DOI files from the repository host
  RetrieveDoi,
  /// Write retrieved DOIs back to the journal server
  WriteDoi,
}

impl std::fmt::Display for Task {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Task::Export => "export",
      Task::Copy => "copy",
      Task::Import => "import",
      Task::RetrieveDoi => "retrieve-doi",
      Task::WriteDoi => "write-doi",
    };
    write!(f, "{name}")
  }
}

/// Sorts `tasks` into pipeline order and drops duplicates.
pub fn pipeline_order(tasks: &[Task]) -> Vec<Task> {
  let mut tasks = tasks.to_vec();
  tasks.sort();
  tasks.dedup();
  tasks
}

/// Harvest, export and zip.
async fn export(config: &Config, client: &JournalClient, report: &mut Report) -> Result<(), SafError> {
  let publishers = DataPoll::new(config, client).poll(report).await?;
  let export = ExportSaf::new(config, client)?;
  export.export(&publishers, report).await?;
  export.write_zips(report)?;
  Ok(())
}

/// Runs `tasks` in pipeline order and returns the report.
///
/// SSH stages block; they run under [`block_in_place`], so a multi-threaded runtime is
/// required when `Copy`, `Import` or `RetrieveDoi` are requested.
///
/// # Errors
///
/// Only a client that cannot be built is returned as error. Failures of the tasks themselves
/// end the run early and are recorded in the report.
pub async fn run_tasks(config: &Config, tasks: &[Task]) -> Result<Report, SafError> {
  let client = JournalClient::new(config)?;
  let mut report = Report::default();
  let mut copied: Option<Vec<String>> = None;
  for task in pipeline_order(tasks) {
    info!("run task {task}");
    let result = match task {
      Task::Export => export(config, &client, &mut report).await,
      Task::Copy => block_in_place(|| CopySaf::new(config).copy(&mut report)).map(|names| {
        copied = Some(names);
      }),
      Task::Import =>
        block_in_place(|| DspaceImport::new(config).import(copied.as_deref(), &mut report)).map(|_| ()),
      Task::RetrieveDoi => block_in_place(|| RetrieveDoi::new(config).retrieve(&mut report)).map(|_| ()),
      Task::WriteDoi => WriteRemoteUrl::new(config, &client).write(&mut report).await.map(|_| ()),
    };
    if let Err(e) = result {
      error!("task {task} failed: {e}");
      report.add("ERROR", format!("{task}: {e}"));
      break;
    }
    debug!("task {task} done");
  }
  Ok(report)
}
