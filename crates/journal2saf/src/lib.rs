//! A library for harvesting published works from OJS/OMP journal servers and packaging
//! them as DSpace Simple Archive Format (SAF) items.
//!
//! The pipeline is strictly sequential:
//!
//! 1. [`poll`] walks contexts, submissions, publications and issues over the journal REST API
//! 2. [`saf`] maps the harvested metadata onto Dublin-Core XML, downloads the payload files and
//!    zips each item
//! 3. [`copy`] uploads the zips to the repository host over SFTP
//! 4. [`import`] optionally runs the DSpace importer over SSH
//! 5. [`doi`] fetches assigned DOI marker files back from the repository host
//! 6. [`remote_url`] writes the DOIs back into the journal system
//!
//! Every stage records what it did in a shared [`Report`], which the [`mail`] module can send
//! out once the run is over.
//!
//! # Example
//! ```rust,no_run
//! use journal2saf::{config::Config, tasks::{run_tasks, Task}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!   let config = Config::load("conf/config.toml")?;
//!   let report = run_tasks(&config, &[Task::Export, Task::Copy]).await?;
//!   println!("{report}");
//!
//!   Ok(())
//! }
//! ```

#![warn(missing_docs, clippy::missing_docs_in_private_items)]
use std::{
  collections::BTreeMap,
  fmt::Display,
  path::{Path, PathBuf},
};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};
#[cfg(test)] use tracing_test::traced_test;

pub mod client;
pub mod config;
pub mod copy;
pub mod doi;
pub mod errors;
pub mod expr;
pub mod filters;
pub mod import;
pub mod mail;
pub mod model;
pub mod poll;
pub mod remote;
pub mod remote_url;
pub mod report;
pub mod saf;
pub mod tasks;
#[cfg(test)] mod tests;

use client::JournalClient;
use config::Config;
use errors::SafError;
use model::{FileRecord, FileState, Publisher, Submission, System};
pub use report::Report;

/// PKP convention for the submission status of published items.
pub const PKP_STATUS_PUBLISHED: i64 = 3;

lazy_static! {
  /// Matches the processed-item naming scheme used for zips and DOI marker files, e.g.
  /// `journal_publication_id_12_submission_file_id_34.zip.done`.
  static ref ITEM_NAME: Regex =
    Regex::new(r"publication_id_(\d+)_submission_file_id_(\d+)").expect("valid item name regex");
}

/// Extracts `(publication_id, submission_file_id)` from an exported item's file name.
///
/// Returns `None` for names that do not follow the export naming scheme.
///
/// # Examples
///
/// ```
/// use journal2saf::parse_item_name;
///
/// let ids = parse_item_name("hsg_publication_id_102_submission_file_id_398.zip.done");
/// assert_eq!(ids, Some(("102".to_string(), "398".to_string())));
/// assert_eq!(parse_item_name("notes.txt"), None);
/// ```
pub fn parse_item_name(name: &str) -> Option<(String, String)> {
  let caps = ITEM_NAME.captures(name)?;
  Some((caps[1].to_string(), caps[2].to_string()))
}

/// Formats a byte count the way the export log lines do: whole megabytes where possible.
pub fn human_size(bytes: u64) -> String {
  match bytes >> 20 {
    0 => format!("{bytes} bytes"),
    mb => format!("{mb} Mb"),
  }
}
