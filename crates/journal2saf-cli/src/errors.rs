//! Error types for the journal2saf command line.
//!
//! Library failures, file system problems and interactive prompts all end up here. Most
//! variants are transparent so the underlying message reaches the user unchanged.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while running a CLI command.
#[derive(Error, Debug)]
pub enum CliErrors {
  /// Errors from user interaction dialogs
  #[error(transparent)]
  Dialoguer(#[from] dialoguer::Error),

  /// Errors from the harvesting library
  #[error(transparent)]
  Journal(#[from] journal2saf::errors::SafError),

  /// File system and IO operation errors
  #[error(transparent)]
  IO(#[from] std::io::Error),

  /// The rolling log file could not be set up
  #[error(transparent)]
  LogFile(#[from] tracing_appender::rolling::InitError),

  /// No configuration file at the given path
  #[error("no configuration found at {0}, run `journal2saf init` first")]
  MissingConfig(PathBuf),

  /// The run finished, but its report contains errors
  #[error("run finished with errors, see report")]
  Failed,
}
