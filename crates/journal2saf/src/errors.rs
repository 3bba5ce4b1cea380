//! Error types for the journal2saf library.
//!
//! Every stage of the pipeline returns [`SafError`]. Errors coming from the libraries doing the
//! actual I/O (HTTP, SSH, SMTP, zip, filesystem) are wrapped transparently so their messages
//! survive unchanged, while the domain variants describe what went wrong in the harvest itself.
//!
//! # Examples
//!
//! ```no_run
//! use journal2saf::{config::Config, errors::SafError};
//!
//! match Config::load("conf/config.toml") {
//!   Ok(config) => println!("harvesting {}", config.general.journal_server),
//!   Err(SafError::Config(message)) => eprintln!("bad configuration: {message}"),
//!   Err(e) => eprintln!("other error: {e}"),
//! }
//! ```

use thiserror::Error;

/// Errors that can occur while harvesting, packaging and transferring SAF items.
#[derive(Error, Debug)]
pub enum SafError {
  /// The journal API answered with an `{"error": ...}` object.
  ///
  /// The string holds the full response body for debugging. Most of the time this means the
  /// configured API token does not match the server's `apiToken`.
  #[error("API error: {0}")]
  Api(String),

  /// The configuration file is missing values or contains invalid ones.
  #[error("Configuration error: {0}")]
  Config(String),

  /// A stage needs a configuration section that is absent.
  #[error("Missing configuration section [{0}]")]
  MissingSection(&'static str),

  /// A metadata expression could not be parsed.
  #[error("Invalid expression: {0}")]
  Expression(String),

  /// The export directory does not exist or is not a directory.
  #[error("Export path not found: {0}")]
  ExportPath(String),

  /// A remote operation over SSH or SFTP failed at the application level.
  #[error("Remote error: {0}")]
  Remote(String),

  /// A network request failed.
  #[error(transparent)]
  Network(#[from] reqwest::Error),

  /// Failed to parse a URL.
  #[error(transparent)]
  InvalidUrl(#[from] url::ParseError),

  /// A JSON payload could not be decoded.
  #[error(transparent)]
  Json(#[from] serde_json::Error),

  /// The configuration file is not valid TOML.
  #[error(transparent)]
  Toml(#[from] toml::de::Error),

  /// A file system operation failed.
  #[error(transparent)]
  Path(#[from] std::io::Error),

  /// Writing an XML file failed.
  #[error(transparent)]
  Xml(#[from] quick_xml::Error),

  /// Creating a zip archive failed.
  #[error(transparent)]
  Zip(#[from] zip::result::ZipError),

  /// SSH session, SFTP or channel errors.
  #[error(transparent)]
  Ssh(#[from] ssh2::Error),

  /// A glob pattern was invalid.
  #[error(transparent)]
  Glob(#[from] glob::PatternError),

  /// An email address in the configuration could not be parsed.
  #[error(transparent)]
  Address(#[from] lettre::address::AddressError),

  /// Building the report email failed.
  #[error(transparent)]
  Email(#[from] lettre::error::Error),

  /// The SMTP session failed.
  #[error(transparent)]
  Smtp(#[from] lettre::transport::smtp::Error),
}

impl SafError {
  /// Checks if this error comes from the journal API rejecting a request.
  pub fn is_api_error(&self) -> bool { matches!(self, SafError::Api(_)) }
}
