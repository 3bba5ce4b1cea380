//! Configuration loading for the harvesting pipeline.
//!
//! The configuration lives in a single TOML file. Only `[general]`, `[export]` and the `[[meta]]`
//! table are required to export SAF packages; the `[scp]`, `[dspace]`, `[docker]` and `[email]`
//! sections are checked when the stage that needs them runs.
//!
//! ```toml
//! [general]
//! journal_server = "https://ojs.example.com/index.php"
//! api_token = "secret"
//! system = "ojs"
//!
//! [export]
//! export_path = "./export"
//! collection = "123456789/1"
//! doi_prefix = "https://doi.org/"
//!
//! [[meta]]
//! field = "dc.title"
//! value = "publication.fullTitle"
//! ```

use super::*;
use crate::filters::FilterChain;

/// Bundled example configuration, written by `journal2saf init`.
pub const EXAMPLE_CONFIG: &str = include_str!("../config/config.example.toml");

/// Complete configuration of a harvesting run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
  /// Journal server access and global switches
  pub general: General,
  /// Export directory and SAF options
  pub export:  Export,
  /// Ordered metadata field mapping
  #[serde(default)]
  pub meta:    Vec<MetaField>,
  /// SSH access to the repository host
  pub scp:     Option<Scp>,
  /// Paths and options of the DSpace installation
  pub dspace:  Option<Dspace>,
  /// Docker container running DSpace
  pub docker:  Option<Docker>,
  /// Report email settings
  pub email:   Option<Email>,
}

/// The `[general]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct General {
  /// Base URL of the journal installation, e.g. `https://ojs.example.com/index.php`
  pub journal_server:       String,
  /// API token appended to every REST request
  pub api_token:            String,
  /// Which PKP application the server runs
  #[serde(default)]
  pub system:               System,
  /// Contexts endpoint, relative to a journal URL
  #[serde(default = "General::default_endpoint_contexts")]
  pub endpoint_contexts:    String,
  /// Submissions endpoint, relative to a journal URL
  #[serde(default = "General::default_endpoint_submissions")]
  pub endpoint_submissions: String,
  /// Issues endpoint, relative to a journal URL
  #[serde(default = "General::default_endpoint_issues")]
  pub endpoint_issues:      String,
  /// Publication type, available to metadata expressions as `type`
  #[serde(rename = "type", default = "General::default_type")]
  pub item_type:            String,
  /// Delete DSpace imports again right after checking them
  #[serde(default)]
  pub dry_run:              bool,
  /// Verify the journal server's TLS certificate
  #[serde(default)]
  pub verify_tls:           bool,
  /// Token of the remote-url plugin used for the DOI write back
  #[serde(default)]
  pub token:                String,
  /// Endpoint of the remote-url plugin, defaults to `journal_server`
  #[serde(default)]
  pub remote_url_endpoint:  Option<String>,
  /// HTTP method used for the DOI write back
  #[serde(default)]
  pub remote_url_method:    RemoteUrlMethod,
}

/// HTTP method used to write the remote URL back to the journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteUrlMethod {
  /// Parameters in the query string
  Get,
  /// Parameters as form body
  #[default]
  Post,
}

/// The `[export]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Export {
  /// Directory holding item folders, zips and DOI files
  pub export_path:           PathBuf,
  /// DSpace collection handle written to every `collections` file
  pub collection:            String,
  /// Prefix turning a bare DOI into a resolvable URL
  #[serde(default)]
  pub doi_prefix:            String,
  /// Name payload files after the journal instead of the server's file name
  #[serde(default)]
  pub generate_filename:     bool,
  /// Only these journals (by `urlPath`) are harvested, when not empty
  #[serde(default)]
  pub allow:                 Vec<String>,
  /// These journals (by `urlPath`) are never harvested
  #[serde(default)]
  pub deny:                  Vec<String>,
  /// Names of the metadata filters to apply, in order
  #[serde(default = "Export::default_filters")]
  pub filters:               Vec<String>,
  /// Abstracts shorter than this (in characters) are dropped
  #[serde(default = "Export::default_abstract_min_length")]
  pub abstract_min_length:   usize,
  /// Author names that are removed from author entries
  #[serde(default = "Export::default_unwanted_author_names")]
  pub unwanted_author_names: Vec<String>,
}

/// One entry of the `[[meta]]` mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaField {
  /// Target field as `schema.element[.qualifier]`
  pub field: String,
  /// Expression evaluated against the harvested data
  pub value: String,
}

/// The `[scp]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scp {
  /// Repository host name
  pub server:                   String,
  /// SSH port
  #[serde(default = "Scp::default_port")]
  pub port:                     u16,
  /// Login user
  pub user:                     String,
  /// Private key used for public key authentication
  pub key_filename:             PathBuf,
  /// OpenSSH known hosts file checked against the server's host key
  #[serde(default = "Scp::default_known_hosts")]
  pub known_hosts:              PathBuf,
  /// Refuse hosts missing from `known_hosts` instead of accepting them with a warning
  #[serde(default)]
  pub strict_host_key_checking: bool,
}

/// The `[dspace]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dspace {
  /// Upload directory for zips on the repository host
  pub server_zipsource: String,
  /// Directory on the repository host where DSpace drops DOI files
  #[serde(default)]
  pub server_doifiles:  String,
  /// DSpace launcher inside the container
  #[serde(default)]
  pub docker_dspace:    String,
  /// EPerson running the import
  #[serde(default)]
  pub eperson:          String,
  /// Mapfile directory inside the container, used as a prefix
  #[serde(default)]
  pub docker_mapfile:   String,
  /// Zip source directory inside the container
  #[serde(default)]
  pub docker_zipsource: String,
  /// Extra arguments appended to the import command
  #[serde(default)]
  pub extra:            String,
}

/// The `[docker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Docker {
  /// User the DSpace commands run as
  pub user:      String,
  /// Container name
  pub container: String,
}

/// The `[email]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
  /// Whether the report should be mailed
  #[serde(default)]
  pub enabled:  bool,
  /// From address
  pub sender:   String,
  /// SMTP login
  pub login:    String,
  /// SMTP password
  pub password: String,
  /// SMTP server
  pub server:   String,
  /// SMTP submission port
  #[serde(default = "Email::default_port")]
  pub port:     u16,
  /// Report recipient
  pub receiver: String,
}

impl General {
  fn default_endpoint_contexts() -> String { "/api/v1/contexts".to_string() }

  fn default_endpoint_submissions() -> String { "/api/v1/submissions".to_string() }

  fn default_endpoint_issues() -> String { "/api/v1/issues".to_string() }

  fn default_type() -> String { "article".to_string() }

  /// Endpoint receiving the DOI write back.
  pub fn remote_url_endpoint(&self) -> &str {
    self.remote_url_endpoint.as_deref().unwrap_or(&self.journal_server)
  }
}

impl Export {
  fn default_filters() -> Vec<String> {
    vec!["abstract_length".to_string(), "author_name".to_string()]
  }

  fn default_abstract_min_length() -> usize { 20 }

  fn default_unwanted_author_names() -> Vec<String> { vec!["admin".to_string(), ".".to_string()] }
}

impl Scp {
  fn default_port() -> u16 { 22 }

  fn default_known_hosts() -> PathBuf { PathBuf::from("~/.ssh/known_hosts") }

  /// The private key path with a leading `~` expanded to the home directory.
  pub fn key_path(&self) -> PathBuf { expand_home(&self.key_filename) }

  /// The known hosts path with a leading `~` expanded to the home directory.
  pub fn known_hosts_path(&self) -> PathBuf { expand_home(&self.known_hosts) }
}

/// Replaces a leading `~` with the home directory.
fn expand_home(path: &Path) -> PathBuf {
  match path.strip_prefix("~") {
    Ok(rest) => dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(rest),
    Err(_) => path.to_path_buf(),
  }
}

impl Email {
  fn default_port() -> u16 { 587 }
}

impl Config {
  /// Returns the default configuration file location.
  ///
  /// - Linux: `~/.config/journal2saf/config.toml`
  /// - macOS: `~/Library/Application Support/journal2saf/config.toml`
  pub fn default_path() -> PathBuf {
    dirs::config_dir()
      .unwrap_or_else(|| PathBuf::from("."))
      .join("journal2saf")
      .join("config.toml")
  }

  /// Reads and validates the configuration file at `path`.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be read, is not valid TOML, or fails
  /// [`validation`](Config::validate).
  pub fn load(path: impl AsRef<Path>) -> Result<Self, SafError> {
    let path = path.as_ref();
    debug!("Loading config from {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  /// Parses and validates configuration from a TOML string.
  pub fn from_toml_str(content: &str) -> Result<Self, SafError> {
    let config: Config = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// Writes the bundled example configuration to `path`, creating parent directories.
  pub fn write_example(path: impl AsRef<Path>) -> Result<(), SafError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, EXAMPLE_CONFIG)?;
    Ok(())
  }

  /// Checks the parts of the configuration that serde cannot.
  ///
  /// # Errors
  ///
  /// Returns [`SafError::Config`] if a meta field lacks a schema or element, or a filter name
  /// is unknown.
  pub fn validate(&self) -> Result<(), SafError> {
    if self.general.journal_server.trim().is_empty() {
      return Err(SafError::Config("general.journal_server must not be empty".into()));
    }
    for meta in &self.meta {
      let mut parts = meta.field.split('.');
      let schema = parts.next().unwrap_or_default();
      let element = parts.next().unwrap_or_default();
      if schema.is_empty() || element.is_empty() {
        return Err(SafError::Config(format!(
          "meta field '{}' must look like schema.element[.qualifier]",
          meta.field
        )));
      }
    }
    for name in &self.export.filters {
      if !FilterChain::is_builtin(name) {
        return Err(SafError::Config(format!("unknown metadata filter '{name}'")));
      }
    }
    Ok(())
  }

  /// Journal server base URL with exactly one trailing slash.
  pub fn journal_server(&self) -> String {
    format!("{}/", self.general.journal_server.trim_end_matches('/'))
  }

  /// The `[scp]` section, or an error naming it.
  pub fn scp(&self) -> Result<&Scp, SafError> { self.scp.as_ref().ok_or(SafError::MissingSection("scp")) }

  /// The `[dspace]` section, or an error naming it.
  pub fn dspace(&self) -> Result<&Dspace, SafError> {
    self.dspace.as_ref().ok_or(SafError::MissingSection("dspace"))
  }

  /// The `[docker]` section, or an error naming it.
  pub fn docker(&self) -> Result<&Docker, SafError> {
    self.docker.as_ref().ok_or(SafError::MissingSection("docker"))
  }

  /// The `[email]` section, or an error naming it.
  pub fn email(&self) -> Result<&Email, SafError> {
    self.email.as_ref().ok_or(SafError::MissingSection("email"))
  }

  /// Replaces the journal allow list.
  pub fn with_allow(mut self, allow: Vec<String>) -> Self {
    self.export.allow = allow;
    self
  }

  /// Replaces the journal deny list.
  pub fn with_deny(mut self, deny: Vec<String>) -> Self {
    self.export.deny = deny;
    self
  }

  /// Sets the export directory.
  pub fn with_export_path(mut self, export_path: &Path) -> Self {
    self.export.export_path = export_path.to_path_buf();
    self
  }
}
