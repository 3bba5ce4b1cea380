//! HTTP client for the OJS/OMP REST API.
//!
//! All API requests carry the configured `apiToken` as query parameter. Responses are JSON; a
//! top-level `error` key marks a rejected request and is turned into [`SafError::Api`].
//! Collections are paginated through `offset` / `itemsMax` and are collected in full by
//! [`JournalClient::get_paginated`].
//!
//! # Examples
//!
//! ```no_run
//! use journal2saf::{client::JournalClient, config::Config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("conf/config.toml")?;
//! let client = JournalClient::new(&config)?;
//! let contexts = client.get_paginated(|offset| client.contexts_url(offset)).await?;
//! println!("{} journals", contexts.len());
//! # Ok(())
//! # }
//! ```

use reqwest::{header, StatusCode};
use url::Url;

use super::*;
use crate::config::RemoteUrlMethod;

/// A downloaded payload file.
#[derive(Debug, Clone)]
pub struct Download {
  /// Response status
  pub status:              StatusCode,
  /// `Content-Type` header without parameters
  pub content_type:        Option<String>,
  /// Raw `Content-Disposition` header
  pub content_disposition: Option<String>,
  /// Response body
  pub bytes:               Vec<u8>,
}

/// Client for the journal server's REST API.
#[derive(Debug, Clone)]
pub struct JournalClient {
  /// Internal web client used to connect to the API.
  client:               reqwest::Client,
  /// Journal server base URL ending in `/`.
  server:               String,
  /// API token appended to every request.
  token:                String,
  /// Contexts endpoint.
  endpoint_contexts:    String,
  /// Submissions endpoint.
  endpoint_submissions: String,
  /// Issues endpoint.
  endpoint_issues:      String,
  /// Remote-url plugin endpoint.
  remote_url_endpoint:  String,
  /// Remote-url plugin token.
  remote_url_token:     String,
  /// Remote-url plugin method.
  remote_url_method:    RemoteUrlMethod,
}

impl JournalClient {
  /// Creates a client for the journal server described in `config`.
  ///
  /// TLS certificates are only verified when `general.verify_tls` is set.
  pub fn new(config: &Config) -> Result<Self, SafError> {
    let general = &config.general;
    let client = reqwest::Client::builder()
      .user_agent(concat!("journal2saf/", env!("CARGO_PKG_VERSION")))
      .danger_accept_invalid_certs(!general.verify_tls)
      .build()?;
    Ok(Self {
      client,
      server: config.journal_server(),
      token: general.api_token.clone(),
      endpoint_contexts: general.endpoint_contexts.clone(),
      endpoint_submissions: general.endpoint_submissions.clone(),
      endpoint_issues: general.endpoint_issues.clone(),
      remote_url_endpoint: general.remote_url_endpoint().to_string(),
      remote_url_token: general.token.clone(),
      remote_url_method: general.remote_url_method,
    })
  }

  /// Appends the API token to `url`, with `?` or `&` as the URL requires.
  pub fn with_token(&self, url: &str) -> Result<Url, SafError> {
    let mut url = Url::parse(url)?;
    url.query_pairs_mut().append_pair("apiToken", &self.token);
    Ok(url)
  }

  /// Builds the site-wide contexts request for the batch starting at `offset`.
  pub fn contexts_url(&self, offset: usize) -> String {
    let url = format!(
      "{}_{}{}offset={offset}&isEnabled=true",
      self.server,
      self.endpoint_contexts,
      query_mark(&self.endpoint_contexts)
    );
    info!("build contexts REST call: {url}");
    url
  }

  /// Builds the published-submissions request of a journal for the batch starting at `offset`.
  pub fn submissions_url(&self, journal_url: &str, offset: usize) -> String {
    let url = format!(
      "{journal_url}{}{}offset={offset}&isPublish=true",
      self.endpoint_submissions,
      query_mark(&self.endpoint_submissions)
    );
    debug!("build submissions REST call: {url}");
    url
  }

  /// Builds the request for a single issue of a journal.
  pub fn issue_url(&self, journal_url: &str, issue_id: &str) -> String {
    let url = format!("{journal_url}{}/{issue_id}", self.endpoint_issues);
    debug!("build issue REST call: {url}");
    url
  }

  /// Requests `url` and returns the decoded JSON.
  ///
  /// # Errors
  ///
  /// Returns [`SafError::Api`] if the server answers with an `error` object, or a network/JSON
  /// error if the request itself fails.
  pub async fn get_json(&self, url: &str) -> Result<Value, SafError> {
    let url = self.with_token(url)?;
    trace!("GET {url}");
    let text = self.client.get(url).send().await?.text().await?;
    let value: Value = serde_json::from_str(&text)?;
    if value.get("error").is_some() {
      error!("server request failed due to: {value}");
      info!("is your api key from the config file matching the apiToken?");
      return Err(SafError::Api(value.to_string()));
    }
    Ok(value)
  }

  /// Collects every item of a paginated collection.
  ///
  /// `build_url` receives the current offset. Requests continue while `itemsMax` exceeds the
  /// number of items collected so far, and stop early on an empty batch.
  pub async fn get_paginated(
    &self,
    build_url: impl Fn(usize) -> String,
  ) -> Result<Vec<Value>, SafError> {
    let mut items = Vec::new();
    let mut items_max = 1;
    while items_max > items.len() {
      let batch = self.get_json(&build_url(items.len())).await?;
      items_max = batch["itemsMax"].as_u64().unwrap_or_default() as usize;
      let Some(batch_items) = batch["items"].as_array().filter(|b| !b.is_empty()) else {
        break;
      };
      items.extend(batch_items.iter().cloned());
    }
    Ok(items)
  }

  /// Downloads a payload file. Non-success statuses are returned, not raised.
  pub async fn download(&self, url: &str) -> Result<Download, SafError> {
    debug!("download file: {url}");
    let response = self.client.get(url).send().await?;
    let status = response.status();
    let headers = response.headers();
    let header_text = |name: header::HeaderName| {
      headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
    };
    let content_type = header_text(header::CONTENT_TYPE)
      .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_string());
    let content_disposition = header_text(header::CONTENT_DISPOSITION);
    let bytes = response.bytes().await?.to_vec();
    Ok(Download { status, content_type, content_disposition, bytes })
  }

  /// Stores `remote_url` on the publication through the remote-url plugin.
  ///
  /// Returns the response status; the caller decides what counts as success.
  pub async fn set_remote_url(
    &self,
    publication_id: &str,
    remote_url: &str,
  ) -> Result<StatusCode, SafError> {
    let params = [
      ("publication_id", publication_id),
      ("remote_url", remote_url),
      ("token", self.remote_url_token.as_str()),
    ];
    let request = match self.remote_url_method {
      RemoteUrlMethod::Get => self.client.get(&self.remote_url_endpoint).query(&params),
      RemoteUrlMethod::Post => self.client.post(&self.remote_url_endpoint).form(&params),
    };
    Ok(request.send().await?.status())
  }
}

/// `&` if `endpoint` already has a query string, `?` otherwise.
fn query_mark(endpoint: &str) -> char {
  if endpoint.contains('?') {
    '&'
  } else {
    '?'
  }
}
