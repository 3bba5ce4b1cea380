//! Harvested journal data.
//!
//! The journal API returns deeply nested JSON whose exact shape differs between OJS and OMP and
//! between PKP releases. The types in this module keep the raw JSON around, since metadata
//! expressions may reach into any part of it, and expose typed accessors for the handful of
//! fields the pipeline itself depends on.

use super::*;

/// The PKP application running on the journal server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
  /// Open Journal Systems, files are called galleys
  #[default]
  Ojs,
  /// Open Monograph Press, files are called publication formats
  Omp,
}

impl System {
  /// Name of a file record in this system, as used in log and report lines.
  pub fn file_record_name(&self) -> &'static str {
    match self {
      System::Ojs => "galley",
      System::Omp => "publicationFormat",
    }
  }

  /// JSON key of the file records inside a publication.
  pub fn file_records_key(&self) -> &'static str {
    match self {
      System::Ojs => "galleys",
      System::Omp => "publicationFormats",
    }
  }
}

impl std::fmt::Display for System {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      System::Ojs => write!(f, "ojs"),
      System::Omp => write!(f, "omp"),
    }
  }
}

/// Export state of a single file record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileState {
  /// Not exported yet
  #[default]
  Pending,
  /// A zip for this file already exists in the export directory
  Processed,
  /// The journal already links to the repository copy (`urlRemote` is set)
  Skip,
}

/// Renders a JSON scalar as plain text, `None` for null and structured values.
pub(crate) fn json_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

/// A journal (OJS) or press (OMP), called a context by the PKP API.
#[derive(Debug, Clone)]
pub struct Publisher {
  /// Raw context JSON, merged with its detail request
  pub data:        Value,
  /// Context id
  pub id:          i64,
  /// URL path segment, e.g. `hsg`
  pub url_path:    String,
  /// Public journal URL, used for API and download requests
  pub url:         String,
  /// API self link
  pub href:        String,
  /// Published submissions harvested for this context
  pub submissions: Vec<Submission>,
}

impl Publisher {
  /// Builds a publisher from a context JSON object.
  ///
  /// # Errors
  ///
  /// Returns [`SafError::Api`] if `id`, `urlPath` or `url` is missing.
  pub fn from_json(data: Value) -> Result<Self, SafError> {
    let id = data["id"]
      .as_i64()
      .ok_or_else(|| SafError::Api(format!("context without id: {data}")))?;
    let url_path = data["urlPath"]
      .as_str()
      .ok_or_else(|| SafError::Api(format!("context {id} without urlPath")))?
      .to_string();
    let url = data["url"]
      .as_str()
      .ok_or_else(|| SafError::Api(format!("context {id} without url")))?
      .to_string();
    let href = data["_href"].as_str().unwrap_or_default().to_string();
    Ok(Self { data, id, url_path, url, href, submissions: Vec::new() })
  }

  /// Merges the keys of `detail` into the raw data.
  pub fn merge(&mut self, detail: Value) { merge_json(&mut self.data, detail); }

  /// Localized journal name, falling back to any other non-empty name and then the `urlPath`.
  pub fn name(&self, locale: &str) -> String {
    match &self.data["name"] {
      Value::String(name) => name.clone(),
      Value::Object(names) => names
        .get(locale)
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .or_else(|| names.values().filter_map(Value::as_str).find(|n| !n.is_empty()))
        .unwrap_or(&self.url_path)
        .to_string(),
      _ => self.url_path.clone(),
    }
  }
}

/// A published submission together with the publication and issue it appeared in.
#[derive(Debug, Clone)]
pub struct Submission {
  /// Raw submission JSON, merged with its detail request
  pub data:        Value,
  /// Publication detail JSON
  pub publication: Value,
  /// Issue detail JSON, if the publication is assigned to an issue
  pub issue:       Option<Value>,
  /// File records of the publication
  pub files:       Vec<FileRecord>,
}

impl Submission {
  /// Creates a submission without publication details.
  pub fn new(data: Value) -> Self {
    Self { data, publication: Value::Null, issue: None, files: Vec::new() }
  }

  /// Submission id.
  pub fn id(&self) -> i64 { self.data["id"].as_i64().unwrap_or_default() }

  /// Submission locale, e.g. `de_DE`. Falls back to the publication locale and then `en_US`.
  pub fn locale(&self) -> String {
    self.data["locale"]
      .as_str()
      .or_else(|| self.publication["locale"].as_str())
      .unwrap_or("en_US")
      .to_string()
  }

  /// Public landing page URL.
  pub fn published_url(&self) -> String {
    self.data["urlPublished"]
      .as_str()
      .or_else(|| self.publication["urlPublished"].as_str())
      .unwrap_or_default()
      .to_string()
  }

  /// Issue volume, used for generated OJS file names.
  pub fn volume(&self) -> String {
    self
      .issue
      .as_ref()
      .and_then(|issue| json_text(&issue["volume"]))
      .or_else(|| json_text(&self.data["volume"]))
      .unwrap_or_default()
  }

  /// Series position, used for generated OMP file names.
  pub fn series_position(&self) -> String {
    json_text(&self.publication["seriesPosition"])
      .or_else(|| json_text(&self.data["seriesPosition"]))
      .unwrap_or_default()
  }

  /// Page range of the publication, e.g. `12-34`.
  pub fn pages(&self) -> Value { self.publication.get("pages").cloned().unwrap_or(Value::Null) }

  /// File records still waiting to be exported.
  pub fn pending_files(&self) -> impl Iterator<Item = &FileRecord> {
    self.files.iter().filter(|f| f.state == FileState::Pending)
  }
}

/// A galley (OJS) or publication format (OMP).
#[derive(Debug, Clone)]
pub struct FileRecord {
  /// Raw record JSON
  pub data:               Value,
  /// Galley or publication format id
  pub id:                 i64,
  /// Publication the record belongs to
  pub publication_id:     String,
  /// Submission file id of the payload
  pub submission_file_id: Option<String>,
  /// Export state
  pub state:              FileState,
}

impl FileRecord {
  /// Builds a file record from galley or publication format JSON.
  pub fn from_json(data: Value) -> Self {
    let id = data["id"].as_i64().unwrap_or_default();
    let publication_id = json_text(&data["publicationId"]).unwrap_or_default();
    let submission_file_id = json_text(&data["submissionFileId"]);
    Self { data, id, publication_id, submission_file_id, state: FileState::Pending }
  }

  /// Remote URL already stored on the record, if any.
  pub fn url_remote(&self) -> Option<&str> {
    self.data["urlRemote"].as_str().filter(|url| !url.is_empty())
  }

  /// Mimetype of the attached file, if the record carries one.
  pub fn mimetype(&self) -> Option<&str> { self.data["file"]["mimetype"].as_str() }

  /// Whether the record has a payload file. Publication formats carry no inline file object.
  pub fn has_file(&self, system: System) -> bool {
    match system {
      System::Ojs => !self.data["file"].is_null(),
      System::Omp => true,
    }
  }
}

/// Shallow merge of `extra` into `target`, both JSON objects.
pub(crate) fn merge_json(target: &mut Value, extra: Value) {
  match (target, extra) {
    (Value::Object(target), Value::Object(extra)) =>
      for (key, value) in extra {
        target.insert(key, value);
      },
    (target, extra) => *target = extra,
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_publisher_from_json() -> anyhow::Result<()> {
    let publisher = Publisher::from_json(json!({
      "_href": "https://ojs.example.com/hsg/api/v1/contexts/3",
      "id": 3,
      "urlPath": "hsg",
      "url": "https://ojs.example.com/hsg",
      "name": {"de_DE": "Hallesches Jahrbuch", "en_US": ""}
    }))?;
    assert_eq!(publisher.url_path, "hsg");
    assert_eq!(publisher.name("de_DE"), "Hallesches Jahrbuch");
    assert_eq!(publisher.name("en_US"), "Hallesches Jahrbuch");
    assert_eq!(publisher.name("fr_FR"), "Hallesches Jahrbuch");
    Ok(())
  }

  #[test]
  fn test_publisher_requires_url_path() {
    let result = Publisher::from_json(json!({"id": 3, "url": "x"}));
    assert!(matches!(result, Err(SafError::Api(_))));
  }

  #[test]
  fn test_file_record_ids_as_text() {
    let record = FileRecord::from_json(json!({
      "id": 7,
      "publicationId": 102,
      "submissionFileId": 398,
      "urlRemote": "",
      "file": {"mimetype": "application/pdf"}
    }));
    assert_eq!(record.publication_id, "102");
    assert_eq!(record.submission_file_id.as_deref(), Some("398"));
    assert_eq!(record.url_remote(), None);
    assert_eq!(record.mimetype(), Some("application/pdf"));
    assert!(record.has_file(System::Ojs));
  }

  #[test]
  fn test_merge_json_overwrites_keys() {
    let mut target = json!({"a": 1, "b": 2});
    merge_json(&mut target, json!({"b": 3, "c": 4}));
    assert_eq!(target, json!({"a": 1, "b": 3, "c": 4}));
  }

  #[test]
  fn test_submission_fallbacks() {
    let mut submission = Submission::new(json!({"id": 103, "locale": "de_DE"}));
    submission.issue = Some(json!({"volume": 12}));
    submission.publication = json!({"pages": "5-17", "seriesPosition": "3"});
    assert_eq!(submission.id(), 103);
    assert_eq!(submission.locale(), "de_DE");
    assert_eq!(submission.volume(), "12");
    assert_eq!(submission.series_position(), "3");
    assert_eq!(submission.pages(), json!("5-17"));
  }
}
