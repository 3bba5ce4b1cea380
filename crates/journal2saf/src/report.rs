//! Run report accumulated by every pipeline stage.
//!
//! The report is a simple ordered multimap from a message key to the values recorded under it.
//! It is printed at the end of a run and optionally mailed to an operator.

use super::*;

/// Messages collected during a run, grouped by key.
///
/// # Examples
///
/// ```
/// use journal2saf::Report;
///
/// let mut report = Report::default();
/// report.add("processed journals", "hsg");
/// report.add("processed journals", "cicadina");
/// assert_eq!(report.get("processed journals").len(), 2);
/// assert!(!report.has_errors());
///
/// report.add("ERROR", "connection refused");
/// assert!(report.has_errors());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
  /// Recorded values per key
  entries: BTreeMap<String, Vec<String>>,
}

impl Report {
  /// Records `value` under `key`.
  pub fn add(&mut self, key: impl Into<String>, value: impl Display) {
    self.entries.entry(key.into()).or_default().push(value.to_string());
  }

  /// Returns the values recorded under `key`, empty if there are none.
  pub fn get(&self, key: &str) -> &[String] {
    self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
  }

  /// Whether anything error-like was recorded.
  ///
  /// Keys containing `ERROR` or starting with `error` (e.g. `error ssh:host`,
  /// `error download file code:404`) count as errors.
  pub fn has_errors(&self) -> bool {
    self.entries.keys().any(|key| key.contains("ERROR") || key.to_lowercase().starts_with("error"))
  }

  /// Whether nothing has been recorded yet.
  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  /// Iterates over all keys and their values in key order.
  pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> { self.entries.iter() }

  /// Renders the report as pretty printed JSON.
  pub fn to_json(&self) -> Result<String, SafError> {
    Ok(serde_json::to_string_pretty(&self.entries)?)
  }
}

impl Display for Report {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    for (key, values) in &self.entries {
      writeln!(f, "{key}:")?;
      for value in values {
        writeln!(f, "  - {value}")?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_detection() {
    let mut report = Report::default();
    report.add("write zip file", "hsg_publication_id_1_submission_file_id_2.zip");
    assert!(!report.has_errors());

    report.add("error download file code:404", "https://ojs.example.com/x");
    assert!(report.has_errors());
  }

  #[test]
  fn test_display_lists_values() {
    let mut report = Report::default();
    report.add("transfer files", "a.zip");
    report.add("transfer files", "b.zip");
    let rendered = report.to_string();
    assert!(rendered.starts_with("transfer files:\n"));
    assert!(rendered.contains("  - a.zip\n  - b.zip\n"));
  }

  #[test]
  fn test_json_rendering() -> anyhow::Result<()> {
    let mut report = Report::default();
    report.add("finally wrote", "12 Mb");
    let json: serde_json::Value = serde_json::from_str(&report.to_json()?)?;
    assert_eq!(json["finally wrote"][0], "12 Mb");
    Ok(())
  }
}
