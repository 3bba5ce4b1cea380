//! Cleanup filters applied to evaluated metadata.
//!
//! After a `[[meta]]` expression has been evaluated, its value passes through every filter of
//! the [`FilterChain`] in order. Filters see the raw JSON, before locale selection, and decide
//! on their own which fields they care about.
//!
//! Two filters ship with the crate and can be enabled by name in `export.filters`:
//!
//! - `abstract_length` drops abstracts shorter than `export.abstract_min_length`
//! - `author_name` removes placeholder author names such as `admin`
//!
//! Library users can add their own filters:
//!
//! ```
//! use journal2saf::filters::{FilterChain, MetadataFilter};
//! use serde_json::{json, Value};
//!
//! struct Uppercase;
//!
//! impl MetadataFilter for Uppercase {
//!   fn name(&self) -> &str { "uppercase" }
//!
//!   fn apply(&self, field: &str, value: Value) -> Value {
//!     match (field, value) {
//!       ("dc.title", Value::String(s)) => Value::String(s.to_uppercase()),
//!       (_, value) => value,
//!     }
//!   }
//! }
//!
//! let mut chain = FilterChain::default();
//! chain.push(Box::new(Uppercase));
//! assert_eq!(chain.apply("dc.title", json!("cicadina")), json!("CICADINA"));
//! ```

use serde_json::Map;

use super::*;

/// A metadata cleanup step.
pub trait MetadataFilter: Send + Sync {
  /// Name used in log lines and in the configuration.
  fn name(&self) -> &str;

  /// Returns the cleaned value of `field` (e.g. `dc.description.abstract`).
  fn apply(&self, field: &str, value: Value) -> Value;
}

/// Drops per-locale abstracts shorter than a minimum length.
#[derive(Debug, Clone)]
pub struct AbstractLengthFilter {
  /// Minimum number of characters
  pub min_length: usize,
}

impl MetadataFilter for AbstractLengthFilter {
  fn name(&self) -> &str { "abstract_length" }

  fn apply(&self, field: &str, value: Value) -> Value {
    if field != "dc.description.abstract" {
      return value;
    }
    match value {
      Value::Object(abstracts) => Value::Object(
        abstracts
          .into_iter()
          .filter(|(_, text)| text.as_str().is_some_and(|t| t.chars().count() >= self.min_length))
          .collect(),
      ),
      Value::String(text) if text.chars().count() < self.min_length => Value::Null,
      value => value,
    }
  }
}

/// Removes author name entries that are placeholders rather than real names.
#[derive(Debug, Clone)]
pub struct AuthorNameFilter {
  /// Names to remove, compared exactly
  pub unwanted: Vec<String>,
}

impl AuthorNameFilter {
  fn clean_names(&self, names: &mut Map<String, Value>) {
    names.retain(|_, name| !name.as_str().is_some_and(|n| self.unwanted.iter().any(|u| u == n)));
  }
}

impl MetadataFilter for AuthorNameFilter {
  fn name(&self) -> &str { "author_name" }

  fn apply(&self, field: &str, mut value: Value) -> Value {
    if field != "dc.contributor.author" {
      return value;
    }
    for author in value.as_array_mut().into_iter().flatten() {
      for part in ["givenName", "familyName"] {
        if let Some(names) = author.get_mut(part).and_then(Value::as_object_mut) {
          self.clean_names(names);
        }
      }
    }
    value
  }
}

/// Ordered list of filters applied to every evaluated metadata value.
#[derive(Default)]
pub struct FilterChain {
  /// Filters in application order
  filters: Vec<Box<dyn MetadataFilter>>,
}

impl FilterChain {
  /// Names of the filters that can be enabled from the configuration.
  pub const BUILTIN: [&'static str; 2] = ["abstract_length", "author_name"];

  /// Whether `name` refers to a built-in filter.
  pub fn is_builtin(name: &str) -> bool { Self::BUILTIN.contains(&name) }

  /// Builds the chain configured in `export.filters`.
  pub fn from_config(config: &Config) -> Result<Self, SafError> {
    let export = &config.export;
    let mut chain = Self::default();
    for name in &export.filters {
      match name.as_str() {
        "abstract_length" =>
          chain.push(Box::new(AbstractLengthFilter { min_length: export.abstract_min_length })),
        "author_name" =>
          chain.push(Box::new(AuthorNameFilter { unwanted: export.unwanted_author_names.clone() })),
        unknown => return Err(SafError::Config(format!("unknown metadata filter '{unknown}'"))),
      }
    }
    Ok(chain)
  }

  /// Appends a filter to the end of the chain.
  pub fn push(&mut self, filter: Box<dyn MetadataFilter>) { self.filters.push(filter); }

  /// Names of the filters in application order.
  pub fn names(&self) -> Vec<&str> { self.filters.iter().map(|f| f.name()).collect() }

  /// Runs `value` through every filter.
  pub fn apply(&self, field: &str, value: Value) -> Value {
    self.filters.iter().fold(value, |value, filter| {
      trace!("apply filter {} to {field}", filter.name());
      filter.apply(field, value)
    })
  }
}

impl std::fmt::Debug for FilterChain {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FilterChain").field("filters", &self.names()).finish()
  }
}
