//! Metadata expressions.
//!
//! Each `[[meta]]` entry of the configuration maps a SAF field to a small expression evaluated
//! against the harvested JSON. Expressions are deliberately tiny:
//!
//! ```text
//! expr   := concat ( '|' concat )*        first non-empty alternative
//! concat := atom ( '+' atom )*            string concatenation of scalars
//! atom   := "literal" | path
//! path   := ident ( '.' ident | '.' int | '[' int ']' )*
//! ```
//!
//! Paths start at one of the scope variables (`submission`, `publication`, `issue`, `context`,
//! `files`, `locale`, `language`, `pagestart`, `pageend`, `type`, `system`) and walk into the
//! JSON. A segment that does not exist yields `null` instead of an error, so a mapping written
//! for OJS keeps working on records that lack a field.
//!
//! # Examples
//!
//! ```
//! use journal2saf::expr::{Expr, Scope};
//! use serde_json::json;
//!
//! let mut scope = Scope::default();
//! scope.insert("publication", json!({"title": {"en_US": "On Cicadas"}, "pages": "5-9"}));
//! scope.insert("issue", json!({"volume": 3}));
//!
//! let expr = Expr::parse("publication.fullTitle | publication.title")?;
//! assert_eq!(expr.evaluate(&scope), json!({"en_US": "On Cicadas"}));
//!
//! let expr = Expr::parse(r#""Vol. " + issue.volume"#)?;
//! assert_eq!(expr.evaluate(&scope), json!("Vol. 3"));
//! # Ok::<(), journal2saf::errors::SafError>(())
//! ```

use serde_json::Map;

use super::*;

/// Variables an expression can refer to.
#[derive(Debug, Clone, Default)]
pub struct Scope {
  /// Variable name -> value
  vars: Map<String, Value>,
}

impl Scope {
  /// Binds `name` to `value`, replacing an earlier binding.
  pub fn insert(&mut self, name: impl Into<String>, value: Value) { self.vars.insert(name.into(), value); }

  /// Value bound to `name`.
  pub fn get(&self, name: &str) -> Option<&Value> { self.vars.get(name) }
}

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Object key
  Key(String),
  /// Array index
  Index(usize),
}

/// A parsed metadata expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
  /// A quoted string
  Literal(String),
  /// A variable followed by keys and indices
  Path(Vec<Segment>),
  /// Scalars joined as text
  Concat(Vec<Expr>),
  /// First alternative that is not empty
  Fallback(Vec<Expr>),
}

/// Lexical tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  /// Quoted string contents
  Str(String),
  /// Identifier or numeric segment
  Ident(String),
  /// `.`
  Dot,
  /// `[`
  Open,
  /// `]`
  Close,
  /// `+`
  Plus,
  /// `|`
  Pipe,
}

fn tokenize(src: &str) -> Result<Vec<Token>, SafError> {
  let mut tokens = Vec::new();
  let mut chars = src.chars().peekable();
  while let Some(&c) = chars.peek() {
    match c {
      c if c.is_whitespace() => {
        chars.next();
      },
      '.' | '[' | ']' | '+' | '|' => {
        chars.next();
        tokens.push(match c {
          '.' => Token::Dot,
          '[' => Token::Open,
          ']' => Token::Close,
          '+' => Token::Plus,
          _ => Token::Pipe,
        });
      },
      '"' => {
        chars.next();
        let mut text = String::new();
        loop {
          match chars.next() {
            Some('"') => break,
            Some('\\') => match chars.next() {
              Some(escaped) => text.push(escaped),
              None => return Err(SafError::Expression(format!("dangling escape in `{src}`"))),
            },
            Some(c) => text.push(c),
            None => return Err(SafError::Expression(format!("unterminated string in `{src}`"))),
          }
        }
        tokens.push(Token::Str(text));
      },
      c if is_ident_char(c) => {
        let mut ident = String::new();
        while let Some(&c) = chars.peek().filter(|c| is_ident_char(**c)) {
          ident.push(c);
          chars.next();
        }
        tokens.push(Token::Ident(ident));
      },
      other => return Err(SafError::Expression(format!("unexpected `{other}` in `{src}`"))),
    }
  }
  Ok(tokens)
}

fn is_ident_char(c: char) -> bool { c.is_alphanumeric() || c == '_' || c == '-' }

/// Recursive descent over the token list.
struct Parser<'a> {
  /// Source text, for error messages
  src:    &'a str,
  /// Tokens to consume
  tokens: Vec<Token>,
  /// Position of the next token
  pos:    usize,
}

impl Parser<'_> {
  fn peek(&self) -> Option<&Token> { self.tokens.get(self.pos) }

  fn next(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn error(&self, message: &str) -> SafError {
    SafError::Expression(format!("{message} in `{}`", self.src))
  }

  fn fallback(&mut self) -> Result<Expr, SafError> {
    let mut alternatives = vec![self.concat()?];
    while self.peek() == Some(&Token::Pipe) {
      self.next();
      alternatives.push(self.concat()?);
    }
    Ok(if alternatives.len() == 1 { alternatives.remove(0) } else { Expr::Fallback(alternatives) })
  }

  fn concat(&mut self) -> Result<Expr, SafError> {
    let mut parts = vec![self.atom()?];
    while self.peek() == Some(&Token::Plus) {
      self.next();
      parts.push(self.atom()?);
    }
    Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::Concat(parts) })
  }

  fn atom(&mut self) -> Result<Expr, SafError> {
    match self.next() {
      Some(Token::Str(text)) => Ok(Expr::Literal(text)),
      Some(Token::Ident(name)) => {
        let mut segments = vec![Segment::Key(name)];
        loop {
          match self.peek() {
            Some(Token::Dot) => {
              self.next();
              match self.next() {
                Some(Token::Ident(key)) => segments.push(match key.parse::<usize>() {
                  Ok(index) => Segment::Index(index),
                  Err(_) => Segment::Key(key),
                }),
                _ => return Err(self.error("expected a name after `.`")),
              }
            },
            Some(Token::Open) => {
              self.next();
              let index = match self.next() {
                Some(Token::Ident(index)) => index.parse::<usize>().map_err(|_| self.error("expected an index"))?,
                _ => return Err(self.error("expected an index")),
              };
              if self.next() != Some(Token::Close) {
                return Err(self.error("expected `]`"));
              }
              segments.push(Segment::Index(index));
            },
            _ => break,
          }
        }
        Ok(Expr::Path(segments))
      },
      Some(token) => Err(self.error(&format!("unexpected {token:?}"))),
      None => Err(self.error("unexpected end")),
    }
  }
}

impl Expr {
  /// Parses an expression.
  ///
  /// # Errors
  ///
  /// Returns [`SafError::Expression`] for empty input, unbalanced brackets, unterminated strings
  /// and trailing tokens.
  pub fn parse(src: &str) -> Result<Self, SafError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { src, tokens, pos: 0 };
    let expr = parser.fallback()?;
    if parser.pos < parser.tokens.len() {
      return Err(parser.error("trailing input"));
    }
    Ok(expr)
  }

  /// Evaluates the expression; unresolvable paths yield `null`.
  pub fn evaluate(&self, scope: &Scope) -> Value {
    match self {
      Expr::Literal(text) => Value::String(text.clone()),
      Expr::Path(segments) => resolve(scope, segments),
      Expr::Concat(parts) => {
        let mut text = String::new();
        for part in parts {
          match model::json_text(&part.evaluate(scope)) {
            Some(piece) => text.push_str(&piece),
            None => return Value::Null,
          }
        }
        Value::String(text)
      },
      Expr::Fallback(alternatives) => alternatives
        .iter()
        .map(|alternative| alternative.evaluate(scope))
        .find(|value| !is_empty(value))
        .unwrap_or(Value::Null),
    }
  }
}

fn resolve(scope: &Scope, segments: &[Segment]) -> Value {
  let Some((Segment::Key(root), rest)) = segments.split_first() else {
    return Value::Null;
  };
  let mut current = match scope.get(root) {
    Some(value) => value,
    None => {
      trace!("unknown variable `{root}`");
      return Value::Null;
    },
  };
  for segment in rest {
    let next = match (segment, current) {
      (Segment::Key(key), Value::Object(map)) => map.get(key),
      (Segment::Index(index), Value::Array(items)) => items.get(*index),
      (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
      _ => None,
    };
    match next {
      Some(value) => current = value,
      None => return Value::Null,
    }
  }
  current.clone()
}

/// Whether a value carries nothing worth exporting: `null`, `""`, `[]` or `{}`.
pub fn is_empty(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::String(s) => s.trim().is_empty(),
    Value::Array(items) => items.is_empty(),
    Value::Object(map) => map.is_empty(),
    _ => false,
  }
}

/// Splits a page range like `12-34` into start and end page.
///
/// Anything that is not exactly two parts separated by `-` yields the input twice.
pub fn split_pages(pages: &Value) -> (Value, Value) {
  if let Some(text) = pages.as_str() {
    let parts: Vec<_> = text.split('-').map(str::trim).collect();
    if let [start, end] = parts.as_slice() {
      if !start.is_empty() && !end.is_empty() {
        return (Value::String(start.to_string()), Value::String(end.to_string()));
      }
    }
  }
  debug!("cannot split pages ({pages}) into start and end");
  (pages.clone(), pages.clone())
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn scope() -> Scope {
    let mut scope = Scope::default();
    scope.insert(
      "publication",
      json!({
        "fullTitle": {"de_DE": "Umweltbelastung durch Bergbau", "en_US": ""},
        "authors": [
          {"givenName": {"de_DE": "Anna"}, "familyName": {"de_DE": "Schmidt"}},
          {"givenName": {"de_DE": "Jonas"}, "familyName": {"de_DE": "Weber"}}
        ],
        "pages": "12-34",
        "subtitle": ""
      }),
    );
    scope.insert("issue", json!({"volume": 21, "year": 2018}));
    scope.insert("language", json!("ger"));
    scope
  }

  #[test]
  fn test_literal() -> anyhow::Result<()> {
    let expr = Expr::parse(r#""Universitäts- und Landesbibliothek""#)?;
    assert_eq!(expr, Expr::Literal("Universitäts- und Landesbibliothek".into()));
    assert_eq!(expr.evaluate(&scope()), json!("Universitäts- und Landesbibliothek"));
    Ok(())
  }

  #[test]
  fn test_paths_and_indices() -> anyhow::Result<()> {
    let scope = scope();
    let value = Expr::parse("publication.fullTitle.de_DE")?.evaluate(&scope);
    assert_eq!(value, json!("Umweltbelastung durch Bergbau"));
    let value = Expr::parse("publication.authors[1].familyName.de_DE")?.evaluate(&scope);
    assert_eq!(value, json!("Weber"));
    let value = Expr::parse("publication.authors.0.givenName")?.evaluate(&scope);
    assert_eq!(value, json!({"de_DE": "Anna"}));
    Ok(())
  }

  #[test]
  fn test_missing_segments_are_null() -> anyhow::Result<()> {
    let scope = scope();
    assert_eq!(Expr::parse("publication.doesNotExist.x")?.evaluate(&scope), Value::Null);
    assert_eq!(Expr::parse("submission.id")?.evaluate(&scope), Value::Null);
    assert_eq!(Expr::parse("publication.authors[7]")?.evaluate(&scope), Value::Null);
    Ok(())
  }

  #[test]
  fn test_fallback_skips_empty_values() -> anyhow::Result<()> {
    let scope = scope();
    let value = Expr::parse("publication.subtitle | publication.missing | issue.year")?.evaluate(&scope);
    assert_eq!(value, json!(2018));
    let value = Expr::parse("publication.subtitle | publication.missing")?.evaluate(&scope);
    assert_eq!(value, Value::Null);
    Ok(())
  }

  #[test]
  fn test_concat() -> anyhow::Result<()> {
    let scope = scope();
    let value = Expr::parse(r#"issue.year + " / " + issue.volume"#)?.evaluate(&scope);
    assert_eq!(value, json!("2018 / 21"));
    let value = Expr::parse(r#"issue.number + "x""#)?.evaluate(&scope);
    assert_eq!(value, Value::Null);
    Ok(())
  }

  #[test]
  fn test_parse_errors() {
    for broken in ["", "publication.", "a[1", "a[x]", "\"open", "a b", "a + ", "a $ b"] {
      assert!(
        matches!(Expr::parse(broken), Err(SafError::Expression(_))),
        "`{broken}` should not parse"
      );
    }
  }

  #[test]
  fn test_split_pages() {
    assert_eq!(split_pages(&json!("12-34")), (json!("12"), json!("34")));
    assert_eq!(split_pages(&json!("12 - 34")), (json!("12"), json!("34")));
    assert_eq!(split_pages(&json!("12")), (json!("12"), json!("12")));
    assert_eq!(split_pages(&json!("1-2-3")), (json!("1-2-3"), json!("1-2-3")));
    assert_eq!(split_pages(&Value::Null), (Value::Null, Value::Null));
  }

  #[test]
  fn test_is_empty() {
    assert!(is_empty(&json!(null)));
    assert!(is_empty(&json!("  ")));
    assert!(is_empty(&json!([])));
    assert!(is_empty(&json!({})));
    assert!(!is_empty(&json!(0)));
    assert!(!is_empty(&json!({"de_DE": ""})));
  }
}
