//! Secret reference syntax.
//!
//! A reference is `{{secrets.<name>}}` or `{{secrets.<name>.<field>}}`
//! where both names match `[A-Za-z0-9_-]+`.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::SecretError;

/// A parsed secret reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
  pub name: String,
  pub field: Option<String>,
}

fn strict_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| {
    Regex::new(r"\{\{\s*secrets\.([A-Za-z0-9_-]+)(?:\.([A-Za-z0-9_-]+))?\s*\}\}")
      .expect("secret reference pattern is valid")
  })
}

// Anything that opens a secrets placeholder, however malformed the rest is.
fn loose_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| {
    Regex::new(r"\{\{\s*secrets\.[^}]*\}\}").expect("loose secret pattern is valid")
  })
}

/// Parse a string that is exactly one reference (ignoring surrounding
/// whitespace inside the braces). Returns `None` for anything else.
pub fn parse_reference(text: &str) -> Option<SecretReference> {
  let pattern = strict_pattern();
  let captures = pattern.captures(text)?;
  let m = captures.get(0)?;
  if m.start() != 0 || m.end() != text.len() {
    return None;
  }
  Some(SecretReference {
    name: captures[1].to_string(),
    field: captures.get(2).map(|m| m.as_str().to_string()),
  })
}

/// Iterate all well-formed references in a string.
pub(crate) fn references_in(text: &str) -> impl Iterator<Item = (std::ops::Range<usize>, SecretReference)> + '_ {
  strict_pattern().captures_iter(text).map(|captures| {
    let m = captures.get(0).expect("capture 0 always present");
    (
      m.range(),
      SecretReference {
        name: captures[1].to_string(),
        field: captures.get(2).map(|c| c.as_str().to_string()),
      },
    )
  })
}

/// Validate every secret reference appearing in a config tree.
///
/// A string leaf that opens a `{{secrets.` placeholder which does not match
/// the reference grammar is rejected. Used at config-validation time so bad
/// syntax fails setup rather than execution.
pub fn validate_references(config: &serde_json::Value) -> Result<(), SecretError> {
  match config {
    serde_json::Value::String(text) => validate_string(text),
    serde_json::Value::Array(items) => items.iter().try_for_each(validate_references),
    serde_json::Value::Object(map) => map.values().try_for_each(validate_references),
    _ => Ok(()),
  }
}

fn validate_string(text: &str) -> Result<(), SecretError> {
  for loose in loose_pattern().find_iter(text) {
    let well_formed = strict_pattern()
      .find_iter(text)
      .any(|strict| strict.range() == loose.range());
    if !well_formed {
      return Err(SecretError::InvalidReference {
        reference: loose.as_str().to_string(),
      });
    }
  }
  Ok(())
}
