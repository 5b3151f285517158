//! Validation and normalisation of user-supplied run tags.
//!
//! Tags arrive as `key:value` or a bare `key` (value `true`). A set is accepted
//! or rejected as a whole.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keys that collide with pagination parameters or the synthetic verdict filter.
pub const RESERVED_TAG_KEYS: [&str; 3] = ["limit", "offset", "verdict"];

lazy_static! {
    static ref TAG_KEY: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9_.-]{0,49}$").unwrap();
    static ref TAG_VALUE: Regex = Regex::new(r"^[a-zA-Z0-9_./\s-]{1,100}$").unwrap();
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("'{key}' is a reserved keyword and cannot be used as a tag key")]
    Reserved { key: String },

    #[error(
        "Invalid tag key '{key}'. Must start with a letter, and be 1-50 characters long. \
         Allowed characters: letters, numbers, '_', '-', '.'"
    )]
    InvalidKey { key: String },

    #[error(
        "Invalid tag value '{value}'. Must be 1-100 characters long. \
         Allowed characters: letters, numbers, spaces, '_', '-', '.', '/'"
    )]
    InvalidValue { key: String, value: String },

    #[error("Duplicate tag key: '{key}' (case-insensitive)")]
    DuplicateKey { key: String },
}

/// Validated tags in submission order, keys in their submitted case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTags(Vec<(String, String)>);

impl NormalizedTags {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Case-insensitive key lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

pub fn validate_and_normalize_tags<S: AsRef<str>>(raw: &[S]) -> Result<NormalizedTags, TagError> {
    let mut out: Vec<(String, String)> = Vec::with_capacity(raw.len());

    for tag in raw {
        let (key, value) = split_tag(tag.as_ref());
        let key_lower = key.to_lowercase();

        if RESERVED_TAG_KEYS.contains(&key_lower.as_str()) {
            return Err(TagError::Reserved { key: key.into() });
        }
        if !TAG_KEY.is_match(key) {
            return Err(TagError::InvalidKey { key: key.into() });
        }
        if !TAG_VALUE.is_match(value) {
            return Err(TagError::InvalidValue {
                key: key.into(),
                value: value.into(),
            });
        }
        if out.iter().any(|(k, _)| k.to_lowercase() == key_lower) {
            return Err(TagError::DuplicateKey { key: key.into() });
        }

        out.push((key.to_string(), value.to_string()));
    }

    Ok(NormalizedTags(out))
}

fn split_tag(tag: &str) -> (&str, &str) {
    match tag.split_once(':') {
        Some((k, v)) => (k.trim(), v.trim()),
        None => (tag.trim(), "true"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_key_gets_true() {
        let tags = validate_and_normalize_tags(&["env:prod", "smoke"]).unwrap();
        let pairs: Vec<_> = tags.iter().collect();
        assert_eq!(pairs, vec![("env", "prod"), ("smoke", "true")]);
    }

    #[test]
    fn test_duplicate_keys_ignore_case() {
        let err = validate_and_normalize_tags(&["Env:Prod", "env:staging"]).unwrap_err();
        assert_eq!(
            err,
            TagError::DuplicateKey {
                key: "env".into()
            }
        );
    }

    #[test]
    fn test_reserved_keys_rejected() {
        for raw in ["limit:5", "OFFSET:1", "Verdict:pass"] {
            let err = validate_and_normalize_tags(&[raw]).unwrap_err();
            assert!(matches!(err, TagError::Reserved { .. }), "{raw}: {err}");
        }
    }

    #[test]
    fn test_key_syntax() {
        assert!(validate_and_normalize_tags(&["1env:x"]).is_err());
        assert!(validate_and_normalize_tags(&[":x"]).is_err());
        assert!(validate_and_normalize_tags(&["env space:x"]).is_err());
        assert!(validate_and_normalize_tags(&[format!("k{}", "a".repeat(49))]).is_ok());
        assert!(validate_and_normalize_tags(&[format!("k{}", "a".repeat(50))]).is_err());
        assert!(validate_and_normalize_tags(&["release_v1.0-rc"]).is_ok());
    }

    #[test]
    fn test_value_syntax() {
        assert!(validate_and_normalize_tags(&["branch:feature/login fix"]).is_ok());
        assert!(validate_and_normalize_tags(&["env:"]).is_err());
        assert!(validate_and_normalize_tags(&["env:prod!"]).is_err());
        assert!(validate_and_normalize_tags(&[format!("env:{}", "v".repeat(100))]).is_ok());
        assert!(validate_and_normalize_tags(&[format!("env:{}", "v".repeat(101))]).is_err());
    }

    #[test]
    fn test_value_may_contain_colons_after_first() {
        // only the first ':' separates key and value; ':' is not a legal value char
        let err = validate_and_normalize_tags(&["url:a:b"]).unwrap_err();
        assert!(matches!(err, TagError::InvalidValue { .. }));
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let tags = validate_and_normalize_tags(&["  env : prod  "]).unwrap();
        assert_eq!(tags.get("ENV"), Some("prod"));
    }

    #[test]
    fn test_one_bad_tag_rejects_the_set() {
        assert!(validate_and_normalize_tags(&["env:prod", "bad key"]).is_err());
    }
}
