//! Identifier and text normalization.
//!
//! Every key that reaches the index, the snapshot store or the queue passes
//! through [`normalize_uri`], so `"Jane Doe"`, `"jane-doe"` and `" JANE_DOE "`
//! all address the same entity.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::ValidationError;

/// Separator used between uri tokens.
pub const URI_DELIMITER: char = '-';

/// Search tokens shorter than this are discarded.
pub const MIN_TOKEN_CHARS: usize = 4;

/// Decomposes, lowercases and drops combining marks (`"Müller"` -> `"muller"`).
///
/// Lowercasing runs after NFKD because compatibility decompositions can
/// produce uppercase letters (`"㎒"` -> `"MHz"`).
fn fold(input: &str) -> impl Iterator<Item = char> + '_ {
    input
        .trim()
        .nfkd()
        .flat_map(char::to_lowercase)
        .filter(|c| !is_combining_mark(*c))
}

/// Normalizes a uri-like string into a canonical key.
///
/// Keys only hold `[a-z0-9]`: every run of other characters collapses to a
/// single `-`, and the result never starts or ends with the delimiter.
/// Applying it twice yields the same key.
///
/// ```
/// use wealthdex::uri::normalize_uri;
///
/// assert_eq!(normalize_uri("  Jane  Doe & Family "), "jane-doe-family");
/// assert_eq!(normalize_uri("jane-doe-family"), "jane-doe-family");
/// ```
#[must_use]
pub fn normalize_uri(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_delimiter = false;
    for c in fold(input) {
        if c.is_ascii_alphanumeric() {
            if pending_delimiter && !out.is_empty() {
                out.push(URI_DELIMITER);
            }
            pending_delimiter = false;
            out.push(c);
        } else {
            pending_delimiter = true;
        }
    }
    out
}

/// Like [`normalize_uri`] but rejects input that normalizes to nothing.
pub fn canonical_uri(input: &str) -> Result<String, ValidationError> {
    let uri = normalize_uri(input);
    if uri.is_empty() {
        return Err(ValidationError::InvalidUri {
            value: input.to_string(),
        });
    }
    Ok(uri)
}

/// Reverses the hyphen-delimited tokens of a uri (`jane-doe` -> `doe-jane`).
#[must_use]
pub fn reverse_tokens(uri: &str) -> String {
    let mut parts: Vec<&str> = uri.split(URI_DELIMITER).filter(|p| !p.is_empty()).collect();
    parts.reverse();
    parts.join("-")
}

/// Splits free text into search tokens.
///
/// Tokens are `[a-z0-9]` only, at least [`MIN_TOKEN_CHARS`] long,
/// unique and sorted, so the result does not depend on word order.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let folded: String = fold(text).collect();
    folded
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn date_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d{4})-?(\d{2})-?(\d{2})(?:$|[T\s])").ok())
        .as_ref()
}

/// Normalizes a date-like string to the `YYYY-MM-DD` key used on disk.
///
/// Accepts `2024-03-01`, `20240301`, `2024-03-01T10:00:00Z` and
/// `2024-03-01 10:00:00`.
pub fn normalize_date(input: &str) -> Result<String, ValidationError> {
    let invalid = || ValidationError::InvalidDate {
        value: input.to_string(),
    };
    let trimmed = input.trim();
    let caps = date_pattern()
        .and_then(|pattern| pattern.captures(trimmed))
        .ok_or_else(invalid)?;
    let year: i32 = caps[1].parse().map_err(|_| invalid())?;
    let month: u32 = caps[2].parse().map_err(|_| invalid())?;
    let day: u32 = caps[3].parse().map_err(|_| invalid())?;
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;
    Ok(date_key(date))
}

/// Formats a calendar date as a snapshot key.
#[must_use]
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Stable identity of a real-world person, independent of their uri.
///
/// Derived from the provider's natural identifier with blake3 so that two
/// records about the same person compare equal even when their slugs differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityHash(String);

impl IdentityHash {
    /// Hashes a provider-assigned natural identifier.
    #[must_use]
    pub fn from_natural_id(natural_id: &str) -> Self {
        let digest = blake3::hash(natural_id.trim().as_bytes());
        Self(digest.to_hex()[..32].to_string())
    }

    /// Wraps an already-derived hash value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The hash as hex text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityHash {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
