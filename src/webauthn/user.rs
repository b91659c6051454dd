//! User identity handles

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::CeremonyError;

static HANDLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9._@-]{1,64}$").expect("handle pattern is valid"));

/// Normalized, immutable identifier of a principal
///
/// Surrounding whitespace is trimmed and ASCII letters are lowercased, so
/// `" Alice "` and `"alice"` name the same user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserHandle(String);

impl UserHandle {
    /// Normalize and validate a user-supplied name
    ///
    /// # Errors
    /// Returns `CeremonyError::InvalidUserHandle` if the normalized name is
    /// empty, longer than 64 characters, or contains characters outside
    /// `[a-z0-9._@-]`.
    pub fn parse(raw: &str) -> Result<Self, CeremonyError> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(CeremonyError::InvalidUserHandle(
                "username required".to_string(),
            ));
        }
        if !HANDLE_PATTERN.is_match(&normalized) {
            return Err(CeremonyError::InvalidUserHandle(format!(
                "'{normalized}' is not a valid username"
            )));
        }
        Ok(Self(normalized))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserHandle {
    type Error = CeremonyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserHandle> for String {
    fn from(handle: UserHandle) -> Self {
        handle.0
    }
}
