//! Strongly-typed identifiers.

use core::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of an authenticated subject, as issued by the identity provider.
///
/// Always non-empty and free of surrounding whitespace. Cloning is cheap; the
/// id is shared between the cache, the identity store and request contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(Arc<str>);

impl SubjectId {
    /// Validate and wrap an identifier.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("SubjectId: must not be empty"));
        }
        Ok(Self(Arc::from(trimmed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SubjectId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SubjectId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SubjectId> for String {
    fn from(value: SubjectId) -> Self {
        value.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_ids() {
        assert!(SubjectId::parse("").is_err());
        assert!(SubjectId::parse("   ").is_err());
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let id: SubjectId = " user-1 ".parse().unwrap();
        assert_eq!(id.as_str(), "user-1");
    }

    #[test]
    fn deserialization_validates() {
        let ok: SubjectId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<SubjectId>("\"\"").is_err());
    }
}
