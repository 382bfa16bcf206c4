use serde::{Deserialize, Serialize};
use std::{convert::Infallible, fmt::Display, str::FromStr};

/// Prefix carried by every externally imported user handle
pub const EXTERNAL_USER_PREFIX: &str = "lb_";

/// Identifier for a user, tagged by namespace at ingestion time
///
/// Internal users come from the relational store and have numeric ids.
/// External users come from the imported interaction dataset and keep their
/// prefixed handle (e.g. "lb_someone"). Persistence routing matches on the
/// variant instead of inspecting the string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum UserId {
    Internal(i64),
    External(String),
}

impl UserId {
    /// Classifies a raw identifier: all-digit strings are internal users,
    /// anything else is treated as an external handle
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = trimmed.parse::<i64>() {
                return UserId::Internal(id);
            }
        }
        UserId::External(trimmed.to_string())
    }

    /// Builds an external id from an imported username, adding the prefix
    pub fn external(handle: &str) -> Self {
        if handle.starts_with(EXTERNAL_USER_PREFIX) {
            UserId::External(handle.to_string())
        } else {
            UserId::External(format!("{}{}", EXTERNAL_USER_PREFIX, handle))
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, UserId::Internal(_))
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserId::Internal(id) => write!(f, "{}", id),
            UserId::External(handle) => write!(f, "{}", handle),
        }
    }
}

impl FromStr for UserId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(UserId::parse(s))
    }
}

impl From<String> for UserId {
    fn from(raw: String) -> Self {
        UserId::parse(&raw)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_is_internal() {
        assert_eq!(UserId::parse("42"), UserId::Internal(42));
        assert_eq!(UserId::parse(" 7 "), UserId::Internal(7));
    }

    #[test]
    fn test_parse_prefixed_is_external() {
        assert_eq!(
            UserId::parse("lb_cinephile"),
            UserId::External("lb_cinephile".to_string())
        );
    }

    #[test]
    fn test_parse_mixed_is_external() {
        assert!(!UserId::parse("12ab").is_internal());
        assert!(!UserId::parse("").is_internal());
        assert!(!UserId::parse("-3").is_internal());
    }

    #[test]
    fn test_external_adds_prefix_once() {
        assert_eq!(UserId::external("ana").to_string(), "lb_ana");
        assert_eq!(UserId::external("lb_ana").to_string(), "lb_ana");
    }

    #[test]
    fn test_serialization_round_trips_as_string() {
        let internal = serde_json::to_string(&UserId::Internal(9)).unwrap();
        assert_eq!(internal, "\"9\"");

        let external: UserId = serde_json::from_str("\"lb_x\"").unwrap();
        assert_eq!(external, UserId::External("lb_x".to_string()));
    }
}
