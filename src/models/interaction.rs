use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use super::UserId;

/// Kind of interaction a user had with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InteractionKind {
    Rating,
    Like,
    Watched,
    Review,
}

impl InteractionKind {
    /// Static contribution of an interaction before time decay
    ///
    /// Ratings are on a 0-10 scale and recentred around 5. A rating event
    /// without a value contributes nothing.
    pub fn base_weight(&self, rating: Option<f64>) -> f64 {
        match self {
            InteractionKind::Rating => rating.map(|r| r - 5.0).unwrap_or(0.0),
            InteractionKind::Like => 2.0,
            InteractionKind::Watched => 1.0,
            InteractionKind::Review => 1.2,
        }
    }
}

impl Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InteractionKind::Rating => "RATING",
            InteractionKind::Like => "LIKE",
            InteractionKind::Watched => "WATCHED",
            InteractionKind::Review => "REVIEW",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for InteractionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RATING" => Ok(InteractionKind::Rating),
            "LIKE" => Ok(InteractionKind::Like),
            "WATCHED" => Ok(InteractionKind::Watched),
            "REVIEW" => Ok(InteractionKind::Review),
            other => Err(format!("unknown interaction kind: {}", other)),
        }
    }
}

/// A raw interaction event, internal or imported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub user_id: UserId,
    pub item_id: String,
    pub kind: InteractionKind,
    /// Present only for `Rating` events
    #[serde(default)]
    pub rating: Option<f64>,
    /// `None` when the source timestamp was missing or unparseable
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl InteractionEvent {
    pub fn new(
        user_id: UserId,
        item_id: impl Into<String>,
        kind: InteractionKind,
        rating: Option<f64>,
        occurred_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            user_id,
            item_id: item_id.into(),
            kind,
            rating,
            occurred_at,
        }
    }
}

/// Time-decayed score for one (user, item) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedScore {
    pub user_id: UserId,
    pub item_id: String,
    /// Sum of decayed per-event contributions
    pub raw_score: f64,
    /// `raw_score` minus the mean raw score of the user's rows
    pub centered_score: f64,
}

/// Parses a source timestamp leniently
///
/// Accepts RFC 3339 strings and naive `YYYY-MM-DD HH:MM:SS[.f]` values, which
/// are taken to be UTC. Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    // Postgres renders timestamptz as "2024-01-02 03:04:05.123+00"
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_base_weights() {
        assert_eq!(InteractionKind::Rating.base_weight(Some(8.0)), 3.0);
        assert_eq!(InteractionKind::Rating.base_weight(Some(2.0)), -3.0);
        assert_eq!(InteractionKind::Rating.base_weight(None), 0.0);
        assert_eq!(InteractionKind::Like.base_weight(None), 2.0);
        assert_eq!(InteractionKind::Watched.base_weight(None), 1.0);
        assert_eq!(InteractionKind::Review.base_weight(None), 1.2);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("rating".parse::<InteractionKind>(), Ok(InteractionKind::Rating));
        assert_eq!("WATCHED".parse::<InteractionKind>(), Ok(InteractionKind::Watched));
        assert!("SHARE".parse::<InteractionKind>().is_err());
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&InteractionKind::Review).unwrap();
        assert_eq!(json, "\"REVIEW\"");
    }

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T12:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T14:30:00+02:00"), Some(expected));
    }

    #[test]
    fn test_parse_timestamp_postgres_text() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01 12:30:00+00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01 12:30:00"), Some(expected));
    }

    #[test]
    fn test_parse_timestamp_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
