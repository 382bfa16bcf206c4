use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Flat per-item metadata record used for content features and quality boosts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub item_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub vote_count: Option<f64>,
    #[serde(default)]
    pub original_language: Option<String>,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    /// Runtime in minutes
    #[serde(default)]
    pub runtime: Option<f64>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub directors: Vec<String>,
    #[serde(default)]
    pub writers: Vec<String>,
    /// The two top-billed cast members
    #[serde(default)]
    pub top_cast: Vec<String>,
}

impl ItemMetadata {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            ..Default::default()
        }
    }

    /// Release decade bucket such as "1990s"
    pub fn release_decade(&self) -> Option<String> {
        self.release_date
            .map(|date| format!("{}s", date.year().div_euclid(10) * 10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_decade() {
        let mut item = ItemMetadata::new("m1");
        assert_eq!(item.release_decade(), None);

        item.release_date = NaiveDate::from_ymd_opt(1994, 9, 23);
        assert_eq!(item.release_decade(), Some("1990s".to_string()));

        item.release_date = NaiveDate::from_ymd_opt(2000, 1, 1);
        assert_eq!(item.release_decade(), Some("2000s".to_string()));
    }

    #[test]
    fn test_deserialize_sparse_record() {
        let item: ItemMetadata =
            serde_json::from_str(r#"{"item_id": "m9", "genres": ["Drama"]}"#).unwrap();
        assert_eq!(item.item_id, "m9");
        assert_eq!(item.genres, vec!["Drama".to_string()]);
        assert!(item.popularity.is_none());
    }
}
