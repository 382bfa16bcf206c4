use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// One term's contribution to a content match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub score: f64,
}

/// Content-based score for a (user, item) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentScore {
    pub user_id: UserId,
    pub item_id: String,
    pub content_score: f64,
    /// Only computed for the user's top-N items
    pub explanation: Option<Vec<FeatureContribution>>,
}

/// Collaborative filtering score for a (user, item) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfScore {
    pub user_id: UserId,
    pub item_id: String,
    pub cf_score: f64,
}

/// Blended, quality-adjusted score for a (user, item) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridScore {
    pub user_id: UserId,
    pub item_id: String,
    pub content_score: Option<f64>,
    pub cf_score: Option<f64>,
    pub raw_final_score: f64,
    pub popularity_score: f64,
    pub rating_score: f64,
    /// `final_score` as produced by the quality boost, before any
    /// per-user re-normalisation
    pub boosted_score: f64,
    pub final_score: f64,
    pub explanation: Option<Vec<FeatureContribution>>,
}

impl HybridScore {
    /// Creates a row holding only the raw signals; derived scores start at 0
    pub fn from_signals(
        user_id: UserId,
        item_id: String,
        content_score: Option<f64>,
        cf_score: Option<f64>,
        explanation: Option<Vec<FeatureContribution>>,
    ) -> Self {
        Self {
            user_id,
            item_id,
            content_score,
            cf_score,
            raw_final_score: 0.0,
            popularity_score: 0.0,
            rating_score: 0.0,
            boosted_score: 0.0,
            final_score: 0.0,
            explanation,
        }
    }
}

/// Non-personalised fallback ranking entry, keyed by item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecommendation {
    pub item_id: String,
    pub content_score: f64,
}

/// A persisted prediction as read back from either store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub user_id: UserId,
    pub item_id: String,
    pub predicted_score: f64,
    pub cf_score: Option<f64>,
    pub content_score: Option<f64>,
    pub explanation: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}
