use serde::Serialize;
use std::sync::Arc;

use super::artifacts::{ArtifactKey, ArtifactStore, ItemFeatureMatrix};
use super::content::{tfidf::TfidfVectorizer, ContentModel, SimilarItem};
use super::sink::PredictionSink;
use crate::error::{AppError, AppResult};
use crate::models::{BaselineRecommendation, PredictionRecord, UserId};

/// Answer to a single (user, movie) lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Recommendation {
    /// Stored prediction for this user
    Personalized(PredictionRecord),
    /// Popular-by-content fallback shared by every user
    Baseline(BaselineRecommendation),
}

/// Read side over persisted predictions and published artifacts
pub struct RecommendationService {
    sink: Arc<PredictionSink>,
    artifacts: Arc<ArtifactStore>,
}

impl RecommendationService {
    pub fn new(sink: Arc<PredictionSink>, artifacts: Arc<ArtifactStore>) -> Self {
        Self { sink, artifacts }
    }

    /// Personalized prediction if one is stored, otherwise the baseline entry
    pub async fn lookup(&self, user_id: &UserId, item_id: &str) -> AppResult<Recommendation> {
        if let Some(record) = self.sink.find(user_id, item_id).await? {
            return Ok(Recommendation::Personalized(record));
        }

        let baseline: Vec<BaselineRecommendation> = self
            .artifacts
            .load(ArtifactKey::BaselineRecommendations, false)
            .await?;

        match baseline.into_iter().find(|b| b.item_id == item_id) {
            Some(entry) => {
                tracing::debug!(user_id = %user_id, item_id, "Serving baseline recommendation");
                Ok(Recommendation::Baseline(entry))
            }
            None => Err(AppError::NotFound(format!(
                "No recommendation for user {} and movie {}",
                user_id, item_id
            ))),
        }
    }

    pub async fn similar_items(&self, item_id: &str, limit: usize) -> AppResult<Vec<SimilarItem>> {
        let vectorizer: TfidfVectorizer = self.artifacts.load(ArtifactKey::TfidfVectorizer, false).await?;
        let features: ItemFeatureMatrix = self.artifacts.load(ArtifactKey::ItemFeatures, false).await?;

        let model = ContentModel::from_parts(vectorizer, features.matrix, features.items)?;
        model.similar_items(item_id, limit)
    }
}
