use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::retry::{with_retry, RetryConfig};
use super::scheduler::RecommendationHistory;
use crate::db::{BatchOutcome, DocumentStore, PredictionStore};
use crate::error::AppResult;
use crate::models::{FeatureContribution, HybridScore, PredictionRecord, UserId};

/// Features quoted in the explanation summary
const SUMMARY_FEATURES: usize = 3;

#[derive(Debug, Clone)]
pub struct SinkSettings {
    /// Rows per document store batch
    pub batch_size: usize,
    /// Concurrent document store batches
    pub max_workers: usize,
    /// Applied to each document store batch before it counts as failed
    pub retry: RetryConfig,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            max_workers: 8,
            retry: RetryConfig::default(),
        }
    }
}

/// What one `store` call wrote
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SinkReport {
    pub internal_rows: u64,
    pub external: BatchOutcome,
    pub failed_batches: usize,
}

/// Persists final scores, routing each row by the kind of user it belongs to
///
/// Internal users go to the relational prediction table, external users to
/// the document store in concurrent batches.
pub struct PredictionSink {
    predictions: Arc<dyn PredictionStore>,
    documents: Arc<dyn DocumentStore>,
    settings: SinkSettings,
}

impl PredictionSink {
    pub fn new(
        predictions: Arc<dyn PredictionStore>,
        documents: Arc<dyn DocumentStore>,
        settings: SinkSettings,
    ) -> Self {
        Self {
            predictions,
            documents,
            settings,
        }
    }

    pub async fn store(&self, rows: &[HybridScore]) -> AppResult<SinkReport> {
        let start = std::time::Instant::now();
        let now = Utc::now();
        let (internal, external): (Vec<PredictionRecord>, Vec<PredictionRecord>) = rows
            .iter()
            .map(|row| to_record(row, now))
            .partition(|record| record.user_id.is_internal());

        let mut report = SinkReport {
            internal_rows: self.predictions.upsert(internal).await?,
            ..SinkReport::default()
        };

        if !external.is_empty() {
            let (outcome, failed) = self.store_external(external).await;
            report.external = outcome;
            report.failed_batches = failed;
        }

        tracing::info!(
            internal_rows = report.internal_rows,
            inserted = report.external.inserted,
            updated = report.external.updated,
            failed_batches = report.failed_batches,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Stored predictions"
        );
        Ok(report)
    }

    /// Runs every batch on a bounded set of workers, counting failed batches
    async fn store_external(&self, records: Vec<PredictionRecord>) -> (BatchOutcome, usize) {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut failed = 0;

        for batch in records.chunks(self.settings.batch_size.max(1)) {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(error = %e, "Worker pool closed");
                    failed += 1;
                    continue;
                }
            };
            let documents = Arc::clone(&self.documents);
            let retry = self.settings.retry.clone();
            let batch = batch.to_vec();
            tasks.spawn(async move {
                let _permit = permit;
                with_retry(&retry, "document batch upsert", || documents.upsert_batch(batch.clone())).await
            });
        }

        let mut total = BatchOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => total += outcome,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Document batch failed");
                    failed += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Document batch task panicked");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            tracing::warn!(error_count = failed, "Some document batches failed");
        }
        (total, failed)
    }

    /// Stored prediction for one (user, item) pair
    pub async fn find(&self, user_id: &UserId, item_id: &str) -> AppResult<Option<PredictionRecord>> {
        match user_id {
            UserId::Internal(id) => self.predictions.find(*id, item_id).await,
            UserId::External(handle) => self.documents.find(handle, item_id).await,
        }
    }
}

#[async_trait::async_trait]
impl RecommendationHistory for PredictionSink {
    async fn last_update(&self, user_id: &UserId) -> AppResult<Option<DateTime<Utc>>> {
        match user_id {
            UserId::Internal(id) => self.predictions.last_update(*id).await,
            UserId::External(handle) => self.documents.last_update(handle).await,
        }
    }
}

fn round9(value: f64) -> f64 {
    (value * 1e9).round() / 1e9
}

/// Converts a final score row into its persisted shape
pub fn to_record(row: &HybridScore, updated_at: DateTime<Utc>) -> PredictionRecord {
    PredictionRecord {
        user_id: row.user_id.clone(),
        item_id: row.item_id.clone(),
        predicted_score: round9(row.final_score),
        cf_score: row.cf_score.map(round9),
        content_score: row.content_score.map(round9),
        explanation: build_explanation(row.cf_score, row.explanation.as_deref()),
        updated_at,
    }
}

/// Human readable reasons for a recommendation
///
/// Only rows with content feature contributions get an explanation.
pub fn build_explanation(cf_score: Option<f64>, features: Option<&[FeatureContribution]>) -> Option<Value> {
    let features = features.filter(|f| !f.is_empty())?;

    let cf_message = match cf_score {
        Some(score) => format!(
            "Based on collaborative filtering, similar users liked this movie (score: {:.2})",
            score
        ),
        None => "Collaborative filtering data was not available; recommendation is based on movie features"
            .to_string(),
    };

    let summary = format!(
        "Based on your preference for: {}",
        features
            .iter()
            .take(SUMMARY_FEATURES)
            .map(|f| f.feature.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Some(json!({
        "cf": cf_message,
        "content": {
            "summary": summary,
            "top_features": features,
        }
    }))
}
