use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client};
use std::collections::BTreeMap;

use super::RedisKey;
use crate::db::{BatchOutcome, DocumentStore};
use crate::error::{AppError, AppResult};
use crate::models::{parse_timestamp, PredictionRecord};

/// Prediction documents for external users
///
/// Each user owns one hash (`recs:{handle}`) mapping item id to the JSON
/// record, plus a marker key holding the time of the latest write.
#[derive(Clone)]
pub struct RedisDocumentStore {
    redis_client: Client,
}

impl RedisDocumentStore {
    pub fn new(redis_client: Client) -> Self {
        Self { redis_client }
    }
}

/// Groups records by user handle, serialising each one
fn documents_by_user(
    records: &[PredictionRecord],
) -> AppResult<BTreeMap<String, (Vec<(String, String)>, DateTime<Utc>)>> {
    let mut grouped: BTreeMap<String, (Vec<(String, String)>, DateTime<Utc>)> = BTreeMap::new();
    for record in records {
        if record.user_id.is_internal() {
            return Err(AppError::InvalidInput(format!(
                "Internal user {} belongs in the relational store",
                record.user_id
            )));
        }
        let document = serde_json::to_string(record)?;
        let entry = grouped
            .entry(record.user_id.to_string())
            .or_insert_with(|| (Vec::new(), record.updated_at));
        entry.0.push((record.item_id.clone(), document));
        entry.1 = entry.1.max(record.updated_at);
    }
    Ok(grouped)
}

#[async_trait::async_trait]
impl DocumentStore for RedisDocumentStore {
    async fn upsert_batch(&self, records: Vec<PredictionRecord>) -> AppResult<BatchOutcome> {
        let grouped = documents_by_user(&records)?;
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let mut outcome = BatchOutcome::default();

        for (handle, (fields, updated_at)) in grouped {
            let written = fields.len() as u64;
            let inserted: u64 = redis::cmd("HSET")
                .arg(RedisKey::Recommendations(handle.clone()).to_string())
                .arg(&fields)
                .query_async(&mut conn)
                .await?;
            let _: () = conn
                .set(
                    RedisKey::RecommendationsUpdatedAt(handle).to_string(),
                    updated_at.to_rfc3339(),
                )
                .await?;

            outcome += BatchOutcome {
                inserted,
                updated: written.saturating_sub(inserted),
            };
        }

        Ok(outcome)
    }

    async fn find(&self, user_handle: &str, item_id: &str) -> AppResult<Option<PredictionRecord>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let document: Option<String> = conn
            .hget(RedisKey::Recommendations(user_handle.to_string()).to_string(), item_id)
            .await?;

        match document {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn last_update(&self, user_handle: &str) -> AppResult<Option<DateTime<Utc>>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let marker: Option<String> = conn
            .get(RedisKey::RecommendationsUpdatedAt(user_handle.to_string()).to_string())
            .await?;

        Ok(marker.as_deref().and_then(parse_timestamp))
    }
}
