#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use streamline_recommender::db::{BatchOutcome, CatalogSource, DocumentStore, LockStore, PredictionStore};
use streamline_recommender::models::{InteractionEvent, InteractionKind, ItemMetadata, PredictionRecord, UserId};
use streamline_recommender::services::artifacts::{ArtifactStore, FsObjectStore};
use streamline_recommender::services::retry::RetryConfig;
use streamline_recommender::AppResult;

pub fn rating(user: UserId, item: &str, value: f64) -> InteractionEvent {
    InteractionEvent::new(user, item, InteractionKind::Rating, Some(value), Some(Utc::now()))
}

pub fn like(user: UserId, item: &str) -> InteractionEvent {
    InteractionEvent::new(user, item, InteractionKind::Like, None, Some(Utc::now()))
}

fn movie(id: &str, genre: &str, director: &str, votes: f64) -> ItemMetadata {
    ItemMetadata {
        title: Some(format!("Movie {}", id)),
        genres: vec![genre.to_string()],
        directors: vec![director.to_string()],
        popularity: Some(votes / 10.0),
        vote_count: Some(votes),
        vote_average: Some(6.5),
        ..ItemMetadata::new(id)
    }
}

pub fn catalog() -> Vec<ItemMetadata> {
    vec![
        movie("m1", "Drama", "Nolan", 100.0),
        movie("m2", "Drama", "Nolan", 200.0),
        movie("m3", "Comedy", "Wright", 300.0),
        movie("m4", "Comedy", "Wright", 400.0),
        movie("m5", "Horror", "Carpenter", 500.0),
        movie("m6", "Horror", "Carpenter", 600.0),
    ]
}

/// Four similar internal users, one heavy internal user and one external user
pub fn interactions() -> Vec<InteractionEvent> {
    let mut events = Vec::new();
    for user in 1..=4 {
        let id = UserId::Internal(user);
        events.push(rating(id.clone(), "m1", 10.0));
        events.push(like(id.clone(), "m1"));
        events.push(rating(id.clone(), "m2", 10.0));
        events.push(like(id.clone(), "m2"));
        events.push(rating(id.clone(), "m3", 3.0));
        if user % 2 == 0 {
            events.push(rating(id.clone(), "m5", 7.0));
        }
    }
    let heavy = UserId::Internal(5);
    for (item, value) in [("m1", 9.0), ("m2", 8.0), ("m3", 4.0), ("m4", 3.0), ("m5", 6.0)] {
        events.push(rating(heavy.clone(), item, value));
    }
    events.push(rating(UserId::external("ana"), "m4", 8.0));
    events.push(rating(UserId::external("ana"), "m6", 2.0));
    events
}

pub struct MemoryCatalog {
    pub events: Vec<InteractionEvent>,
    pub metadata: Vec<ItemMetadata>,
}

impl MemoryCatalog {
    pub fn seeded() -> Self {
        Self {
            events: interactions()
                .into_iter()
                .filter(|e| e.user_id.is_internal())
                .collect(),
            metadata: catalog(),
        }
    }
}

#[async_trait::async_trait]
impl CatalogSource for MemoryCatalog {
    async fn all_interactions(&self) -> AppResult<Vec<InteractionEvent>> {
        Ok(self.events.clone())
    }

    async fn user_interactions(&self, user_id: i64) -> AppResult<Vec<InteractionEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.user_id == UserId::Internal(user_id))
            .cloned()
            .collect())
    }

    async fn items_metadata(&self) -> AppResult<Vec<ItemMetadata>> {
        Ok(self.metadata.clone())
    }
}

/// Prediction table keyed like the relational one
#[derive(Default)]
pub struct MemoryPredictions {
    pub rows: Mutex<HashMap<(i64, String), PredictionRecord>>,
}

#[async_trait::async_trait]
impl PredictionStore for MemoryPredictions {
    async fn upsert(&self, records: Vec<PredictionRecord>) -> AppResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let written = records.len() as u64;
        for record in records {
            if let UserId::Internal(id) = record.user_id {
                rows.insert((id, record.item_id.clone()), record);
            }
        }
        Ok(written)
    }

    async fn find(&self, user_id: i64, item_id: &str) -> AppResult<Option<PredictionRecord>> {
        Ok(self.rows.lock().unwrap().get(&(user_id, item_id.to_string())).cloned())
    }

    async fn last_update(&self, user_id: i64) -> AppResult<Option<DateTime<Utc>>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|((id, _), _)| *id == user_id)
            .map(|(_, record)| record.updated_at)
            .max())
    }
}

#[derive(Default)]
pub struct MemoryDocuments {
    pub docs: Mutex<HashMap<(String, String), PredictionRecord>>,
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocuments {
    async fn upsert_batch(&self, records: Vec<PredictionRecord>) -> AppResult<BatchOutcome> {
        let mut docs = self.docs.lock().unwrap();
        let mut outcome = BatchOutcome::default();
        for record in records {
            let key = (record.user_id.to_string(), record.item_id.clone());
            if docs.insert(key, record).is_some() {
                outcome.updated += 1;
            } else {
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn find(&self, user_handle: &str, item_id: &str) -> AppResult<Option<PredictionRecord>> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .get(&(user_handle.to_string(), item_id.to_string()))
            .cloned())
    }

    async fn last_update(&self, user_handle: &str) -> AppResult<Option<DateTime<Utc>>> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .iter()
            .filter(|((handle, _), _)| handle == user_handle)
            .map(|(_, record)| record.updated_at)
            .max())
    }
}

/// Lock table ignoring expiry
#[derive(Default)]
pub struct MemoryLocks {
    pub held: Mutex<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl LockStore for MemoryLocks {
    async fn try_acquire(&self, key: &str, token: &str, _ttl: Duration) -> AppResult<bool> {
        let mut held = self.held.lock().unwrap();
        if held.contains_key(key) {
            return Ok(false);
        }
        held.insert(key.to_string(), token.to_string());
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> AppResult<bool> {
        let mut held = self.held.lock().unwrap();
        if held.get(key).map(String::as_str) == Some(token) {
            held.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

pub fn artifact_store(dir: &Path) -> Arc<ArtifactStore> {
    Arc::new(ArtifactStore::new(
        Arc::new(FsObjectStore::new(dir.join("remote"))),
        dir.join("cache"),
        Duration::from_secs(3600),
        RetryConfig {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            backoff_multiplier: 1.0,
        },
    ))
}
