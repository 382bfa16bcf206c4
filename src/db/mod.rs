use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::error::AppResult;
use crate::models::{InteractionEvent, ItemMetadata, PredictionRecord};

pub mod postgres;
pub mod redis;

pub use postgres::{create_pool, PgCatalog, PgPredictionStore};
pub use redis::{create_redis_client, RedisDocumentStore, RedisKey, RedisLockStore};

/// Read side of the relational catalogue
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    /// Every active interaction of every internal user
    async fn all_interactions(&self) -> AppResult<Vec<InteractionEvent>>;

    /// Active interactions of one internal user
    async fn user_interactions(&self, user_id: i64) -> AppResult<Vec<InteractionEvent>>;

    async fn items_metadata(&self) -> AppResult<Vec<ItemMetadata>>;
}

/// Relational prediction table for internal users
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PredictionStore: Send + Sync {
    /// Inserts or replaces rows keyed by (user, item), returning rows written
    async fn upsert(&self, records: Vec<PredictionRecord>) -> AppResult<u64>;

    async fn find(&self, user_id: i64, item_id: &str) -> AppResult<Option<PredictionRecord>>;

    /// Most recent `updated_at` over the user's rows
    async fn last_update(&self, user_id: i64) -> AppResult<Option<DateTime<Utc>>>;
}

/// Counts reported by one document store batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub inserted: u64,
    pub updated: u64,
}

impl std::ops::AddAssign for BatchOutcome {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// Document store for external users, keyed by their prefixed handle
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert_batch(&self, records: Vec<PredictionRecord>) -> AppResult<BatchOutcome>;

    async fn find(&self, user_handle: &str, item_id: &str) -> AppResult<Option<PredictionRecord>>;

    async fn last_update(&self, user_handle: &str) -> AppResult<Option<DateTime<Utc>>>;
}

/// Expiring exclusive locks identified by a key and an owner token
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LockStore: Send + Sync {
    /// Takes the lock if nobody holds it; `false` when it is already held
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> AppResult<bool>;

    /// Releases the lock only if `token` still owns it
    async fn release(&self, key: &str, token: &str) -> AppResult<bool>;
}
