use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};

use super::{CatalogSource, PredictionStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    parse_timestamp, InteractionEvent, InteractionKind, ItemMetadata, PredictionRecord, UserId,
};

/// Rows per INSERT statement when upserting predictions
const UPSERT_CHUNK: usize = 1000;

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

#[derive(Debug, sqlx::FromRow)]
struct InteractionRow {
    user_id: i64,
    movie_id: String,
    rating: Option<f64>,
    interaction_type: String,
    created_at: Option<String>,
}

impl InteractionRow {
    /// Unknown interaction types are dropped
    fn into_event(self) -> Option<InteractionEvent> {
        let kind = match self.interaction_type.parse::<InteractionKind>() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!(user_id = self.user_id, movie_id = %self.movie_id, error = %e, "Skipping interaction");
                return None;
            }
        };
        Some(InteractionEvent::new(
            UserId::Internal(self.user_id),
            self.movie_id,
            kind,
            self.rating,
            self.created_at.as_deref().and_then(parse_timestamp),
        ))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MetadataRow {
    movie_id: String,
    title: Option<String>,
    popularity: Option<f64>,
    vote_count: Option<f64>,
    vote_average: Option<f64>,
    original_language: Option<String>,
    release_date: Option<NaiveDate>,
    runtime: Option<f64>,
    genres: Option<Vec<String>>,
    tags: Option<Vec<String>>,
    directors: Option<Vec<String>>,
    writers: Option<Vec<String>>,
    top_cast: Option<Vec<String>>,
}

impl From<MetadataRow> for ItemMetadata {
    fn from(row: MetadataRow) -> Self {
        ItemMetadata {
            item_id: row.movie_id,
            title: row.title,
            popularity: row.popularity,
            vote_average: row.vote_average,
            vote_count: row.vote_count,
            original_language: row.original_language,
            release_date: row.release_date,
            runtime: row.runtime,
            genres: row.genres.unwrap_or_default(),
            tags: row.tags.unwrap_or_default(),
            directors: row.directors.unwrap_or_default(),
            writers: row.writers.unwrap_or_default(),
            top_cast: row.top_cast.unwrap_or_default(),
        }
    }
}

const INTERACTION_COLUMNS: &str = r#"
    SELECT umi.user_id::bigint AS user_id,
           umi.movie_id::text AS movie_id,
           umi.rating::float8 AS rating,
           umi.interaction_type::text AS interaction_type,
           umi.created_at::text AS created_at
    FROM user_movie_interactions umi
    INNER JOIN movies ON umi.movie_id = movies.id
    WHERE umi.active = TRUE
"#;

const METADATA_QUERY: &str = r#"
    SELECT
        m.id::text AS movie_id,
        m.title,
        m.popularity::float8 AS popularity,
        m.vote_count::float8 AS vote_count,
        m.vote_average::float8 AS vote_average,
        m.original_language,
        m.release_date,
        m.runtime::float8 AS runtime,
        (SELECT array_agg(g.name)::text[] FROM movie_genres mg JOIN genres g ON mg.genre_id = g.id
         WHERE mg.movie_id = m.id) AS genres,
        (SELECT array_agg(t.name)::text[] FROM movie_tags mt JOIN tags t ON mt.tag_id = t.id
         WHERE mt.movie_id = m.id) AS tags,
        (SELECT array_agg(c.name)::text[] FROM movie_crew mc JOIN credits c ON mc.credit_id = c.id
         WHERE mc.movie_id = m.id AND mc.job = 'Director') AS directors,
        (SELECT array_agg(c.name)::text[] FROM movie_crew mc JOIN credits c ON mc.credit_id = c.id
         WHERE mc.movie_id = m.id AND mc.job IN ('Writer', 'Screenplay')) AS writers,
        (SELECT array_agg(top.name)::text[] FROM (
            SELECT c.name FROM movie_cast mc JOIN credits c ON mc.credit_id = c.id
            WHERE mc.movie_id = m.id ORDER BY mc.cast_order ASC LIMIT 2
         ) AS top) AS top_cast
    FROM movies m
"#;

/// Catalogue reads against the application database
#[derive(Clone)]
pub struct PgCatalog {
    db_pool: PgPool,
}

impl PgCatalog {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait::async_trait]
impl CatalogSource for PgCatalog {
    async fn all_interactions(&self) -> AppResult<Vec<InteractionEvent>> {
        let rows: Vec<InteractionRow> = sqlx::query_as(INTERACTION_COLUMNS)
            .fetch_all(&self.db_pool)
            .await?;

        tracing::info!(rows = rows.len(), "Loaded interactions");
        Ok(rows.into_iter().filter_map(InteractionRow::into_event).collect())
    }

    async fn user_interactions(&self, user_id: i64) -> AppResult<Vec<InteractionEvent>> {
        let query = format!("{} AND umi.user_id = $1", INTERACTION_COLUMNS);
        let rows: Vec<InteractionRow> = sqlx::query_as(&query)
            .bind(user_id)
            .fetch_all(&self.db_pool)
            .await?;

        Ok(rows.into_iter().filter_map(InteractionRow::into_event).collect())
    }

    async fn items_metadata(&self) -> AppResult<Vec<ItemMetadata>> {
        let rows: Vec<MetadataRow> = sqlx::query_as(METADATA_QUERY)
            .fetch_all(&self.db_pool)
            .await?;

        tracing::info!(items = rows.len(), "Loaded item metadata");
        Ok(rows.into_iter().map(ItemMetadata::from).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PredictionRow {
    user_id: i64,
    movie_id: String,
    predicted_score: f64,
    cf_score: Option<f64>,
    content_score: Option<f64>,
    explanation: Option<serde_json::Value>,
    updated_at: DateTime<Utc>,
}

impl From<PredictionRow> for PredictionRecord {
    fn from(row: PredictionRow) -> Self {
        PredictionRecord {
            user_id: UserId::Internal(row.user_id),
            item_id: row.movie_id,
            predicted_score: row.predicted_score,
            cf_score: row.cf_score,
            content_score: row.content_score,
            explanation: row.explanation,
            updated_at: row.updated_at,
        }
    }
}

/// `user_recommendations` table, one row per (user, movie)
#[derive(Clone)]
pub struct PgPredictionStore {
    db_pool: PgPool,
}

impl PgPredictionStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

fn internal_id(record: &PredictionRecord) -> AppResult<i64> {
    match record.user_id {
        UserId::Internal(id) => Ok(id),
        UserId::External(ref handle) => Err(AppError::InvalidInput(format!(
            "External user {} cannot be stored relationally",
            handle
        ))),
    }
}

#[async_trait::async_trait]
impl PredictionStore for PgPredictionStore {
    async fn upsert(&self, records: Vec<PredictionRecord>) -> AppResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let keyed = records
            .iter()
            .map(|record| internal_id(record).map(|id| (id, record)))
            .collect::<AppResult<Vec<_>>>()?;

        let mut tx = self.db_pool.begin().await?;
        let mut written = 0;

        for chunk in keyed.chunks(UPSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO user_recommendations \
                 (user_id, movie_id, predicted_score, cf_score, content_score, explanation, updated_at) ",
            );
            builder.push_values(chunk, |mut row, (user_id, record)| {
                row.push_bind(*user_id)
                    .push_bind(record.item_id.clone())
                    .push_bind(record.predicted_score)
                    .push_bind(record.cf_score)
                    .push_bind(record.content_score)
                    .push_bind(record.explanation.clone())
                    .push_bind(record.updated_at);
            });
            builder.push(
                " ON CONFLICT (user_id, movie_id) DO UPDATE SET \
                 predicted_score = EXCLUDED.predicted_score, \
                 cf_score = EXCLUDED.cf_score, \
                 content_score = EXCLUDED.content_score, \
                 explanation = EXCLUDED.explanation, \
                 updated_at = EXCLUDED.updated_at",
            );

            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        tracing::info!(rows = written, "Upserted internal predictions");
        Ok(written)
    }

    async fn find(&self, user_id: i64, item_id: &str) -> AppResult<Option<PredictionRecord>> {
        let row: Option<PredictionRow> = sqlx::query_as(
            r#"
            SELECT user_id::bigint AS user_id, movie_id::text AS movie_id, predicted_score,
                   cf_score, content_score, explanation, updated_at::timestamptz AS updated_at
            FROM user_recommendations
            WHERE user_id = $1 AND movie_id = $2
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.map(PredictionRecord::from))
    }

    async fn last_update(&self, user_id: i64) -> AppResult<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(updated_at)::timestamptz FROM user_recommendations WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(last)
    }
}
