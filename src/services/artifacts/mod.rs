use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::collaborative::{validate_item_factors, ItemFactors};
use super::content::{tfidf::TfidfVectorizer, ContentModel};
use super::ratings_matrix::IdLookup;
use super::retry::{with_retry, RetryConfig};
use super::sparse::SparseMatrix;
use crate::error::{AppError, AppResult};
use crate::models::{BaselineRecommendation, InteractionEvent, ItemMetadata};

pub mod object_store;

pub use object_store::{BlobHttpStore, FsObjectStore, ObjectStore};

/// Artifacts shared between full-batch training and per-user generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKey {
    TfidfVectorizer,
    /// TF-IDF item rows plus their item lookup
    ItemFeatures,
    /// CF item factors plus their item lookup
    ItemFactors,
    BaselineRecommendations,
    ItemMetadata,
    ExternalInteractions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Json,
    Bincode,
}

impl ArtifactKey {
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKey::TfidfVectorizer => "tfidf_vectorizer.json",
            ArtifactKey::ItemFeatures => "item_feature_matrix.bin",
            ArtifactKey::ItemFactors => "movie_features.bin",
            ArtifactKey::BaselineRecommendations => "baseline_recommendations.json",
            ArtifactKey::ItemMetadata => "movies_metadata.json",
            ArtifactKey::ExternalInteractions => "external_interactions.json",
        }
    }

    fn codec(&self) -> Codec {
        match self {
            ArtifactKey::ItemFeatures | ArtifactKey::ItemFactors => Codec::Bincode,
            _ => Codec::Json,
        }
    }

    fn encode<T: Serialize>(&self, value: &T) -> AppResult<Vec<u8>> {
        Ok(match self.codec() {
            Codec::Json => serde_json::to_vec(value)?,
            Codec::Bincode => bincode::serialize(value)?,
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> AppResult<T> {
        let decoded = match self.codec() {
            Codec::Json => serde_json::from_slice(bytes).map_err(AppError::from),
            Codec::Bincode => bincode::deserialize(bytes).map_err(AppError::from),
        };
        decoded.map_err(|e| AppError::Artifact(format!("Unreadable {}: {}", self.file_name(), e)))
    }
}

impl Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// Remote folder an artifact is written under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactVersion {
    Latest,
    Dated(NaiveDate),
}

impl ArtifactVersion {
    pub fn path_for(&self, key: ArtifactKey) -> String {
        format!("{}/{}", self, key.file_name())
    }
}

impl Display for ArtifactVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactVersion::Latest => write!(f, "latest"),
            ArtifactVersion::Dated(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

/// Result of pushing one artifact to the remote store
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Uploaded { path: String },
    Failed { path: String, reason: String },
}

impl UploadOutcome {
    pub fn is_uploaded(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded { .. })
    }
}

/// Whether the file at `path` is older than `ttl` at `now`
///
/// Missing or unreadable files count as stale.
pub fn is_stale(path: &Path, ttl: Duration, now: SystemTime) -> bool {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return true,
    };
    match now.duration_since(modified) {
        Ok(age) => age > ttl,
        Err(_) => false,
    }
}

/// Versioned artifact storage with a local read-through cache
pub struct ArtifactStore {
    remote: Arc<dyn ObjectStore>,
    cache_dir: PathBuf,
    cache_ttl: Duration,
    retry: RetryConfig,
}

impl ArtifactStore {
    pub fn new(
        remote: Arc<dyn ObjectStore>,
        cache_dir: impl Into<PathBuf>,
        cache_ttl: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            remote,
            cache_dir: cache_dir.into(),
            cache_ttl,
            retry,
        }
    }

    pub fn local_path(&self, key: ArtifactKey) -> PathBuf {
        self.cache_dir.join(key.file_name())
    }

    /// Loads the latest version of an artifact
    ///
    /// A local copy younger than the cache TTL is used as is. Otherwise the
    /// remote copy is downloaded with retries and cached; if that fails a stale
    /// local copy is used instead. With no copy anywhere this is an `Artifact` error.
    pub async fn load<T: DeserializeOwned + Send>(&self, key: ArtifactKey, force_refresh: bool) -> AppResult<T> {
        let local = self.local_path(key);

        if !force_refresh && !is_stale(&local, self.cache_ttl, SystemTime::now()) {
            tracing::debug!(artifact = %key, "Using cached artifact");
            let bytes = tokio::fs::read(&local).await?;
            return key.decode(&bytes);
        }

        let remote_path = ArtifactVersion::Latest.path_for(key);
        let downloaded = with_retry(&self.retry, "artifact download", || self.remote.get(&remote_path)).await;

        match downloaded {
            Ok(Some(bytes)) => match key.decode(&bytes) {
                Ok(value) => {
                    self.write_local(key, &bytes).await?;
                    tracing::info!(artifact = %key, bytes = bytes.len(), "Downloaded artifact");
                    Ok(value)
                }
                Err(e) => {
                    let reason = format!("downloaded copy is unreadable: {}", e);
                    self.fall_back_to_local(key, &local, &reason).await
                }
            },
            Ok(None) => self.fall_back_to_local(key, &local, "not found remotely").await,
            Err(e) => self.fall_back_to_local(key, &local, &e.to_string()).await,
        }
    }

    async fn fall_back_to_local<T: DeserializeOwned + Send>(
        &self,
        key: ArtifactKey,
        local: &Path,
        reason: &str,
    ) -> AppResult<T> {
        match tokio::fs::read(local).await {
            Ok(bytes) => {
                tracing::warn!(artifact = %key, reason = %reason, "Download failed, using stale local copy");
                key.decode(&bytes)
            }
            Err(_) => Err(AppError::Artifact(format!(
                "{} is unavailable: {}",
                key.file_name(),
                reason
            ))),
        }
    }

    async fn write_local(&self, key: ArtifactKey, bytes: &[u8]) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::write(self.local_path(key), bytes).await?;
        Ok(())
    }

    async fn upload(&self, key: ArtifactKey, version: ArtifactVersion, bytes: &[u8]) -> UploadOutcome {
        let path = version.path_for(key);
        let uploaded = with_retry(&self.retry, "artifact upload", || {
            self.remote.put(&path, bytes.to_vec())
        })
        .await;

        match uploaded {
            Ok(()) => {
                tracing::info!(artifact = %key, path = %path, "Uploaded artifact");
                UploadOutcome::Uploaded { path }
            }
            Err(e) => {
                tracing::error!(artifact = %key, path = %path, error = %e, "Artifact upload failed");
                UploadOutcome::Failed {
                    path,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Writes the artifact to the local cache, then uploads it
    ///
    /// Local write failures are errors. Upload failures are only reported
    /// through the returned outcome.
    pub async fn save<T: Serialize + Sync>(
        &self,
        key: ArtifactKey,
        value: &T,
        version: ArtifactVersion,
    ) -> AppResult<UploadOutcome> {
        let bytes = key.encode(value)?;
        self.write_local(key, &bytes).await?;
        Ok(self.upload(key, version, &bytes).await)
    }

    /// Saves a dated version, then the same bytes as `latest`
    pub async fn save_dual<T: Serialize + Sync>(
        &self,
        key: ArtifactKey,
        value: &T,
        date: NaiveDate,
    ) -> AppResult<Vec<UploadOutcome>> {
        let bytes = key.encode(value)?;
        self.write_local(key, &bytes).await?;

        let mut outcomes = Vec::with_capacity(2);
        for version in [ArtifactVersion::Dated(date), ArtifactVersion::Latest] {
            outcomes.push(self.upload(key, version, &bytes).await);
        }
        Ok(outcomes)
    }
}

/// Persisted TF-IDF item rows, aligned with their item lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFeatureMatrix {
    pub matrix: SparseMatrix,
    pub items: IdLookup<String>,
}

/// Everything per-user generation needs from a training run
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub vectorizer: TfidfVectorizer,
    pub item_features: ItemFeatureMatrix,
    pub item_factors: ItemFactors,
    pub baseline: Vec<BaselineRecommendation>,
    pub metadata: Vec<ItemMetadata>,
}

impl ModelArtifacts {
    pub fn from_models(
        content: &ContentModel,
        item_factors: ItemFactors,
        baseline: Vec<BaselineRecommendation>,
        metadata: Vec<ItemMetadata>,
    ) -> Self {
        Self {
            vectorizer: content.vectorizer.clone(),
            item_features: ItemFeatureMatrix {
                matrix: content.item_features.clone(),
                items: content.items.clone(),
            },
            item_factors,
            baseline,
            metadata,
        }
    }

    /// Rebuilds the content model, checking the pieces line up
    pub fn content_model(&self) -> AppResult<ContentModel> {
        ContentModel::from_parts(
            self.vectorizer.clone(),
            self.item_features.matrix.clone(),
            self.item_features.items.clone(),
        )
    }

    /// Saves every artifact under today's date and `latest`
    pub async fn save_all(&self, store: &ArtifactStore, date: NaiveDate) -> AppResult<Vec<UploadOutcome>> {
        let mut outcomes = Vec::new();
        outcomes.extend(store.save_dual(ArtifactKey::TfidfVectorizer, &self.vectorizer, date).await?);
        outcomes.extend(store.save_dual(ArtifactKey::ItemFeatures, &self.item_features, date).await?);
        outcomes.extend(store.save_dual(ArtifactKey::ItemFactors, &self.item_factors, date).await?);
        outcomes.extend(
            store
                .save_dual(ArtifactKey::BaselineRecommendations, &self.baseline, date)
                .await?,
        );
        outcomes.extend(store.save_dual(ArtifactKey::ItemMetadata, &self.metadata, date).await?);

        let failed = outcomes.iter().filter(|o| !o.is_uploaded()).count();
        if failed > 0 {
            tracing::warn!(
                success_count = outcomes.len() - failed,
                error_count = failed,
                "Some artifact uploads failed"
            );
        }
        Ok(outcomes)
    }

    pub async fn load_all(store: &ArtifactStore, force_refresh: bool) -> AppResult<Self> {
        let artifacts = Self {
            vectorizer: store.load(ArtifactKey::TfidfVectorizer, force_refresh).await?,
            item_features: store.load(ArtifactKey::ItemFeatures, force_refresh).await?,
            item_factors: store.load(ArtifactKey::ItemFactors, force_refresh).await?,
            baseline: store.load(ArtifactKey::BaselineRecommendations, force_refresh).await?,
            metadata: store.load(ArtifactKey::ItemMetadata, force_refresh).await?,
        };
        validate_item_factors(&artifacts.item_factors)?;
        Ok(artifacts)
    }
}

/// Loads the imported interaction dataset, empty when it has never been published
pub async fn load_external_interactions(
    store: &ArtifactStore,
    force_refresh: bool,
) -> AppResult<Vec<InteractionEvent>> {
    match store.load(ArtifactKey::ExternalInteractions, force_refresh).await {
        Ok(events) => Ok(events),
        Err(AppError::Artifact(reason)) => {
            tracing::warn!(reason = %reason, "External interactions unavailable, using internal events only");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}
