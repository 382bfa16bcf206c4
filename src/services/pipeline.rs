use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::aggregation::{aggregate, UserScores, DEFAULT_DECAY_RATE};
use super::artifacts::{load_external_interactions, ArtifactStore, ModelArtifacts, UploadOutcome};
use super::collaborative::{score_incremental, CollaborativeModel, ItemFactors};
use super::content::{
    baseline_recommendations, tfidf::TfidfVectorizer, ContentModel, BASELINE_SIZE, EXPLAIN_TOP_N,
    TOP_RATED_ITEMS,
};
use super::evaluation::{evaluate_top_k, TopKMetrics};
use super::hybrid::{combine, normalize_per_user, QualityPrior, ScoreColumn, DEFAULT_ALPHA};
use super::linalg::TruncatedSvd;
use super::ratings_matrix::{build_rating_matrices, split_leave_k_out, LIKED_THRESHOLD};
use super::scheduler::GenerationRunner;
use super::sink::{PredictionSink, SinkReport};
use crate::db::CatalogSource;
use crate::error::{AppError, AppResult};
use crate::models::{
    BaselineRecommendation, HybridScore, InteractionEvent, ItemMetadata, UserId,
};

/// Tunables of the recommender
#[derive(Debug, Clone)]
pub struct RecommenderSettings {
    pub latent_factors: usize,
    /// Weight of the collaborative signal in the blend
    pub blend_alpha: f64,
    /// Fewest aggregated rows a user needs for per-user generation
    pub min_interactions: usize,
    pub seed: u64,
    pub decay_rate: f64,
    pub top_rated_items: usize,
    pub explain_top_n: usize,
    pub baseline_size: usize,
}

impl Default for RecommenderSettings {
    fn default() -> Self {
        Self {
            latent_factors: 50,
            blend_alpha: DEFAULT_ALPHA,
            min_interactions: 5,
            seed: 42,
            decay_rate: DEFAULT_DECAY_RATE,
            top_rated_items: TOP_RATED_ITEMS,
            explain_top_n: EXPLAIN_TOP_N,
            baseline_size: BASELINE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TrainingMode {
    /// Scores every user, persists predictions and publishes artifacts
    Production,
    /// Holds out `holdout` liked rows per user and reports top-K metrics only
    Evaluation { holdout: usize, top_k: usize },
}

/// Everything a full-batch scoring run produces
#[derive(Debug, Clone)]
pub struct FullBatchOutput {
    pub scores: Vec<HybridScore>,
    pub content: ContentModel,
    pub item_factors: ItemFactors,
    pub baseline: Vec<BaselineRecommendation>,
    pub metrics: Option<TopKMetrics>,
    pub users: usize,
    pub items: usize,
}

/// Full-batch scoring over all interactions
///
/// Content profiles are built for internal users only in production mode and
/// for every user in evaluation mode; collaborative scores cover every user.
pub fn score_full_batch(
    events: &[InteractionEvent],
    metadata: &[ItemMetadata],
    mode: TrainingMode,
    settings: &RecommenderSettings,
    now: DateTime<Utc>,
) -> AppResult<FullBatchOutput> {
    let start = std::time::Instant::now();
    let rows = aggregate(events, now, settings.decay_rate);
    if rows.is_empty() {
        return Err(AppError::Model("No interactions to train on".to_string()));
    }

    let (train_rows, held_out) = match mode {
        TrainingMode::Production => (rows, Vec::new()),
        TrainingMode::Evaluation { holdout, .. } => {
            split_leave_k_out(&rows, holdout, LIKED_THRESHOLD, settings.seed)
        }
    };

    let matrices = build_rating_matrices(&train_rows)?;
    let svd = TruncatedSvd::with_components(settings.latent_factors, settings.seed);
    let cf_model = CollaborativeModel::fit(&matrices, &svd)?;
    let cf_scores = cf_model.predict_all();

    let content = ContentModel::fit(metadata, TfidfVectorizer::default())?;
    let (profile_matrix, profile_users) = match mode {
        TrainingMode::Production => matrices.internal_only()?,
        TrainingMode::Evaluation { .. } => (matrices.raw.clone(), matrices.users.clone()),
    };
    let profiles = content.profiles_from_top_rated(
        &profile_matrix,
        &profile_users,
        &matrices.items,
        settings.top_rated_items,
    );
    let content_scores: Vec<_> = profiles
        .iter()
        .flat_map(|(user_id, profile)| content.score_user(user_id, profile, settings.explain_top_n))
        .collect();

    let baseline = baseline_recommendations(&content_scores, settings.baseline_size);
    let prior = QualityPrior::from_metadata(metadata);
    let scores = combine(content_scores, cf_scores, &prior, settings.blend_alpha);

    let metrics = match mode {
        TrainingMode::Evaluation { top_k, .. } => Some(evaluate_top_k(&scores, &held_out, top_k)),
        TrainingMode::Production => None,
    };

    tracing::info!(
        users = matrices.users.len(),
        items = matrices.items.len(),
        rows = scores.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Full-batch scoring finished"
    );

    Ok(FullBatchOutput {
        users: matrices.users.len(),
        items: matrices.items.len(),
        scores,
        content,
        item_factors: cf_model.item_factors,
        baseline,
        metrics,
    })
}

/// Scores one user against published artifacts without refitting anything
///
/// The final score is re-normalised per user; `boosted_score` keeps the value
/// before that step.
pub fn score_single_user(
    user_id: &UserId,
    events: &[InteractionEvent],
    artifacts: &ModelArtifacts,
    settings: &RecommenderSettings,
    now: DateTime<Utc>,
) -> AppResult<Vec<HybridScore>> {
    let scores = UserScores::from_rows(user_id.clone(), aggregate(events, now, settings.decay_rate));
    if scores.len() < settings.min_interactions {
        return Err(AppError::InsufficientData {
            user_id: user_id.to_string(),
            found: scores.len(),
            required: settings.min_interactions,
        });
    }

    let content = artifacts.content_model()?;
    let content_scores = content
        .weighted_profile(scores.raw())
        .map(|profile| content.score_user(user_id, &profile, settings.explain_top_n))
        .unwrap_or_default();
    let cf_scores = score_incremental(user_id, scores.centered(), &artifacts.item_factors).unwrap_or_default();

    if content_scores.is_empty() && cf_scores.is_empty() {
        tracing::warn!(user_id = %user_id, "No known items for this user");
    }

    let prior = QualityPrior::from_metadata(&artifacts.metadata);
    let mut rows = combine(content_scores, cf_scores, &prior, settings.blend_alpha);
    normalize_per_user(&mut rows, ScoreColumn::Final);

    tracing::info!(user_id = %user_id, interactions = scores.len(), rows = rows.len(), "Scored single user");
    Ok(rows)
}

/// Summary of a training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    #[serde(flatten)]
    pub mode: TrainingMode,
    pub users: usize,
    pub items: usize,
    pub rows_scored: usize,
    pub metrics: Option<TopKMetrics>,
    pub stored: Option<SinkReport>,
    pub uploads: Vec<UploadOutcome>,
}

/// Orchestrates data loading, scoring and persistence
pub struct Recommender {
    catalog: Arc<dyn CatalogSource>,
    artifacts: Arc<ArtifactStore>,
    sink: Arc<PredictionSink>,
    settings: RecommenderSettings,
}

impl Recommender {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        artifacts: Arc<ArtifactStore>,
        sink: Arc<PredictionSink>,
        settings: RecommenderSettings,
    ) -> Self {
        Self {
            catalog,
            artifacts,
            sink,
            settings,
        }
    }

    /// Full-batch run over internal and external interactions
    ///
    /// Evaluation mode persists nothing.
    pub async fn train(&self, mode: TrainingMode) -> AppResult<TrainingReport> {
        let mut events = self.catalog.all_interactions().await?;
        let internal = events.len();
        events.extend(load_external_interactions(&self.artifacts, false).await?);
        let metadata = self.catalog.items_metadata().await?;
        tracing::info!(
            internal_events = internal,
            external_events = events.len() - internal,
            items = metadata.len(),
            mode = ?mode,
            "Training started"
        );

        let now = Utc::now();
        let settings = self.settings.clone();
        let (output, metadata) = tokio::task::spawn_blocking(move || {
            score_full_batch(&events, &metadata, mode, &settings, now).map(|output| (output, metadata))
        })
        .await
        .map_err(|e| AppError::Internal(format!("Scoring task failed: {}", e)))??;

        let mut report = TrainingReport {
            mode,
            users: output.users,
            items: output.items,
            rows_scored: output.scores.len(),
            metrics: output.metrics,
            stored: None,
            uploads: Vec::new(),
        };

        if mode == TrainingMode::Production {
            report.stored = Some(self.sink.store(&output.scores).await?);
            let artifacts =
                ModelArtifacts::from_models(&output.content, output.item_factors, output.baseline, metadata);
            report.uploads = artifacts.save_all(&self.artifacts, now.date_naive()).await?;
        }

        Ok(report)
    }

    /// Incremental run for one user against the latest artifacts
    pub async fn generate(&self, user_id: &UserId) -> AppResult<SinkReport> {
        let artifacts = ModelArtifacts::load_all(&self.artifacts, false).await?;
        let events = self.user_events(user_id).await?;

        let user = user_id.clone();
        let settings = self.settings.clone();
        let rows = tokio::task::spawn_blocking(move || {
            score_single_user(&user, &events, &artifacts, &settings, Utc::now())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Scoring task failed: {}", e)))??;

        self.sink.store(&rows).await
    }

    async fn user_events(&self, user_id: &UserId) -> AppResult<Vec<InteractionEvent>> {
        match user_id {
            UserId::Internal(id) => self.catalog.user_interactions(*id).await,
            UserId::External(_) => Ok(load_external_interactions(&self.artifacts, false)
                .await?
                .into_iter()
                .filter(|event| &event.user_id == user_id)
                .collect()),
        }
    }
}

#[async_trait::async_trait]
impl GenerationRunner for Recommender {
    async fn generate_for_user(&self, user_id: &UserId) -> AppResult<()> {
        self.generate(user_id).await.map(|_| ())
    }
}
