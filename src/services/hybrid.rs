use std::collections::HashMap;

use crate::models::{CfScore, ContentScore, HybridScore, ItemMetadata, UserId};

/// Weight of the collaborative signal when both signals exist
pub const DEFAULT_ALPHA: f64 = 0.7;
/// Confidence penalty for rows without a collaborative signal
pub const CONTENT_ONLY_FACTOR: f64 = 0.8;

const RAW_WEIGHT: f64 = 0.75;
const POPULARITY_WEIGHT: f64 = 0.05;
const RATING_WEIGHT: f64 = 0.10;

const POPULARITY_CLIP: f64 = 100.0;
const POPULARITY_SOFT_CAP: f64 = 40.0;
const VOTE_COUNT_CLIP: f64 = 1000.0;
const MIN_VOTES_QUANTILE: f64 = 0.70;

/// Score column that can be normalised per user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreColumn {
    Content,
    Cf,
    Final,
}

impl ScoreColumn {
    fn get(&self, row: &HybridScore) -> Option<f64> {
        match self {
            ScoreColumn::Content => row.content_score,
            ScoreColumn::Cf => row.cf_score,
            ScoreColumn::Final => Some(row.final_score),
        }
    }

    fn set(&self, row: &mut HybridScore, value: f64) {
        match self {
            ScoreColumn::Content => row.content_score = Some(value),
            ScoreColumn::Cf => row.cf_score = Some(value),
            ScoreColumn::Final => row.final_score = value,
        }
    }
}

/// Outer join of content and collaborative scores on (user, item)
///
/// Content rows keep their order; collaborative-only rows follow in theirs.
pub fn merge_signals(content: Vec<ContentScore>, cf: Vec<CfScore>) -> Vec<HybridScore> {
    let mut positions: HashMap<(UserId, String), usize> = HashMap::with_capacity(content.len());
    let mut rows: Vec<HybridScore> = Vec::with_capacity(content.len().max(cf.len()));

    for score in content {
        positions.insert((score.user_id.clone(), score.item_id.clone()), rows.len());
        rows.push(HybridScore::from_signals(
            score.user_id,
            score.item_id,
            Some(score.content_score),
            None,
            score.explanation,
        ));
    }

    let mut cf_only = 0usize;
    for score in cf {
        match positions.get(&(score.user_id.clone(), score.item_id.clone())) {
            Some(&pos) => rows[pos].cf_score = Some(score.cf_score),
            None => {
                cf_only += 1;
                rows.push(HybridScore::from_signals(
                    score.user_id,
                    score.item_id,
                    None,
                    Some(score.cf_score),
                    None,
                ));
            }
        }
    }

    tracing::info!(rows = rows.len(), cf_only, "Merged content and collaborative scores");
    rows
}

/// Min-max scales one column into [0, 1] within each user's rows
///
/// Absent values stay absent. A user whose present values are all equal gets 0.
pub fn normalize_per_user(rows: &mut [HybridScore], column: ScoreColumn) {
    let mut bounds: HashMap<UserId, (f64, f64)> = HashMap::new();
    for row in rows.iter() {
        if let Some(value) = column.get(row) {
            let entry = bounds
                .entry(row.user_id.clone())
                .or_insert((f64::INFINITY, f64::NEG_INFINITY));
            entry.0 = entry.0.min(value);
            entry.1 = entry.1.max(value);
        }
    }

    for row in rows.iter_mut() {
        let (Some(value), Some(&(min, max))) = (column.get(row), bounds.get(&row.user_id)) else {
            continue;
        };
        let range = max - min;
        let scaled = if range == 0.0 { 0.0 } else { (value - min) / range };
        column.set(row, scaled);
    }
}

/// Fills `raw_final_score` from the normalised signals
pub fn blend(rows: &mut [HybridScore], alpha: f64) {
    for row in rows.iter_mut() {
        row.raw_final_score = match (row.content_score, row.cf_score) {
            (Some(content), Some(cf)) => alpha * cf + (1.0 - alpha) * content,
            (Some(content), None) => content * CONTENT_ONLY_FACTOR,
            (None, Some(cf)) => alpha * cf,
            (None, None) => 0.0,
        };
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ItemQuality {
    popularity: f64,
    vote_count: f64,
    vote_average: f64,
}

/// Corpus-level priors for the Bayesian rating and per-item quality inputs
#[derive(Debug, Clone)]
pub struct QualityPrior {
    /// Mean vote average over the catalogue
    pub mean_vote: f64,
    /// 70th percentile of the vote count over the catalogue
    pub min_votes: f64,
    items: HashMap<String, ItemQuality>,
}

impl QualityPrior {
    pub fn from_metadata(metadata: &[ItemMetadata]) -> Self {
        let averages: Vec<f64> = metadata.iter().filter_map(|m| m.vote_average).collect();
        let mean_vote = if averages.is_empty() {
            0.0
        } else {
            averages.iter().sum::<f64>() / averages.len() as f64
        };

        let mut counts: Vec<f64> = metadata.iter().filter_map(|m| m.vote_count).collect();
        counts.sort_by(|a, b| a.total_cmp(b));
        let min_votes = quantile(&counts, MIN_VOTES_QUANTILE);

        let mut items = HashMap::with_capacity(metadata.len());
        for m in metadata {
            items.entry(m.item_id.clone()).or_insert(ItemQuality {
                popularity: m.popularity.unwrap_or(0.0).clamp(0.0, POPULARITY_CLIP),
                vote_count: m.vote_count.unwrap_or(0.0).clamp(0.0, VOTE_COUNT_CLIP),
                vote_average: m.vote_average.unwrap_or(0.0),
            });
        }

        Self {
            mean_vote,
            min_votes,
            items,
        }
    }

    /// `v/(v+m)·R + m/(v+m)·C`, falling back to `C` when `v + m` is zero
    pub fn weighted_rating(&self, vote_count: f64, vote_average: f64) -> f64 {
        let denominator = vote_count + self.min_votes;
        if denominator == 0.0 {
            return self.mean_vote;
        }
        (vote_count / denominator) * vote_average + (self.min_votes / denominator) * self.mean_vote
    }
}

/// Linear-interpolated quantile of sorted values; 0 for an empty slice
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

/// Soft cap of popularity into [0, 1)
pub fn popularity_score(popularity: f64) -> f64 {
    (popularity / POPULARITY_SOFT_CAP).tanh()
}

/// Adds popularity and smoothed rating to the blended score
///
/// The three weights sum to 0.9.
pub fn apply_quality_boost(rows: &mut [HybridScore], prior: &QualityPrior) {
    for row in rows.iter_mut() {
        let quality = prior.items.get(&row.item_id).copied().unwrap_or_default();
        row.popularity_score = popularity_score(quality.popularity);
        row.rating_score = prior.weighted_rating(quality.vote_count, quality.vote_average) / 10.0;
        row.final_score = RAW_WEIGHT * row.raw_final_score
            + POPULARITY_WEIGHT * row.popularity_score
            + RATING_WEIGHT * row.rating_score;
        row.boosted_score = row.final_score;
    }
}

/// Normalise signals, blend, and boost in one pass
pub fn combine(
    content: Vec<ContentScore>,
    cf: Vec<CfScore>,
    prior: &QualityPrior,
    alpha: f64,
) -> Vec<HybridScore> {
    let mut rows = merge_signals(content, cf);
    normalize_per_user(&mut rows, ScoreColumn::Content);
    normalize_per_user(&mut rows, ScoreColumn::Cf);
    blend(&mut rows, alpha);
    apply_quality_boost(&mut rows, prior);
    rows
}
