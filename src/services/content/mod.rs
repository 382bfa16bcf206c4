pub mod features;
pub mod stop_words;
pub mod tfidf;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::ratings_matrix::IdLookup;
use super::sparse::SparseMatrix;
use crate::error::{AppError, AppResult};
use crate::models::{BaselineRecommendation, ContentScore, FeatureContribution, ItemMetadata, UserId};

pub use features::metadata_document;
pub use tfidf::TfidfVectorizer;

/// Number of top-rated items a full-batch profile is built from
pub const TOP_RATED_ITEMS: usize = 10;
/// Only the best-scoring items per user get an explanation
pub const EXPLAIN_TOP_N: usize = 100;
/// Terms reported per explanation
pub const EXPLANATION_FEATURES: usize = 10;
/// Size of the non-personalised fallback ranking
pub const BASELINE_SIZE: usize = 100;

/// An item similar to a reference item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarItem {
    pub item_id: String,
    pub similarity: f64,
}

/// TF-IDF item feature space and the operations on it
#[derive(Debug, Clone)]
pub struct ContentModel {
    pub vectorizer: TfidfVectorizer,
    /// One L2-normalised row per item
    pub item_features: SparseMatrix,
    pub items: IdLookup<String>,
    row_norms: Vec<f64>,
}

impl ContentModel {
    /// Fits the vectoriser over the metadata corpus
    ///
    /// Repeated item ids keep their first record.
    pub fn fit(metadata: &[ItemMetadata], mut vectorizer: TfidfVectorizer) -> AppResult<Self> {
        let start = std::time::Instant::now();
        let mut seen = HashSet::new();
        let mut items = IdLookup::new();
        let mut documents = Vec::with_capacity(metadata.len());
        for item in metadata {
            if seen.insert(item.item_id.as_str()) {
                items.get_or_insert(item.item_id.clone());
                documents.push(metadata_document(item));
            }
        }

        let item_features = vectorizer.fit_transform(&documents)?;

        tracing::info!(
            items = items.len(),
            features = vectorizer.n_features(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Content model fitted"
        );

        Self::from_parts(vectorizer, item_features, items)
    }

    /// Reassembles a model from persisted pieces, checking they line up
    pub fn from_parts(
        vectorizer: TfidfVectorizer,
        item_features: SparseMatrix,
        items: IdLookup<String>,
    ) -> AppResult<Self> {
        item_features.validate()?;
        let (rows, cols) = item_features.shape();
        if rows != items.len() || cols != vectorizer.n_features() {
            return Err(AppError::Artifact(format!(
                "Item feature matrix is {}x{} but there are {} items and {} features",
                rows,
                cols,
                items.len(),
                vectorizer.n_features()
            )));
        }
        let row_norms = (0..rows)
            .map(|r| item_features.row(r).map(|(_, v)| v * v).sum::<f64>().sqrt())
            .collect();
        Ok(Self {
            vectorizer,
            item_features,
            items,
            row_norms,
        })
    }

    fn feature_row(&self, item_id: &str) -> Option<usize> {
        self.items.position(item_id)
    }

    /// Mean feature vector of each user's highest-scored items
    ///
    /// Only stored (non-zero) entries of the raw matrix are candidates; users
    /// whose top items have no metadata get no profile.
    pub fn profiles_from_top_rated(
        &self,
        raw: &SparseMatrix,
        users: &IdLookup<UserId>,
        rated_items: &IdLookup<String>,
        top: usize,
    ) -> Vec<(UserId, Array1<f64>)> {
        let mut profiles = Vec::new();
        for (row, user_id) in users.ids().iter().enumerate() {
            let mut entries: Vec<(usize, f64)> = raw.row(row).collect();
            entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

            let feature_rows: Vec<usize> = entries
                .iter()
                .take(top)
                .filter_map(|(col, _)| rated_items.id(*col))
                .filter_map(|item_id| self.feature_row(item_id))
                .collect();
            if feature_rows.is_empty() {
                continue;
            }

            let mut profile = Array1::<f64>::zeros(self.vectorizer.n_features());
            for &r in &feature_rows {
                for (c, v) in self.item_features.row(r) {
                    profile[c] += v;
                }
            }
            profile /= feature_rows.len() as f64;
            profiles.push((user_id.clone(), profile));
        }

        tracing::info!(
            users = users.len(),
            profiles = profiles.len(),
            "Built content profiles"
        );
        profiles
    }

    /// Profile of a single user as the score-weighted mean of their items
    ///
    /// Returns `None` when no scored item has features or the weights cancel out.
    pub fn weighted_profile<'a>(
        &self,
        raw_scores: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Option<Array1<f64>> {
        let mut profile = Array1::<f64>::zeros(self.vectorizer.n_features());
        let mut weight_sum = 0.0;
        let mut found = 0usize;

        for (item_id, weight) in raw_scores {
            if let Some(r) = self.feature_row(item_id) {
                for (c, v) in self.item_features.row(r) {
                    profile[c] += weight * v;
                }
                weight_sum += weight;
                found += 1;
            }
        }

        if found == 0 || weight_sum.abs() < 1e-12 {
            return None;
        }
        Some(profile / weight_sum)
    }

    /// Cosine score of every item against a profile
    ///
    /// Explanations are attached to the `explain_top` highest-scoring items.
    pub fn score_user(
        &self,
        user_id: &UserId,
        profile: &Array1<f64>,
        explain_top: usize,
    ) -> Vec<ContentScore> {
        let profile_norm = profile.dot(profile).sqrt();
        let scores: Vec<f64> = (0..self.items.len())
            .map(|r| {
                let norm = profile_norm * self.row_norms[r];
                if norm == 0.0 {
                    return 0.0;
                }
                self.item_features
                    .row(r)
                    .map(|(c, v)| profile[c] * v)
                    .sum::<f64>()
                    / norm
            })
            .collect();

        let mut ranked: Vec<usize> = (0..scores.len()).collect();
        ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        let explained: HashSet<usize> = ranked.into_iter().take(explain_top).collect();

        scores
            .iter()
            .enumerate()
            .map(|(r, &score)| ContentScore {
                user_id: user_id.clone(),
                item_id: self.items.id(r).cloned().unwrap_or_default(),
                content_score: score,
                explanation: explained.contains(&r).then(|| self.explain(profile, r)),
            })
            .collect()
    }

    /// Top positive per-term contributions of an item to a profile match
    fn explain(&self, profile: &Array1<f64>, row: usize) -> Vec<FeatureContribution> {
        let mut contributions: Vec<(usize, f64)> = self
            .item_features
            .row(row)
            .map(|(c, v)| (c, profile[c] * v))
            .filter(|(_, v)| *v > 0.0)
            .collect();
        contributions.sort_by(|a, b| b.1.total_cmp(&a.1));

        contributions
            .into_iter()
            .take(EXPLANATION_FEATURES)
            .filter_map(|(c, score)| {
                self.vectorizer.feature_name(c).map(|feature| FeatureContribution {
                    feature: feature.to_string(),
                    score,
                })
            })
            .collect()
    }

    /// Items closest to `item_id` in feature space, excluding the item itself
    pub fn similar_items(&self, item_id: &str, limit: usize) -> AppResult<Vec<SimilarItem>> {
        let target = self
            .feature_row(item_id)
            .ok_or_else(|| AppError::NotFound(format!("Item {} has no content features", item_id)))?;
        let target_vector = self.item_features.row_dense(target);
        let target_norm = self.row_norms[target];

        let mut similar: Vec<SimilarItem> = (0..self.items.len())
            .filter(|&r| r != target)
            .filter_map(|r| {
                let norm = target_norm * self.row_norms[r];
                let similarity = if norm == 0.0 {
                    0.0
                } else {
                    self.item_features
                        .row(r)
                        .map(|(c, v)| target_vector[c] * v)
                        .sum::<f64>()
                        / norm
                };
                self.items.id(r).map(|id| SimilarItem {
                    item_id: id.clone(),
                    similarity,
                })
            })
            .collect();
        similar.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        similar.truncate(limit);
        Ok(similar)
    }
}

/// Items ranked by their mean content score across users
pub fn baseline_recommendations(scores: &[ContentScore], top_n: usize) -> Vec<BaselineRecommendation> {
    let mut totals: HashMap<&str, (f64, usize)> = HashMap::new();
    for score in scores {
        let entry = totals.entry(score.item_id.as_str()).or_insert((0.0, 0));
        entry.0 += score.content_score;
        entry.1 += 1;
    }

    let mut baseline: Vec<BaselineRecommendation> = totals
        .into_iter()
        .map(|(item_id, (sum, count))| BaselineRecommendation {
            item_id: item_id.to_string(),
            content_score: sum / count as f64,
        })
        .collect();
    baseline.sort_by(|a, b| {
        b.content_score
            .total_cmp(&a.content_score)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    baseline.truncate(top_n);
    baseline
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, genres: &[&str], director: &str) -> ItemMetadata {
        ItemMetadata {
            genres: genres.iter().map(|g| g.to_string()).collect(),
            directors: vec![director.to_string()],
            ..ItemMetadata::new(id)
        }
    }

    fn catalog() -> Vec<ItemMetadata> {
        vec![
            item("1", &["Horror"], "Carpenter"),
            item("2", &["Horror", "Thriller"], "Carpenter"),
            item("3", &["Comedy"], "Wilder"),
            item("4", &["Comedy", "Romance"], "Wilder"),
        ]
    }

    fn model() -> ContentModel {
        ContentModel::fit(&catalog(), TfidfVectorizer::new(0.0, 1.0, None)).unwrap()
    }

    #[test]
    fn test_from_parts_rejects_corrupt_feature_matrix() {
        let model = model();
        let mut json = serde_json::to_value(&model.item_features).unwrap();
        json["indices"][0] = serde_json::json!(model.vectorizer.n_features() + 3);
        let corrupt: SparseMatrix = serde_json::from_value(json).unwrap();

        let err = ContentModel::from_parts(model.vectorizer.clone(), corrupt, model.items.clone()).unwrap_err();

        assert!(matches!(err, AppError::Artifact(_)));
    }

    #[test]
    fn test_from_parts_accepts_fitted_pieces() {
        let model = model();
        let rebuilt =
            ContentModel::from_parts(model.vectorizer.clone(), model.item_features.clone(), model.items.clone())
                .unwrap();
        assert_eq!(rebuilt.item_features, model.item_features);
    }

    #[test]
    fn test_weighted_profile_prefers_similar_items() {
        let model = model();
        let profile = model.weighted_profile(vec![("1", 3.0), ("missing", 10.0)]).unwrap();

        let scores = model.score_user(&UserId::Internal(1), &profile, EXPLAIN_TOP_N);

        assert_eq!(scores.len(), 4);
        let horror = scores.iter().find(|s| s.item_id == "2").unwrap();
        let comedy = scores.iter().find(|s| s.item_id == "3").unwrap();
        assert!(horror.content_score > comedy.content_score);
        assert!((scores[0].content_score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_profile_without_known_items() {
        let model = model();
        assert!(model.weighted_profile(vec![("zzz", 1.0)]).is_none());
        assert!(model.weighted_profile(vec![("1", 2.0), ("3", -2.0)]).is_none());
    }

    #[test]
    fn test_explanations_only_for_top_items() {
        let model = model();
        let profile = model.weighted_profile(vec![("1", 1.0)]).unwrap();

        let scores = model.score_user(&UserId::Internal(1), &profile, 1);

        let explained: Vec<_> = scores.iter().filter(|s| s.explanation.is_some()).collect();
        assert_eq!(explained.len(), 1);
        assert_eq!(explained[0].item_id, "1");
        let explanation = explained[0].explanation.as_ref().unwrap();
        assert!(explanation.iter().all(|f| f.score > 0.0));
        assert!(explanation.iter().any(|f| f.feature == "carpenter"));
    }

    #[test]
    fn test_profiles_from_top_rated_entries() {
        let model = model();
        let raw = SparseMatrix::from_triplets(2, 3, vec![(0, 0, 5.0), (0, 2, 1.0), (1, 1, 2.0)]).unwrap();
        let users = IdLookup::from_ids(vec![UserId::Internal(1), UserId::External("lb_a".into())]);
        let rated = IdLookup::from_ids(vec!["3".to_string(), "unknown".to_string(), "4".to_string()]);

        let profiles = model.profiles_from_top_rated(&raw, &users, &rated, 1);

        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].0, UserId::Internal(1));
        let expected = model.item_features.row_dense(2);
        assert_eq!(profiles[0].1, expected);
    }

    #[test]
    fn test_similar_items_excludes_self() {
        let model = model();
        let similar = model.similar_items("3", 2).unwrap();

        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].item_id, "4");
        assert!(similar.iter().all(|s| s.item_id != "3"));
        assert!(matches!(model.similar_items("99", 5), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_baseline_is_mean_per_item() {
        let row = |user: i64, item: &str, score: f64| ContentScore {
            user_id: UserId::Internal(user),
            item_id: item.to_string(),
            content_score: score,
            explanation: None,
        };
        let scores = vec![row(1, "a", 0.2), row(2, "a", 0.4), row(1, "b", 0.5), row(1, "c", 0.1)];

        let baseline = baseline_recommendations(&scores, 2);

        assert_eq!(baseline.len(), 2);
        assert_eq!(baseline[0].item_id, "b");
        assert_eq!(baseline[1].item_id, "a");
        assert!((baseline[1].content_score - 0.3).abs() < 1e-12);
    }
}
