use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::linalg::TruncatedSvd;
use super::ratings_matrix::{IdLookup, RatingMatrices};
use crate::error::{AppError, AppResult};
use crate::models::{CfScore, UserId};

/// Latent item factors shared between training and incremental scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFactors {
    /// Shape (k × n_items)
    pub factors: Array2<f64>,
    pub items: IdLookup<String>,
}

impl ItemFactors {
    pub fn rank(&self) -> usize {
        self.factors.nrows()
    }
}

/// Collaborative filtering model fitted on the centered rating matrix
#[derive(Debug, Clone)]
pub struct CollaborativeModel {
    /// Shape (n_users × k); only meaningful for the users of this fit
    pub user_factors: Array2<f64>,
    pub item_factors: ItemFactors,
    pub users: IdLookup<UserId>,
}

impl CollaborativeModel {
    /// Factorises the centered matrix with a truncated SVD
    pub fn fit(matrices: &RatingMatrices, svd: &TruncatedSvd) -> AppResult<Self> {
        let start = std::time::Instant::now();
        let factors = svd.fit(&matrices.centered)?;

        tracing::info!(
            users = matrices.users.len(),
            items = matrices.items.len(),
            rank = factors.singular_values.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Collaborative model fitted"
        );

        Ok(Self {
            user_factors: factors.u_sigma,
            item_factors: ItemFactors {
                factors: factors.components,
                items: matrices.items.clone(),
            },
            users: matrices.users.clone(),
        })
    }

    /// Scores every (user, item) pair of the fit
    pub fn predict_all(&self) -> Vec<CfScore> {
        let predicted = self.user_factors.dot(&self.item_factors.factors);
        let items = self.item_factors.items.ids();

        let mut scores = Vec::with_capacity(predicted.len());
        for (user_id, row) in self.users.ids().iter().zip(predicted.rows()) {
            for (item_id, &score) in items.iter().zip(row.iter()) {
                scores.push(CfScore {
                    user_id: user_id.clone(),
                    item_id: item_id.clone(),
                    cf_score: score,
                });
            }
        }

        tracing::info!(rows = scores.len(), "Collaborative predictions computed");
        scores
    }
}

/// Scores all known items for one user without refitting
///
/// The user vector is the centered-score weighted sum of the factor columns of
/// every known item the user scored, divided by how many such items there are.
/// Returns `None` when none of the user's items are known to the model.
pub fn score_incremental<'a>(
    user_id: &UserId,
    centered_scores: impl IntoIterator<Item = (&'a str, f64)>,
    item_factors: &ItemFactors,
) -> Option<Vec<CfScore>> {
    let mut user_vector = Array1::<f64>::zeros(item_factors.rank());
    let mut count = 0usize;

    for (item_id, score) in centered_scores {
        if let Some(idx) = item_factors.items.position(item_id) {
            user_vector.scaled_add(score, &item_factors.factors.column(idx));
            count += 1;
        }
    }

    if count == 0 {
        tracing::debug!(user_id = %user_id, "No known items for incremental CF");
        return None;
    }
    user_vector /= count as f64;

    let predicted = user_vector.dot(&item_factors.factors);
    Some(
        item_factors
            .items
            .ids()
            .iter()
            .zip(predicted.iter())
            .map(|(item_id, &score)| CfScore {
                user_id: user_id.clone(),
                item_id: item_id.clone(),
                cf_score: score,
            })
            .collect(),
    )
}

/// Checks that factors and lookup agree on the item count
pub fn validate_item_factors(item_factors: &ItemFactors) -> AppResult<()> {
    if item_factors.factors.ncols() != item_factors.items.len() {
        return Err(AppError::Artifact(format!(
            "Item factors have {} columns but lookup has {} items",
            item_factors.factors.ncols(),
            item_factors.items.len()
        )));
    }
    Ok(())
}
