use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::models::{AggregatedScore, HybridScore, UserId};

/// Ranking quality over held-out interactions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TopKMetrics {
    /// Fraction of users with at least one held-out item in their top K
    pub hit_rate: f64,
    pub precision: f64,
    pub recall: f64,
    pub users_evaluated: usize,
}

/// Hit rate, precision and recall at `k`, averaged over held-out users
///
/// Precision divides by `k` even when fewer than `k` items were scored.
/// All metrics are rounded to four decimals; no held-out users gives zeros.
pub fn evaluate_top_k(predictions: &[HybridScore], held_out: &[AggregatedScore], k: usize) -> TopKMetrics {
    let mut relevant: HashMap<&UserId, HashSet<&str>> = HashMap::new();
    for row in held_out {
        relevant.entry(&row.user_id).or_default().insert(row.item_id.as_str());
    }
    if relevant.is_empty() || k == 0 {
        return TopKMetrics {
            hit_rate: 0.0,
            precision: 0.0,
            recall: 0.0,
            users_evaluated: relevant.len(),
        };
    }

    let mut per_user: HashMap<&UserId, Vec<&HybridScore>> = HashMap::new();
    for prediction in predictions {
        if relevant.contains_key(&prediction.user_id) {
            per_user.entry(&prediction.user_id).or_default().push(prediction);
        }
    }

    let mut hits_total = 0usize;
    let mut precision_total = 0.0;
    let mut recall_total = 0.0;
    for (user_id, truth) in &relevant {
        let mut ranked = per_user.remove(user_id).unwrap_or_default();
        ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        let hits = ranked
            .iter()
            .take(k)
            .filter(|p| truth.contains(p.item_id.as_str()))
            .count();

        hits_total += usize::from(hits > 0);
        precision_total += hits as f64 / k as f64;
        recall_total += hits as f64 / truth.len() as f64;
    }

    let n_users = relevant.len() as f64;
    let metrics = TopKMetrics {
        hit_rate: round4(hits_total as f64 / n_users),
        precision: round4(precision_total / n_users),
        recall: round4(recall_total / n_users),
        users_evaluated: relevant.len(),
    };

    tracing::info!(
        k,
        users = metrics.users_evaluated,
        hit_rate = metrics.hit_rate,
        precision = metrics.precision,
        recall = metrics.recall,
        "Top-K evaluation"
    );
    metrics
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(user: i64, item: &str, score: f64) -> HybridScore {
        let mut row = HybridScore::from_signals(UserId::Internal(user), item.to_string(), None, None, None);
        row.final_score = score;
        row
    }

    fn held(user: i64, item: &str) -> AggregatedScore {
        AggregatedScore {
            user_id: UserId::Internal(user),
            item_id: item.to_string(),
            raw_score: 8.0,
            centered_score: 0.0,
        }
    }

    #[test]
    fn test_metrics_over_two_users() {
        let predictions = vec![
            prediction(1, "a", 0.9),
            prediction(1, "b", 0.8),
            prediction(1, "c", 0.1),
            prediction(2, "a", 0.9),
            prediction(2, "b", 0.2),
            prediction(2, "c", 0.3),
        ];
        let held_out = vec![held(1, "b"), held(2, "b"), held(2, "c")];

        let metrics = evaluate_top_k(&predictions, &held_out, 2);

        // user 1: top2 {a, b} -> 1 hit, precision 0.5, recall 1
        // user 2: top2 {a, c} -> 1 hit, precision 0.5, recall 0.5
        assert_eq!(metrics.users_evaluated, 2);
        assert_eq!(metrics.hit_rate, 1.0);
        assert_eq!(metrics.precision, 0.5);
        assert_eq!(metrics.recall, 0.75);
    }

    #[test]
    fn test_user_without_predictions_counts_as_miss() {
        let metrics = evaluate_top_k(&[prediction(1, "a", 1.0)], &[held(1, "a"), held(2, "z")], 10);

        assert_eq!(metrics.hit_rate, 0.5);
        assert_eq!(metrics.precision, 0.05);
        assert_eq!(metrics.recall, 0.5);
    }

    #[test]
    fn test_no_held_out_users() {
        let metrics = evaluate_top_k(&[prediction(1, "a", 1.0)], &[], 10);
        assert_eq!(metrics.users_evaluated, 0);
        assert_eq!(metrics.hit_rate, 0.0);
    }
}
