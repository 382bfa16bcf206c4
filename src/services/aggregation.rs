use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::{AggregatedScore, InteractionEvent, UserId};

/// Daily multiplicative decay applied to interaction weights
pub const DEFAULT_DECAY_RATE: f64 = 0.97;

/// Time-decay factor for an event, with future timestamps clamped to "now"
pub fn decay_factor(occurred_at: Option<DateTime<Utc>>, now: DateTime<Utc>, decay_rate: f64) -> f64 {
    match occurred_at {
        Some(ts) => {
            let days = (now - ts).num_days().max(0);
            decay_rate.powi(days.min(i32::MAX as i64) as i32)
        }
        None => 1.0,
    }
}

/// Collapses raw events into one decayed score per (user, item)
///
/// Rows come out in order of first appearance of the pair, which is also the
/// order the matrix builder assigns indices in.
pub fn aggregate(
    events: &[InteractionEvent],
    now: DateTime<Utc>,
    decay_rate: f64,
) -> Vec<AggregatedScore> {
    let mut positions: HashMap<(&UserId, &str), usize> = HashMap::new();
    let mut rows: Vec<AggregatedScore> = Vec::new();

    for event in events {
        let contribution =
            event.kind.base_weight(event.rating) * decay_factor(event.occurred_at, now, decay_rate);

        match positions.get(&(&event.user_id, event.item_id.as_str())) {
            Some(&pos) => rows[pos].raw_score += contribution,
            None => {
                positions.insert((&event.user_id, event.item_id.as_str()), rows.len());
                rows.push(AggregatedScore {
                    user_id: event.user_id.clone(),
                    item_id: event.item_id.clone(),
                    raw_score: contribution,
                    centered_score: 0.0,
                });
            }
        }
    }

    center_per_user(&mut rows);

    tracing::debug!(events = events.len(), rows = rows.len(), "Aggregated interactions");

    rows
}

/// Sets `centered_score = raw_score - mean(raw_score)` over each user's rows
pub(crate) fn center_per_user(rows: &mut [AggregatedScore]) {
    let mut totals: HashMap<UserId, (f64, usize)> = HashMap::new();
    for row in rows.iter() {
        let entry = totals.entry(row.user_id.clone()).or_insert((0.0, 0));
        entry.0 += row.raw_score;
        entry.1 += 1;
    }

    for row in rows.iter_mut() {
        if let Some(&(sum, count)) = totals.get(&row.user_id) {
            row.centered_score = row.raw_score - sum / count as f64;
        }
    }
}

/// Aggregated rows for a single user, used by incremental scoring
#[derive(Debug, Clone)]
pub struct UserScores {
    pub user_id: UserId,
    rows: Vec<AggregatedScore>,
}

impl UserScores {
    /// Keeps only the rows belonging to `user_id`
    pub fn from_rows(user_id: UserId, rows: Vec<AggregatedScore>) -> Self {
        let rows = rows.into_iter().filter(|r| r.user_id == user_id).collect();
        Self { user_id, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn raw(&self) -> impl Iterator<Item = (&str, f64)> {
        self.rows.iter().map(|r| (r.item_id.as_str(), r.raw_score))
    }

    pub fn centered(&self) -> impl Iterator<Item = (&str, f64)> {
        self.rows.iter().map(|r| (r.item_id.as_str(), r.centered_score))
    }

    pub fn rows(&self) -> &[AggregatedScore] {
        &self.rows
    }
}
