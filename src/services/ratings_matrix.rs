use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use super::aggregation::center_per_user;
use super::sparse::SparseMatrix;
use crate::error::AppResult;
use crate::models::{AggregatedScore, UserId};

/// Aggregated score at or above which an interaction counts as "liked"
pub const LIKED_THRESHOLD: f64 = 7.0;

/// Dense zero-based bijection between identifiers and matrix offsets
///
/// Serialises as the ordered identifier list; positions are rebuilt on load.
#[derive(Debug, Clone, PartialEq)]
pub struct IdLookup<K: Eq + Hash> {
    ids: Vec<K>,
    positions: HashMap<K, usize>,
}

impl<K: Clone + Eq + Hash> Default for IdLookup<K> {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> IdLookup<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a lookup from ids in offset order; later duplicates are ignored
    pub fn from_ids(ids: impl IntoIterator<Item = K>) -> Self {
        let mut lookup = Self::new();
        for id in ids {
            lookup.get_or_insert(id);
        }
        lookup
    }

    /// Returns the offset of `id`, assigning the next one if unseen
    pub fn get_or_insert(&mut self, id: K) -> usize {
        if let Some(&pos) = self.positions.get(&id) {
            return pos;
        }
        let pos = self.ids.len();
        self.positions.insert(id.clone(), pos);
        self.ids.push(id);
        pos
    }

    pub fn position<Q>(&self, id: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.positions.get(id).copied()
    }

    pub fn id(&self, position: usize) -> Option<&K> {
        self.ids.get(position)
    }

    pub fn ids(&self) -> &[K] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<K: Eq + Hash + Serialize> Serialize for IdLookup<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ids.serialize(serializer)
    }
}

impl<'de, K: Clone + Eq + Hash + Deserialize<'de>> Deserialize<'de> for IdLookup<K> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<K>::deserialize(deserializer).map(IdLookup::from_ids)
    }
}

/// User × item matrices built from one aggregated table
#[derive(Debug, Clone)]
pub struct RatingMatrices {
    pub raw: SparseMatrix,
    pub centered: SparseMatrix,
    pub users: IdLookup<UserId>,
    pub items: IdLookup<String>,
}

impl RatingMatrices {
    /// Restricts the raw matrix to internal users
    ///
    /// Returns the reduced matrix together with a lookup whose offsets index
    /// its rows. Item offsets are unchanged.
    pub fn internal_only(&self) -> AppResult<(SparseMatrix, IdLookup<UserId>)> {
        let mut users = IdLookup::new();
        let mut triplets = Vec::new();
        for (row, user) in self.users.ids().iter().enumerate() {
            if !user.is_internal() {
                continue;
            }
            let new_row = users.get_or_insert(user.clone());
            triplets.extend(self.raw.row(row).map(|(col, v)| (new_row, col, v)));
        }
        let raw = SparseMatrix::from_triplets(users.len(), self.items.len(), triplets)?;
        Ok((raw, users))
    }
}

/// Builds raw and centered matrices from aggregated rows
///
/// Offsets follow first appearance in `rows`. Entries whose raw (resp.
/// centered) score is exactly zero are left out of the respective matrix.
pub fn build_rating_matrices(rows: &[AggregatedScore]) -> AppResult<RatingMatrices> {
    let mut users = IdLookup::new();
    let mut items = IdLookup::new();
    let mut raw_entries = Vec::with_capacity(rows.len());
    let mut centered_entries = Vec::with_capacity(rows.len());

    for row in rows {
        let u = users.get_or_insert(row.user_id.clone());
        let i = items.get_or_insert(row.item_id.clone());
        if row.raw_score != 0.0 {
            raw_entries.push((u, i, row.raw_score));
        }
        if row.centered_score != 0.0 {
            centered_entries.push((u, i, row.centered_score));
        }
    }

    let raw = SparseMatrix::from_triplets(users.len(), items.len(), raw_entries)?;
    let centered = SparseMatrix::from_triplets(users.len(), items.len(), centered_entries)?;

    tracing::info!(
        users = users.len(),
        items = items.len(),
        raw_nnz = raw.nnz(),
        centered_nnz = centered.nnz(),
        "Built rating matrices"
    );

    Ok(RatingMatrices {
        raw,
        centered,
        users,
        items,
    })
}

/// Leave-k-out holdout over liked interactions
///
/// For every user with more than `k` rows scoring at least `liked_threshold`,
/// `k` of those rows are sampled into the held-out set. The remaining rows,
/// liked or not, form the training set and are re-centred so that centering
/// only reflects training data.
pub fn split_leave_k_out(
    rows: &[AggregatedScore],
    k: usize,
    liked_threshold: f64,
    seed: u64,
) -> (Vec<AggregatedScore>, Vec<AggregatedScore>) {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut user_order: Vec<&UserId> = Vec::new();
    let mut positives: HashMap<&UserId, Vec<usize>> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        if row.raw_score >= liked_threshold {
            positives
                .entry(&row.user_id)
                .or_insert_with(|| {
                    user_order.push(&row.user_id);
                    Vec::new()
                })
                .push(idx);
        }
    }

    let mut held_out_idx = vec![false; rows.len()];
    for user in user_order {
        let candidates = &positives[user];
        if k == 0 || candidates.len() <= k {
            continue;
        }
        for pick in rand::seq::index::sample(&mut rng, candidates.len(), k).iter() {
            held_out_idx[candidates[pick]] = true;
        }
    }

    let mut train = Vec::with_capacity(rows.len());
    let mut held_out = Vec::new();
    for (row, is_held_out) in rows.iter().zip(held_out_idx) {
        if is_held_out {
            held_out.push(row.clone());
        } else {
            train.push(row.clone());
        }
    }
    center_per_user(&mut train);

    tracing::info!(
        k,
        train_rows = train.len(),
        held_out_rows = held_out.len(),
        "Leave-k-out split"
    );

    (train, held_out)
}
