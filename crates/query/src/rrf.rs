//! Reciprocal Rank Fusion over named ranked lists.
//!
//! Deterministic by construction: given identical input lists the output
//! order is always the same, which the retrieval tests rely on.

use std::collections::BTreeMap;

pub const DEFAULT_RRF_K: f64 = 60.0;

/// One ranked result list, labeled with where it came from.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub source: &'static str,
    pub ids: Vec<String>,
}

impl RankedList {
    pub fn new(source: &'static str, ids: Vec<String>) -> Self {
        Self { source, ids }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusedItem {
    pub id: String,
    pub score: f64,
    /// Lowest 1-based rank the item held in any input list.
    pub best_rank: usize,
    /// Sources that ranked the item, in input-list order.
    pub sources: Vec<&'static str>,
}

/// Fuse ranked lists: `score(d) = sum over lists of 1 / (k + rank(d))`
/// with 1-based ranks; absence from a list contributes nothing. Ties
/// break on best rank, then id, so equal-score items still order
/// deterministically.
pub fn fuse(lists: &[RankedList], k: f64) -> Vec<FusedItem> {
    let mut by_id: BTreeMap<&str, FusedItem> = BTreeMap::new();

    for list in lists {
        for (index, id) in list.ids.iter().enumerate() {
            let rank = index + 1;
            let contribution = 1.0 / (k + rank as f64);

            let entry = by_id.entry(id).or_insert_with(|| FusedItem {
                id: id.clone(),
                score: 0.0,
                best_rank: rank,
                sources: Vec::new(),
            });
            entry.score += contribution;
            entry.best_rank = entry.best_rank.min(rank);
            if !entry.sources.contains(&list.source) {
                entry.sources.push(list.source);
            }
        }
    }

    let mut fused: Vec<FusedItem> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}
