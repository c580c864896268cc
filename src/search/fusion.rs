//! Rank fusion.
//!
//! Pure functions combining a dense and a lexical ranked list into one.
//! Reciprocal Rank Fusion follows Cormack, Clarke, Buettcher (2009) -
//! "Reciprocal Rank Fusion outperforms Condorcet and individual Rank
//! Learning Methods"; weighted fusion is a linear blend of raw scores.

use std::collections::HashMap;

use crate::core::SearchResult;
use crate::error::{Error, Result};

struct FusedEntry {
    result: SearchResult,
    score: f32,
}

/// Deduplicates a list by chunk id, keeping first occurrences in order.
fn dedup_ranked(results: &[SearchResult]) -> Vec<&SearchResult> {
    let mut seen: HashMap<&str, ()> = HashMap::with_capacity(results.len());
    let mut out = Vec::with_capacity(results.len());
    for result in results {
        if seen.insert(result.chunk.id.as_str(), ()).is_none() {
            out.push(result);
        }
    }
    out
}

fn drain_sorted(order: Vec<String>, mut entries: HashMap<String, FusedEntry>) -> Vec<SearchResult> {
    let mut fused: Vec<SearchResult> = order
        .into_iter()
        .filter_map(|id| entries.remove(&id))
        .map(|entry| {
            let mut result = entry.result;
            result.score = entry.score;
            result
        })
        .collect();
    // Stable sort keeps first-seen order for tied scores, which makes the
    // output deterministic for identical inputs.
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
}

/// Reciprocal-Rank Fusion of two ranked lists.
///
/// Each unique chunk scores `sum(1 / (k + rank))` over the lists containing
/// it, with 1-based ranks. Chunk payloads are preserved from whichever list
/// produced them, dense preferred. Duplicate ids within one input list only
/// contribute their first occurrence. Empty inputs yield an empty output,
/// never an error.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `k` is zero.
#[allow(clippy::cast_precision_loss)]
pub fn fuse_rrf(
    dense: &[SearchResult],
    lexical: &[SearchResult],
    k: usize,
) -> Result<Vec<SearchResult>> {
    if k == 0 {
        return Err(Error::invalid_input("fusion k must be >= 1"));
    }

    let mut order: Vec<String> = Vec::new();
    let mut entries: HashMap<String, FusedEntry> = HashMap::new();

    for (rank, result) in dedup_ranked(dense).into_iter().enumerate() {
        let contribution = 1.0 / (k + rank + 1) as f32;
        order.push(result.chunk.id.clone());
        entries.insert(
            result.chunk.id.clone(),
            FusedEntry {
                result: result.clone(),
                score: contribution,
            },
        );
    }

    for (rank, result) in dedup_ranked(lexical).into_iter().enumerate() {
        let contribution = 1.0 / (k + rank + 1) as f32;
        if let Some(entry) = entries.get_mut(&result.chunk.id) {
            entry.score += contribution;
        } else {
            order.push(result.chunk.id.clone());
            entries.insert(
                result.chunk.id.clone(),
                FusedEntry {
                    result: result.clone(),
                    score: contribution,
                },
            );
        }
    }

    Ok(drain_sorted(order, entries))
}

/// Linear weighted fusion of two ranked lists.
///
/// Each unique chunk scores `alpha * dense_score + (1 - alpha) *
/// lexical_score`; a missing side contributes 0. Scores are assumed to be
/// on comparable scales; normalization is the caller's concern.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `alpha` is outside `[0, 1]`.
pub fn fuse_weighted(
    dense: &[SearchResult],
    lexical: &[SearchResult],
    alpha: f32,
) -> Result<Vec<SearchResult>> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(Error::invalid_input(format!(
            "fusion alpha must be in [0, 1], got {alpha}"
        )));
    }

    let mut order: Vec<String> = Vec::new();
    let mut entries: HashMap<String, FusedEntry> = HashMap::new();

    for result in dedup_ranked(dense) {
        order.push(result.chunk.id.clone());
        entries.insert(
            result.chunk.id.clone(),
            FusedEntry {
                result: result.clone(),
                score: alpha * result.score,
            },
        );
    }

    for result in dedup_ranked(lexical) {
        let contribution = (1.0 - alpha) * result.score;
        if let Some(entry) = entries.get_mut(&result.chunk.id) {
            entry.score += contribution;
        } else {
            order.push(result.chunk.id.clone());
            entries.insert(
                result.chunk.id.clone(),
                FusedEntry {
                    result: result.clone(),
                    score: contribution,
                },
            );
        }
    }

    Ok(drain_sorted(order, entries))
}
