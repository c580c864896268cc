//! Batched multi-query search.
//!
//! Embeds up to ten queries in one call, fans the per-query searches out
//! across the rayon pool, merges under a single mutex (deduplicating by
//! chunk id, keeping the maximum raw score, and unioning matched queries),
//! boosts multi-match results, and regroups on request.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use rayon::prelude::*;

use crate::cancel::CancelToken;
use crate::core::{
    CalibrationMetadata, EnhancedResult, MultisearchOptions, MultisearchOutput, MultisearchResult,
    OutputMode, SearchResult,
};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::search::label;

/// Score bonus per additional matched query, capped so boosted scores stay
/// within [0, 1].
const MULTI_MATCH_BONUS: f32 = 0.05;

/// Domain group used when a chunk carries no domain.
const FALLBACK_COLLECTION: &str = "default";

struct MergedHit {
    result: SearchResult,
    matched: BTreeSet<usize>,
}

/// Runs the multisearch pipeline over an arbitrary per-query search
/// function. `search_one` receives the query index and its embedding and is
/// invoked concurrently; any per-query error fails the whole call.
pub(crate) fn run_multisearch<F>(
    options: &MultisearchOptions,
    embedder: &dyn Embedder,
    calibration: Option<&CalibrationMetadata>,
    token: &CancelToken,
    search_one: F,
) -> Result<MultisearchResult>
where
    F: Fn(usize, &[f32]) -> Result<Vec<SearchResult>> + Sync,
{
    options.validate()?;
    token.check("multisearch")?;

    // One batch call for all query embeddings.
    let texts: Vec<&str> = options.queries.iter().map(String::as_str).collect();
    let embeddings = embedder.embed_batch(&texts)?;
    if embeddings.len() != options.queries.len() {
        return Err(Error::Embedding(format!(
            "embedder returned {} vectors for {} queries",
            embeddings.len(),
            options.queries.len()
        )));
    }

    let merged: Mutex<HashMap<String, MergedHit>> = Mutex::new(HashMap::new());
    let raw_counts: Mutex<Vec<usize>> = Mutex::new(vec![0; options.queries.len()]);
    let errors: Mutex<Vec<(usize, Error)>> = Mutex::new(Vec::new());

    embeddings.par_iter().enumerate().for_each(|(index, embedding)| {
        if token.is_cancelled() {
            return;
        }
        match search_one(index, embedding) {
            Ok(results) => {
                if let Ok(mut counts) = raw_counts.lock() {
                    counts[index] = results.len();
                }
                let Ok(mut map) = merged.lock() else { return };
                for result in results {
                    match map.entry(result.chunk.id.clone()) {
                        std::collections::hash_map::Entry::Occupied(mut entry) => {
                            let hit = entry.get_mut();
                            hit.matched.insert(index);
                            if result.score > hit.result.score {
                                hit.result.score = result.score;
                            }
                        }
                        std::collections::hash_map::Entry::Vacant(entry) => {
                            entry.insert(MergedHit {
                                result,
                                matched: BTreeSet::from([index]),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                if let Ok(mut errs) = errors.lock() {
                    errs.push((index, e));
                }
            }
        }
    });

    token.check("multisearch")?;

    let mut errors = errors
        .into_inner()
        .map_err(|_| Error::Storage("multisearch error lock poisoned".to_string()))?;
    if !errors.is_empty() {
        errors.sort_by_key(|(index, _)| *index);
        if errors.len() == 1 {
            let (_, error) = errors.remove(0);
            return Err(error);
        }
        let joined = errors
            .iter()
            .map(|(index, e)| format!("query {}: {e}", index + 1))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::Storage(joined));
    }

    let merged = merged
        .into_inner()
        .map_err(|_| Error::Storage("multisearch merge lock poisoned".to_string()))?;
    let raw_counts = raw_counts
        .into_inner()
        .map_err(|_| Error::Storage("multisearch count lock poisoned".to_string()))?;

    let mut results: Vec<EnhancedResult> = merged
        .into_values()
        .map(|hit| {
            let matched_queries: Vec<String> = hit
                .matched
                .iter()
                .map(|&index| options.queries[index].clone())
                .collect();
            let raw = hit.result.score;
            let boosted_score = if options.boost_multi_match {
                #[allow(clippy::cast_precision_loss)]
                let bonus = MULTI_MATCH_BONUS * (matched_queries.len() - 1) as f32;
                (raw + bonus).min(1.0)
            } else {
                raw
            };
            EnhancedResult {
                result: hit.result,
                matched_queries,
                boosted_score,
            }
        })
        .collect();

    // Order by chunk id first so tie-breaking is deterministic within this
    // call, then by boosted score descending (stable sort).
    results.sort_by(|a, b| a.result.chunk.id.cmp(&b.result.chunk.id));
    results.sort_by(|a, b| b.boosted_score.total_cmp(&a.boosted_score));
    if options.top_k > 0 {
        results.truncate(options.top_k);
    }

    enrich_enhanced(&mut results, calibration, embedder.model());

    let queries_matched: BTreeMap<String, usize> = options
        .queries
        .iter()
        .zip(raw_counts)
        .fold(BTreeMap::new(), |mut acc, (query, count)| {
            *acc.entry(query.clone()).or_insert(0) += count;
            acc
        });

    let total_results = results.len();
    let output = group_output(options.output, &options.queries, results);

    Ok(MultisearchResult {
        output,
        total_queries: options.queries.len(),
        total_results,
        queries_matched,
    })
}

/// Previews plus relevance labels over the boosted ordering.
fn enrich_enhanced(
    results: &mut [EnhancedResult],
    calibration: Option<&CalibrationMetadata>,
    model: Option<&str>,
) {
    let total = results.len();
    let calibrated = calibration.filter(|meta| meta.matches_model(model));

    for (index, enhanced) in results.iter_mut().enumerate() {
        enhanced.result.preview = label::make_preview(&enhanced.result.chunk);
        enhanced.result.relevance = calibrated.map_or_else(
            || label::percentile_relevance(index, total),
            |meta| label::absolute_label(meta, enhanced.boosted_score),
        );
    }
}

fn group_output(
    mode: OutputMode,
    queries: &[String],
    results: Vec<EnhancedResult>,
) -> MultisearchOutput {
    match mode {
        OutputMode::Blended => MultisearchOutput::Blended { results },
        OutputMode::ByQuery => {
            let mut by_query: BTreeMap<String, Vec<EnhancedResult>> = queries
                .iter()
                .map(|query| (query.clone(), Vec::new()))
                .collect();
            for result in results {
                for query in &result.matched_queries {
                    if let Some(group) = by_query.get_mut(query) {
                        group.push(result.clone());
                    }
                }
            }
            MultisearchOutput::ByQuery { by_query }
        }
        OutputMode::ByCollection => {
            let mut by_collection: BTreeMap<String, Vec<EnhancedResult>> = BTreeMap::new();
            for result in results {
                let domain = if result.result.chunk.domain.is_empty() {
                    FALLBACK_COLLECTION.to_string()
                } else {
                    result.result.chunk.domain.clone()
                };
                by_collection.entry(domain).or_default().push(result);
            }
            MultisearchOutput::ByCollection { by_collection }
        }
    }
}
