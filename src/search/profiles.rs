//! Multi-profile fan-out.
//!
//! Holds one store per profile (e.g. `code`, `docs`) and fans searches out
//! across them in parallel. Per-profile failures are logged and tolerated as
//! long as at least one profile succeeds; multisearch over profiles keeps
//! the stricter all-errors-fail policy of the batch driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;

use rayon::prelude::*;
use tracing::warn;

use crate::cancel::CancelToken;
use crate::core::{MultisearchOptions, MultisearchResult, SearchOptions, SearchResult};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::search::multi;
use crate::storage::Storage;

/// Parallel searcher over a set of named storage profiles.
pub struct MultiProfileSearcher {
    stores: HashMap<String, Arc<dyn Storage>>,
    default_profile: String,
    embedder: Arc<dyn Embedder>,
}

impl MultiProfileSearcher {
    /// Creates a multi-profile searcher with a default profile name.
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, default_profile: impl Into<String>) -> Self {
        Self {
            stores: HashMap::new(),
            default_profile: default_profile.into(),
            embedder,
        }
    }

    /// Registers a store under a profile name, replacing any previous one.
    pub fn insert_profile(&mut self, profile: impl Into<String>, store: Arc<dyn Storage>) {
        self.stores.insert(profile.into(), store);
    }

    /// Registered profile names, sorted.
    #[must_use]
    pub fn profiles(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.keys().cloned().collect();
        names.sort();
        names
    }

    /// The default profile name.
    #[must_use]
    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    /// Resolves the requested profiles (empty = default) and validates that
    /// each one is registered.
    fn resolve_profiles(&self, requested: &[String]) -> Result<Vec<String>> {
        let profiles: Vec<String> = if requested.is_empty() {
            vec![self.default_profile.clone()]
        } else {
            requested.to_vec()
        };
        for profile in &profiles {
            if !self.stores.contains_key(profile) {
                return Err(Error::UnknownProfile {
                    profile: profile.clone(),
                });
            }
        }
        Ok(profiles)
    }

    fn store_for(&self, profile: &str) -> Result<&Arc<dyn Storage>> {
        self.stores.get(profile).ok_or_else(|| Error::UnknownProfile {
            profile: profile.to_string(),
        })
    }

    /// Tags results from a profile with its name when their chunk has no
    /// domain.
    fn tag_domain(results: &mut [SearchResult], profile: &str) {
        for result in results {
            if result.chunk.domain.is_empty() {
                result.chunk.domain = profile.to_string();
            }
        }
    }

    /// Searches the resolved profiles in parallel and merges the survivors.
    ///
    /// Single-profile requests delegate straight to that store. With
    /// several profiles, one task per profile funnels `(profile, outcome)`
    /// through a channel; failed profiles are logged and dropped, and the
    /// merge deduplicates by chunk id keeping the maximum score.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty query, `UnknownProfile` for an absent
    /// profile, `AllProfilesFailed` when every branch failed, `Cancelled`
    /// when the token trips even if some profiles completed.
    pub fn search(
        &self,
        query: &str,
        options: &SearchOptions,
        token: &CancelToken,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(Error::invalid_input("query must not be empty"));
        }
        options.validate()?;
        let profiles = self.resolve_profiles(&options.profiles)?;

        let embedding = self.embedder.embed(query)?;

        if let [profile] = profiles.as_slice() {
            let mut results = self.store_for(profile)?.search(&embedding, options, token)?;
            Self::tag_domain(&mut results, profile);
            return Ok(results);
        }

        let (sender, receiver) = mpsc::sync_channel(profiles.len());
        rayon::scope(|scope| {
            for profile in &profiles {
                let sender = sender.clone();
                let embedding = &embedding;
                scope.spawn(move |_| {
                    let outcome = self
                        .store_for(profile)
                        .and_then(|store| store.search(embedding, options, token));
                    // Receiver outlives the scope; a send can only fail if
                    // the channel is gone, which means nobody is listening.
                    let _ = sender.send((profile.clone(), outcome));
                });
            }
        });
        drop(sender);

        let mut merged: HashMap<String, SearchResult> = HashMap::new();
        let mut failures: Vec<String> = Vec::new();
        let mut successes = 0usize;

        for (profile, outcome) in receiver {
            match outcome {
                Ok(mut results) => {
                    successes += 1;
                    Self::tag_domain(&mut results, &profile);
                    for result in results {
                        match merged.entry(result.chunk.id.clone()) {
                            std::collections::hash_map::Entry::Occupied(mut entry) => {
                                if result.score > entry.get().score {
                                    entry.insert(result);
                                }
                            }
                            std::collections::hash_map::Entry::Vacant(entry) => {
                                entry.insert(result);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(profile = %profile, error = %e, "profile search failed");
                    failures.push(format!("{profile}: {e}"));
                }
            }
        }

        // A cancelled call fails even when some profiles completed.
        token.check("multi-profile search")?;

        if successes == 0 {
            return Err(Error::AllProfilesFailed {
                detail: failures.join("; "),
            });
        }

        let mut results: Vec<SearchResult> = merged.into_values().collect();
        results.sort_by(|a, b| a.chunk.id.cmp(&b.chunk.id));
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        if options.top_k > 0 {
            results.truncate(options.top_k);
        }
        Ok(results)
    }

    /// Batched multisearch over the Cartesian product of queries and
    /// resolved profiles.
    ///
    /// Merging, boosting, ordering, and output formatting follow the batch
    /// driver; unlike [`MultiProfileSearcher::search`], any per-branch
    /// error fails the whole call.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for bad options, `UnknownProfile` for an absent
    /// profile; per-branch failures are aggregated and fail the call.
    pub fn multisearch(
        &self,
        options: &MultisearchOptions,
        token: &CancelToken,
    ) -> Result<MultisearchResult> {
        options.validate()?;
        let profiles = self.resolve_profiles(&options.profiles)?;

        let calibration = self
            .store_for(&profiles[0])?
            .get_calibration_metadata()?;
        let per_query = SearchOptions::new().with_threshold(options.threshold);

        multi::run_multisearch(
            options,
            self.embedder.as_ref(),
            calibration.as_ref(),
            token,
            |_, embedding| {
                let outcomes: Vec<Result<Vec<SearchResult>>> = profiles
                    .par_iter()
                    .map(|profile| {
                        let mut results = self
                            .store_for(profile)?
                            .search(embedding, &per_query, token)?;
                        Self::tag_domain(&mut results, profile);
                        Ok(results)
                    })
                    .collect();

                let mut combined = Vec::new();
                for outcome in outcomes {
                    combined.extend(outcome?);
                }
                Ok(combined)
            },
        )
    }
}
