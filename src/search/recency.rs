//! Recency boost.
//!
//! Multiplies scores by `1 + factor * 2^(-age_days / half_life_days)` based
//! on each result's source-file mtime. Results without an mtime are left
//! untouched. O(N) over the result list; callers re-sort afterwards.

use crate::core::{RecencyConfig, SearchResult};

const SECONDS_PER_DAY: f32 = 86_400.0;

/// Applies the exponential-decay recency boost in place.
///
/// No-op when `factor` is 0 or the list is empty. `now_unix` is passed in
/// so behavior is reproducible under test.
#[allow(clippy::cast_precision_loss)]
pub fn apply_recency_boost(results: &mut [SearchResult], config: &RecencyConfig, now_unix: i64) {
    if config.factor == 0.0 || results.is_empty() {
        return;
    }

    for result in results.iter_mut() {
        let Some(mtime) = result.chunk.file_mtime else {
            continue;
        };
        let age_days = ((now_unix - mtime).max(0) as f32) / SECONDS_PER_DAY;
        let boost = 1.0 + config.factor * (-age_days / config.half_life_days).exp2();
        result.score *= boost;
    }
}
