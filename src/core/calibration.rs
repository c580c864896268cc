//! Score-calibration metadata and threshold derivation.
//!
//! Calibration converts raw cosine similarities into absolute relevance
//! thresholds for the active embedding model. The record is a singleton per
//! store and is rebuilt whenever the embedding model changes.

use serde::{Deserialize, Serialize};

/// Fractions of the perfect-baseline range at which each label starts.
const HIGH_FRACTION: f32 = 0.70;
const MEDIUM_FRACTION: f32 = 0.40;
const LOW_FRACTION: f32 = 0.15;

/// Singleton calibration record for a store.
///
/// Invariant: `high_threshold >= medium_threshold >= low_threshold >= 0`,
/// all finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMetadata {
    /// Embedding model the calibration was computed against.
    pub embedding_model: String,
    /// RFC3339 timestamp of the calibration run.
    pub calibration_date: String,
    /// Median top-1 score of chunks searched with their own content.
    pub perfect_match_score: f32,
    /// Median similarity of disjoint chunk pairs.
    pub baseline_score: f32,
    /// `perfect_match_score - baseline_score`, clamped at 0.
    pub score_range: f32,
    /// Scores at or above this are labelled "high".
    pub high_threshold: f32,
    /// Scores at or above this are labelled "medium".
    pub medium_threshold: f32,
    /// Scores at or above this are labelled "low".
    pub low_threshold: f32,
}

impl CalibrationMetadata {
    /// Derives a calibration record from measured perfect and baseline
    /// scores.
    ///
    /// Degenerate inputs (`perfect <= baseline`, NaN, infinities) still
    /// produce finite, ordered, non-negative thresholds: the range clamps to
    /// zero and all three thresholds collapse onto the baseline.
    #[must_use]
    pub fn derive(
        embedding_model: impl Into<String>,
        calibration_date: impl Into<String>,
        perfect_match_score: f32,
        baseline_score: f32,
    ) -> Self {
        let perfect = finite_or_zero(perfect_match_score);
        let baseline = finite_or_zero(baseline_score);
        let range = (perfect - baseline).max(0.0);

        let high = (baseline + HIGH_FRACTION * range).max(0.0);
        let medium = (baseline + MEDIUM_FRACTION * range).max(0.0).min(high);
        let low = (baseline + LOW_FRACTION * range).max(0.0).min(medium);

        Self {
            embedding_model: embedding_model.into(),
            calibration_date: calibration_date.into(),
            perfect_match_score: perfect,
            baseline_score: baseline,
            score_range: range,
            high_threshold: high,
            medium_threshold: medium,
            low_threshold: low,
        }
    }

    /// Whether this record applies to the given embedding model.
    ///
    /// A record computed for an unnamed model only matches an unnamed model.
    #[must_use]
    pub fn matches_model(&self, model: Option<&str>) -> bool {
        self.embedding_model == model.unwrap_or_default()
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() { value } else { 0.0 }
}

/// Returns the median of the values without mutating the input.
///
/// Returns `None` for an empty slice. Even-length inputs return the mean of
/// the two central values.
#[must_use]
pub fn median(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(f32::midpoint(sorted[mid - 1], sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}
