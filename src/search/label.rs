//! Result enrichment: previews and relevance labels.

use unicode_segmentation::UnicodeSegmentation;

use crate::core::{CalibrationMetadata, Chunk, Relevance, SearchResult};

/// Maximum preview length in grapheme clusters.
const PREVIEW_MAX_GRAPHEMES: usize = 120;

/// Fractions of a result set labelled high / medium when no calibration
/// applies (the remainder is low).
const PERCENTILE_HIGH: f64 = 0.20;
const PERCENTILE_MEDIUM: f64 = 0.50;

/// Builds the one-line preview for a chunk: the signature when present,
/// else the first non-empty content line, truncated to 120 characters.
#[must_use]
pub fn make_preview(chunk: &Chunk) -> String {
    let source = chunk
        .signature
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map_or_else(
            || {
                chunk
                    .content
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .unwrap_or_default()
            },
            str::trim,
        );
    source.graphemes(true).take(PREVIEW_MAX_GRAPHEMES).collect()
}

/// Fills previews and relevance labels on a score-descending result list.
///
/// When calibration metadata is present and was computed for the active
/// embedding model, labels come from its absolute thresholds by the score
/// passed in `score_of`. Otherwise labels fall back to percentiles over the
/// current result set: top 20% high, next 50% medium, rest low, with every
/// result in a non-empty list receiving a label.
pub fn enrich_results(
    results: &mut [SearchResult],
    calibration: Option<&CalibrationMetadata>,
    model: Option<&str>,
) {
    for result in results.iter_mut() {
        result.preview = make_preview(&result.chunk);
    }

    if let Some(meta) = calibration.filter(|meta| meta.matches_model(model)) {
        for result in results.iter_mut() {
            result.relevance = absolute_label(meta, result.score);
        }
    } else {
        percentile_labels(results);
    }
}

/// Labels a single score against absolute calibration thresholds.
#[must_use]
pub fn absolute_label(meta: &CalibrationMetadata, score: f32) -> Relevance {
    if score >= meta.high_threshold {
        Relevance::High
    } else if score >= meta.medium_threshold {
        Relevance::Medium
    } else if score >= meta.low_threshold {
        Relevance::Low
    } else {
        Relevance::Unrated
    }
}

/// Percentile label for position `index` in a score-descending list of
/// `total` results: top 20% high, next 50% medium, rest low.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub(crate) fn percentile_relevance(index: usize, total: usize) -> Relevance {
    let high_count = ((total as f64 * PERCENTILE_HIGH) as usize).max(1);
    let medium_count = ((total as f64 * PERCENTILE_MEDIUM) as usize).max(1);

    if index < high_count {
        Relevance::High
    } else if index < high_count + medium_count {
        Relevance::Medium
    } else {
        Relevance::Low
    }
}

/// Percentile fallback over a score-descending list.
fn percentile_labels(results: &mut [SearchResult]) {
    let total = results.len();
    for (index, result) in results.iter_mut().enumerate() {
        result.relevance = percentile_relevance(index, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChunkType;
    use test_case::test_case;

    fn chunk_with(signature: Option<&str>, content: &str) -> Chunk {
        let mut chunk = Chunk::new("a.rs", ChunkType::Function, "f", content, 1, 3);
        chunk.signature = signature.map(str::to_string);
        chunk
    }

    fn results_with_scores(scores: &[f32]) -> Vec<SearchResult> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| {
                let chunk = Chunk::new("a.rs", ChunkType::Function, format!("f{i}"), "body", 1, 1);
                SearchResult::new(chunk, score)
            })
            .collect()
    }

    #[test]
    fn test_preview_prefers_signature() {
        let chunk = chunk_with(Some("fn f(a: u32) -> bool"), "fn f(a: u32) -> bool {\n  true\n}");
        assert_eq!(make_preview(&chunk), "fn f(a: u32) -> bool");
    }

    #[test]
    fn test_preview_falls_back_to_first_nonempty_line() {
        let chunk = chunk_with(None, "\n\n   let x = 1;\nmore");
        assert_eq!(make_preview(&chunk), "let x = 1;");
    }

    #[test]
    fn test_preview_blank_signature_falls_back() {
        let chunk = chunk_with(Some("   "), "real line");
        assert_eq!(make_preview(&chunk), "real line");
    }

    #[test]
    fn test_preview_truncates_to_120_graphemes() {
        let long = "x".repeat(500);
        let chunk = chunk_with(None, &long);
        assert_eq!(make_preview(&chunk).chars().count(), 120);
    }

    #[test]
    fn test_preview_empty_content() {
        let chunk = chunk_with(None, "");
        assert_eq!(make_preview(&chunk), "");
    }

    #[test]
    fn test_absolute_labels() {
        let meta = CalibrationMetadata::derive("m", "d", 0.85, 0.30);
        assert_eq!(absolute_label(&meta, 0.9), Relevance::High);
        assert_eq!(absolute_label(&meta, 0.685), Relevance::High);
        assert_eq!(absolute_label(&meta, 0.6), Relevance::Medium);
        assert_eq!(absolute_label(&meta, 0.4), Relevance::Low);
        assert_eq!(absolute_label(&meta, 0.1), Relevance::Unrated);
    }

    #[test]
    fn test_enrich_uses_calibration_when_model_matches() {
        let meta = CalibrationMetadata::derive("model-a", "d", 0.85, 0.30);
        let mut results = results_with_scores(&[0.9, 0.1]);
        enrich_results(&mut results, Some(&meta), Some("model-a"));
        assert_eq!(results[0].relevance, Relevance::High);
        assert_eq!(results[1].relevance, Relevance::Unrated);
    }

    #[test]
    fn test_enrich_ignores_stale_calibration() {
        let meta = CalibrationMetadata::derive("old-model", "d", 0.85, 0.30);
        // Model mismatch: percentile fallback labels everything.
        let mut results = results_with_scores(&[0.9, 0.5, 0.1]);
        enrich_results(&mut results, Some(&meta), Some("new-model"));
        assert_eq!(results[0].relevance, Relevance::High);
        assert_eq!(results[1].relevance, Relevance::Medium);
        assert_eq!(results[2].relevance, Relevance::Low);
    }

    #[test_case(3, 1, 1, 1; "three results")]
    #[test_case(10, 2, 5, 3; "ten results")]
    #[test_case(5, 1, 2, 2; "five results")]
    fn test_percentile_distribution(total: usize, high: usize, medium: usize, low: usize) {
        let scores: Vec<f32> = (0..total).map(|i| 1.0 - i as f32 * 0.05).collect();
        let mut results = results_with_scores(&scores);
        enrich_results(&mut results, None, None);

        let count = |label: Relevance| results.iter().filter(|r| r.relevance == label).count();
        assert_eq!(count(Relevance::High), high);
        assert_eq!(count(Relevance::Medium), medium);
        assert_eq!(count(Relevance::Low), low);
    }

    #[test]
    fn test_percentile_all_labelled_for_small_sets() {
        let mut results = results_with_scores(&[0.9]);
        enrich_results(&mut results, None, None);
        assert_eq!(results[0].relevance, Relevance::High);

        let mut results = results_with_scores(&[0.9, 0.1]);
        enrich_results(&mut results, None, None);
        assert!(results.iter().all(|r| r.relevance != Relevance::Unrated));
    }

    #[test]
    fn test_enrich_empty_list() {
        let mut results: Vec<SearchResult> = vec![];
        enrich_results(&mut results, None, None);
        assert!(results.is_empty());
    }
}
