//! Weighted score fusion of dense and lexical hits

use crate::config::SearchConfig;
use crate::embedding::{DenseHit, LexicalHit};
use std::collections::HashMap;
use thiserror::Error;

/// Fallback split when both requested weights are zero
pub const DEFAULT_DENSE_WEIGHT: f32 = 0.7;
pub const DEFAULT_LEXICAL_WEIGHT: f32 = 0.3;

#[derive(Error, Debug, PartialEq)]
pub enum FusionError {
    #[error("Invalid weight configuration: {0}")]
    InvalidWeights(String),
}

/// Effective fusion weights; always sum to 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub dense: f32,
    pub lexical: f32,
}

impl FusionWeights {
    /// Normalize requested weights. Both zero means the default 0.7/0.3 split.
    pub fn normalized(dense: f32, lexical: f32) -> Result<Self, FusionError> {
        for (name, weight) in [("dense_weight", dense), ("lexical_weight", lexical)] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(FusionError::InvalidWeights(format!(
                    "{} must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }

        let total = dense + lexical;
        if total == 0.0 {
            return Ok(Self {
                dense: DEFAULT_DENSE_WEIGHT,
                lexical: DEFAULT_LEXICAL_WEIGHT,
            });
        }

        Ok(Self {
            dense: dense / total,
            lexical: lexical / total,
        })
    }

    /// All weight on one path
    pub fn dense_only() -> Self {
        Self {
            dense: 1.0,
            lexical: 0.0,
        }
    }
}

/// How raw BM25 scores are mapped onto [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LexicalNormalization {
    /// Divide by the best score in the current result set.
    ///
    /// This is min-max with the lower bound pinned at 0, BM25's natural
    /// floor, so the weakest matching hit still scores above an absent one.
    MinMax,
    /// Divide by a fixed constant and cap at 1
    Divisor(f32),
}

impl Default for LexicalNormalization {
    fn default() -> Self {
        LexicalNormalization::MinMax
    }
}

impl LexicalNormalization {
    pub fn from_config(config: &SearchConfig) -> Self {
        match config.lexical_normalization.as_str() {
            "divisor" => LexicalNormalization::Divisor(config.lexical_divisor),
            _ => LexicalNormalization::MinMax,
        }
    }

    /// Normalized scores, index-aligned with `raw`
    pub fn apply(&self, raw: &[f32]) -> Vec<f32> {
        match *self {
            LexicalNormalization::MinMax => {
                let max = raw.iter().copied().fold(0.0f32, f32::max);
                raw.iter()
                    .map(|&s| if max > 0.0 { clamp_unit(s / max) } else { 0.0 })
                    .collect()
            }
            LexicalNormalization::Divisor(divisor) => raw
                .iter()
                .map(|&s| {
                    if divisor > 0.0 && s > 0.0 {
                        clamp_unit(s / divisor)
                    } else {
                        0.0
                    }
                })
                .collect(),
        }
    }
}

/// Cosine similarity clamped onto [0, 1]
pub fn normalize_dense(score: f32) -> f32 {
    clamp_unit(score)
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A chunk after reconciliation, with both normalized component scores
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: String,
    /// 0 when the chunk was not returned by the dense path
    pub dense_score: f32,
    /// 0 when the chunk was not returned by the lexical path
    pub lexical_score: f32,
    pub combined_score: f32,
}

/// Reconcile both hit lists by chunk id and rank by weighted combined score.
///
/// A chunk present in only one list keeps a 0 for the other path. Ties keep
/// first-seen order: dense hits in rank order, then lexical-only hits.
pub fn fuse(
    dense: &[DenseHit],
    lexical: &[LexicalHit],
    weights: FusionWeights,
    normalization: LexicalNormalization,
) -> Vec<FusedCandidate> {
    let mut candidates: Vec<FusedCandidate> = Vec::with_capacity(dense.len() + lexical.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(dense.len() + lexical.len());

    for hit in dense {
        let score = normalize_dense(hit.score);
        match positions.get(&hit.chunk_id) {
            Some(&pos) => {
                let candidate = &mut candidates[pos];
                candidate.dense_score = candidate.dense_score.max(score);
            }
            None => {
                positions.insert(hit.chunk_id.clone(), candidates.len());
                candidates.push(FusedCandidate {
                    chunk_id: hit.chunk_id.clone(),
                    dense_score: score,
                    lexical_score: 0.0,
                    combined_score: 0.0,
                });
            }
        }
    }

    let raw: Vec<f32> = lexical.iter().map(|h| h.score).collect();
    for (hit, score) in lexical.iter().zip(normalization.apply(&raw)) {
        match positions.get(&hit.chunk_id) {
            Some(&pos) => {
                let candidate = &mut candidates[pos];
                candidate.lexical_score = candidate.lexical_score.max(score);
            }
            None => {
                positions.insert(hit.chunk_id.clone(), candidates.len());
                candidates.push(FusedCandidate {
                    chunk_id: hit.chunk_id.clone(),
                    dense_score: 0.0,
                    lexical_score: score,
                    combined_score: 0.0,
                });
            }
        }
    }

    for candidate in candidates.iter_mut() {
        candidate.combined_score = clamp_unit(
            weights.dense * candidate.dense_score + weights.lexical * candidate.lexical_score,
        );
    }

    // sort_by is stable
    candidates.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(id: &str, score: f32) -> DenseHit {
        DenseHit {
            chunk_id: id.to_string(),
            score,
        }
    }

    fn lexical(id: &str, score: f32) -> LexicalHit {
        LexicalHit {
            chunk_id: id.to_string(),
            score,
        }
    }

    #[test]
    fn test_weight_normalization() {
        let w = FusionWeights::normalized(2.0, 2.0).unwrap();
        assert_eq!(w, FusionWeights { dense: 0.5, lexical: 0.5 });

        let w = FusionWeights::normalized(3.0, 1.0).unwrap();
        assert!((w.dense + w.lexical - 1.0).abs() < 1e-6);
        assert!((w.dense - 0.75).abs() < 1e-6);

        let w = FusionWeights::normalized(0.0, 0.0).unwrap();
        assert_eq!(w.dense, DEFAULT_DENSE_WEIGHT);
        assert_eq!(w.lexical, DEFAULT_LEXICAL_WEIGHT);
    }

    #[test]
    fn test_negative_and_nan_weights_rejected() {
        assert!(FusionWeights::normalized(-0.1, 1.0).is_err());
        assert!(FusionWeights::normalized(1.0, f32::NAN).is_err());
        assert!(FusionWeights::normalized(f32::INFINITY, 1.0).is_err());
    }

    #[test]
    fn test_min_max_normalization() {
        let scores = LexicalNormalization::MinMax.apply(&[4.0, 2.0, 1.0]);
        assert_eq!(scores, vec![1.0, 0.5, 0.25]);
        assert_eq!(LexicalNormalization::MinMax.apply(&[0.0]), vec![0.0]);
        assert!(LexicalNormalization::MinMax.apply(&[]).is_empty());
    }

    #[test]
    fn test_divisor_normalization() {
        let scores = LexicalNormalization::Divisor(10.0).apply(&[25.0, 5.0, 0.0]);
        assert_eq!(scores, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_dense_clamped() {
        assert_eq!(normalize_dense(-0.3), 0.0);
        assert_eq!(normalize_dense(1.0000002), 1.0);
        assert_eq!(normalize_dense(0.42), 0.42);
    }

    #[test]
    fn test_reconcile_by_identity() {
        let fused = fuse(
            &[dense("a", 0.9), dense("b", 0.5)],
            &[lexical("b", 8.0), lexical("c", 4.0)],
            FusionWeights::normalized(0.5, 0.5).unwrap(),
            LexicalNormalization::MinMax,
        );

        assert_eq!(fused.len(), 3);
        let b: Vec<_> = fused.iter().filter(|c| c.chunk_id == "b").collect();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].dense_score, 0.5);
        assert_eq!(b[0].lexical_score, 1.0);

        let c = fused.iter().find(|c| c.chunk_id == "c").unwrap();
        assert_eq!(c.dense_score, 0.0);
        assert_eq!(c.lexical_score, 0.5);
    }

    #[test]
    fn test_combined_scores_bounded_and_sorted() {
        let fused = fuse(
            &[dense("a", 1.3), dense("b", -0.2), dense("c", 0.7)],
            &[lexical("a", 120.0), lexical("d", 3.0)],
            FusionWeights::normalized(1.0, 1.0).unwrap(),
            LexicalNormalization::Divisor(10.0),
        );

        for pair in fused.windows(2) {
            assert!(pair[0].combined_score >= pair[1].combined_score);
        }
        assert!(fused
            .iter()
            .all(|c| (0.0..=1.0).contains(&c.combined_score)));
        assert_eq!(fused[0].chunk_id, "a");
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let fused = fuse(
            &[dense("x", 0.5), dense("y", 0.5)],
            &[lexical("z", 1.0)],
            FusionWeights::normalized(0.5, 0.5).unwrap(),
            LexicalNormalization::Divisor(2.0),
        );
        let order: Vec<&str> = fused.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["x", "y", "z"]);
    }
}
