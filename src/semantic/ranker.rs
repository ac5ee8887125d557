//! Cosine similarity ranking over the catalog embedding matrix.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::catalog::Catalog;

/// Catalogs at least this large are scored on the rayon pool.
const PARALLEL_THRESHOLD: usize = 4096;

/// One ranked catalog entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranked {
    /// Position in the catalog
    pub index: usize,
    /// Cosine similarity in [-1.0, 1.0]
    pub score: f32,
}

/// Errors that can occur while ranking.
#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("catalog is empty")]
    EmptyCatalog,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("number of results must be at least 1")]
    InvalidCount,
}

/// Scores every catalog row against a query and keeps the best `k`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityRanker;

impl SimilarityRanker {
    pub fn new() -> Self {
        Self
    }

    /// Top `min(k, catalog.size())` rows by cosine similarity.
    ///
    /// Ordered by descending score; equal scores keep ascending catalog order.
    pub fn rank(
        &self,
        query: &[f32],
        catalog: &Catalog,
        k: usize,
    ) -> Result<Vec<Ranked>, RankError> {
        if k == 0 {
            return Err(RankError::InvalidCount);
        }
        if catalog.is_empty() {
            return Err(RankError::EmptyCatalog);
        }
        if query.len() != catalog.dimensions() {
            return Err(RankError::DimensionMismatch {
                expected: catalog.dimensions(),
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        let score = |(index, row): (usize, &[f32])| Ranked {
            index,
            score: cosine_similarity(query, row, query_norm),
        };

        let matrix = catalog.matrix();
        let mut scored: Vec<Ranked> = if catalog.size() >= PARALLEL_THRESHOLD {
            matrix
                .iter_rows()
                .collect::<Vec<_>>()
                .into_par_iter()
                .enumerate()
                .map(score)
                .collect()
        } else {
            matrix.iter_rows().enumerate().map(score).collect()
        };

        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, compare);
            scored.truncate(k);
        }
        scored.sort_unstable_by(compare);

        Ok(scored)
    }
}

/// Descending score, then ascending index. Total, so sorting is deterministic.
fn compare(a: &Ranked, b: &Ranked) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.index.cmp(&b.index))
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with a precomputed query norm.
/// Zero-magnitude vectors have no direction and score 0.0.
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if query_norm < f32::EPSILON || target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    (dot_product / (query_norm * target_norm)).clamp(-1.0, 1.0)
}
