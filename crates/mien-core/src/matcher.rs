//! Nearest-neighbor matching of a query embedding against the store.
//!
//! `rank` computes the full ascending distance ranking — no thresholding or
//! top-K truncation here. What counts as a match, and when a face is
//! "unknown", is decided by the caller via `score`.

use thiserror::Error;

use crate::types::{DistanceEntry, Embedding, IdentityScore, LabeledEmbedding};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// A stored entry's dimensionality differs from the query's. Indicates
    /// the store was filled by a different model than the one answering
    /// queries.
    #[error("dimension mismatch: query has {query} dims, entry '{label}' has {entry}")]
    DimensionMismatch {
        label: String,
        query: usize,
        entry: usize,
    },
}

/// Rank all stored entries by Euclidean distance to `query`, ascending.
///
/// The sort is stable: equal distances keep insertion order. An empty entry
/// list yields an empty ranking — the caller reads that as "unknown", not
/// as an error.
pub fn rank(
    query: &Embedding,
    entries: &[LabeledEmbedding],
) -> Result<Vec<DistanceEntry>, MatchError> {
    let mut ranked = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.embedding.len() != query.len() {
            return Err(MatchError::DimensionMismatch {
                label: entry.label.clone(),
                query: query.len(),
                entry: entry.embedding.len(),
            });
        }
        ranked.push(DistanceEntry {
            label: entry.label.clone(),
            distance: query.euclidean_distance(&entry.embedding),
        });
    }

    // Vec::sort_by is stable, so ties preserve insertion order.
    ranked.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(ranked)
}

/// Probability-like distribution derived from a distance ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDistribution {
    /// One score per ranked entry, same order as the ranking.
    pub identities: Vec<IdentityScore>,
    /// 1.0 when the region should be reported as unrecognized: the ranking
    /// is empty, or the best distance exceeds `unknown_threshold`.
    pub unknown_probability: f32,
}

/// Convert a ranking into per-identity probabilities: `1 / distance`, with
/// an exact-duplicate embedding (distance 0) scored as a perfect 1.0.
///
/// `unknown_threshold` is the operator's cutoff for "nobody we know": when
/// the closest entry is farther than this, `unknown_probability` is 1.0.
/// `None` disables the cutoff, so only an empty ranking reads as unknown.
pub fn score(ranked: &[DistanceEntry], unknown_threshold: Option<f32>) -> ScoredDistribution {
    let identities = ranked
        .iter()
        .map(|entry| IdentityScore {
            label: entry.label.clone(),
            probability: if entry.distance == 0.0 {
                1.0
            } else {
                1.0 / entry.distance
            },
        })
        .collect();

    let unknown_probability = match ranked.first() {
        None => 1.0,
        Some(best) => match unknown_threshold {
            Some(cutoff) if best.distance > cutoff => 1.0,
            _ => 0.0,
        },
    };

    ScoredDistribution {
        identities,
        unknown_probability,
    }
}
