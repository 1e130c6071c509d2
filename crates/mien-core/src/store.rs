//! In-memory store of labeled face embeddings.
//!
//! The store is the only shared mutable state in the service. All access
//! goes through a single mutex held just long enough to mutate or copy the
//! entry list — embedding extraction never runs under the lock.

use std::sync::Mutex;

use thiserror::Error;

use crate::types::{Embedding, LabeledEmbedding};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Embedding length differs from the dimensionality established by the
    /// first insertion. Signals the model was swapped without clearing the
    /// store — surfaced to the operator, never silently handled.
    #[error("dimension mismatch: store holds {expected}-dim embeddings, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// The store lock is poisoned. Fatal to the single request only.
    #[error("face store unavailable: lock poisoned")]
    Unavailable,
}

/// Mutex-guarded, insertion-ordered collection of labeled embeddings.
///
/// No deduplication and no capacity bound; re-enrolling a label appends a
/// further entry, which is expected to improve matching robustness.
#[derive(Debug, Default)]
pub struct FaceStore {
    entries: Mutex<Vec<LabeledEmbedding>>,
}

impl FaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a labeled embedding.
    ///
    /// The first insertion establishes the store's dimensionality; later
    /// insertions must match it.
    pub fn insert(&self, label: &str, embedding: Embedding) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Unavailable)?;
        if let Some(first) = entries.first() {
            if first.embedding.len() != embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: first.embedding.len(),
                    got: embedding.len(),
                });
            }
        }
        entries.push(LabeledEmbedding {
            label: label.to_string(),
            embedding,
        });
        Ok(())
    }

    /// Remove all entries. Idempotent.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Unavailable)?;
        entries.clear();
        Ok(())
    }

    /// Point-in-time snapshot of all entries, in insertion order.
    pub fn all_entries(&self) -> Result<Vec<LabeledEmbedding>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Unavailable)?;
        Ok(entries.clone())
    }

    /// Number of enrolled embeddings.
    pub fn len(&self) -> Result<usize, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Unavailable)?;
        Ok(entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Dimensionality established by the first insertion, or `None` while
    /// the store is empty.
    pub fn dimension(&self) -> Result<Option<usize>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Unavailable)?;
        Ok(entries.first().map(|e| e.embedding.len()))
    }
}
