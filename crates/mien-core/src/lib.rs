//! mien-core — Face-identity matching and enrollment engine.
//!
//! Holds the labeled embedding store, ranks query embeddings against it by
//! Euclidean distance, and extracts embeddings from face crops via an
//! ArcFace model running on ONNX Runtime.

use std::path::PathBuf;

pub mod embedder;
pub mod matcher;
pub mod store;
pub mod types;

pub use embedder::{ArcFaceEmbedder, EmbedderError, EmbeddingExtractor};
pub use store::{FaceStore, StoreError};
pub use types::{
    DistanceEntry, Embedding, FaceRecognitionResult, FaceRegion, IdentityScore, LabeledEmbedding,
};

/// Default directory searched for ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/mien/models")
}
