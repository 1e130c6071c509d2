use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixel rectangle identifying a face location within a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Region rejected because it is empty or reaches outside the image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid region {region:?} for {image_width}x{image_height} image")]
pub struct InvalidRegion {
    pub region: FaceRegion,
    pub image_width: u32,
    pub image_height: u32,
}

impl FaceRegion {
    /// Region covering an entire image.
    pub fn full_frame(image_width: u32, image_height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width: image_width,
            height: image_height,
        }
    }

    /// Check that the region is non-empty and lies fully inside an
    /// `image_width` x `image_height` image.
    pub fn validate(&self, image_width: u32, image_height: u32) -> Result<(), InvalidRegion> {
        let invalid = || InvalidRegion {
            region: *self,
            image_width,
            image_height,
        };

        if self.width == 0 || self.height == 0 {
            return Err(invalid());
        }
        // Checked add: x + width may exceed u32 on hostile input.
        let right = self.x.checked_add(self.width).ok_or_else(invalid)?;
        let bottom = self.y.checked_add(self.height).ok_or_else(invalid)?;
        if right > image_width || bottom > image_height {
            return Err(invalid());
        }
        Ok(())
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean (L2) distance to another embedding over the full
    /// dimensionality. Callers must check lengths match first.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled face: a label and the embedding extracted from its crop.
/// Immutable once stored; re-enrolling a label appends a new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledEmbedding {
    pub label: String,
    pub embedding: Embedding,
}

/// Distance from a query embedding to one stored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceEntry {
    pub label: String,
    pub distance: f32,
}

/// Probability-like score for one stored entry, derived from its distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityScore {
    pub label: String,
    pub probability: f32,
}

/// Per-region output of a recognition request.
///
/// `ranked` is ascending by distance; `identities` is the derived
/// distribution in the same order. A per-region failure (bad region, no
/// extractable face) sets `error` and leaves the ranking empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecognitionResult {
    pub region: FaceRegion,
    pub ranked: Vec<DistanceEntry>,
    pub identities: Vec<IdentityScore>,
    pub unknown_probability: f32,
    pub error: Option<String>,
}

/// One labeled region of a training request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainAnnotation {
    pub region: FaceRegion,
    pub label: String,
}

/// Outcome of processing one training annotation. Failures are scoped to
/// the annotation; the request carries on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationOutcome {
    pub region: FaceRegion,
    pub label: String,
    pub enrolled: bool,
    pub error: Option<String>,
}
