//! Embedding extraction from face crops.
//!
//! The service depends on the abstract [`EmbeddingExtractor`] capability;
//! [`ArcFaceEmbedder`] is the production implementation, running the
//! w600k_r50 ArcFace model via ONNX Runtime. Tests substitute doubles that
//! return fixed vectors.

use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::types::Embedding;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    /// The model could not produce an embedding for this crop. Scoped to the
    /// single annotation or region being processed.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Opaque image-crop → embedding-vector capability.
///
/// Deterministic for fixed model weights; the dimensionality is fixed and
/// known at service start. `&mut self` because ONNX sessions are not
/// shareable — the daemon runs one extractor on a dedicated engine thread.
pub trait EmbeddingExtractor: Send {
    /// Length of every embedding this extractor produces.
    fn dimension(&self) -> usize;

    /// Extract an embedding from a cropped face image.
    fn extract(&mut self, crop: &RgbImage) -> Result<Embedding, EmbedderError>;
}

/// ArcFace-based embedding extractor.
#[derive(Debug)]
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Resize a crop to the 112x112 model input and normalize into an NCHW
    /// float tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let resized = if crop.dimensions() == (size, size) {
            crop.clone()
        } else {
            image::imageops::resize(crop, size, size, FilterType::Triangle)
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                tensor[[0, channel, y as usize, x as usize]] =
                    (pixel[channel] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
        tensor
    }
}

impl EmbeddingExtractor for ArcFaceEmbedder {
    fn dimension(&self) -> usize {
        ARCFACE_EMBEDDING_DIM
    }

    fn extract(&mut self, crop: &RgbImage) -> Result<Embedding, EmbedderError> {
        let input = Self::preprocess(crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::ExtractionFailed(format!("embedding output: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EmbedderError::ExtractionFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so stored and query vectors live on the unit sphere.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn preprocess_output_shape() {
        let crop = RgbImage::from_pixel(50, 80, Rgb([128, 128, 128]));
        let tensor = ArcFaceEmbedder::preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn preprocess_normalization() {
        let crop = RgbImage::from_pixel(112, 112, Rgb([128, 128, 128]));
        let tensor = ArcFaceEmbedder::preprocess(&crop);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        let val = tensor[[0, 0, 0, 0]];
        assert!((val - expected).abs() < 1e-6, "got {val}, expected {expected}");
    }

    #[test]
    fn preprocess_keeps_channels_separate() {
        // A pure red crop must normalize to a positive R channel and
        // negative G/B channels.
        let crop = RgbImage::from_pixel(112, 112, Rgb([255, 0, 0]));
        let tensor = ArcFaceEmbedder::preprocess(&crop);
        assert!(tensor[[0, 0, 10, 10]] > 0.9);
        assert!(tensor[[0, 1, 10, 10]] < -0.9);
        assert!(tensor[[0, 2, 10, 10]] < -0.9);
    }

    #[test]
    fn preprocess_resizes_non_canonical_crops() {
        let crop = RgbImage::from_pixel(37, 215, Rgb([10, 200, 90]));
        let tensor = ArcFaceEmbedder::preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        // Uniform input stays uniform through the bilinear resize.
        let first = tensor[[0, 1, 0, 0]];
        assert!((tensor[[0, 1, 111, 111]] - first).abs() < 1e-6);
    }

    #[test]
    fn load_missing_model_fails() {
        let err = ArcFaceEmbedder::load("/nonexistent/w600k_r50.onnx").unwrap_err();
        assert!(matches!(err, EmbedderError::ModelNotFound(_)));
    }
}
