use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;
use mien_core::matcher;
use mien_core::types::{
    AnnotationOutcome, FaceRecognitionResult, FaceRegion, InvalidRegion, TrainAnnotation,
};
use mien_core::{FaceStore, StoreError};

use crate::engine::EngineHandle;

/// Per-request orchestration: crop, extract, then enroll or rank.
///
/// Holds the store as an explicit shared handle — there is no ambient
/// global state. Cheap to clone; one instance serves all transport
/// handlers.
#[derive(Clone)]
pub struct RecognitionService {
    store: Arc<FaceStore>,
    engine: EngineHandle,
    unknown_threshold: Option<f32>,
    audit_dir: Option<PathBuf>,
}

impl RecognitionService {
    pub fn new(
        store: Arc<FaceStore>,
        engine: EngineHandle,
        unknown_threshold: Option<f32>,
        audit_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            engine,
            unknown_threshold,
            audit_dir,
        }
    }

    /// Enroll every annotation of a training request.
    ///
    /// Failures are scoped to the annotation that caused them; the rest of
    /// the request still proceeds. The request as a whole succeeded when
    /// every annotation was attempted.
    pub async fn train(
        &self,
        image: &RgbImage,
        annotations: &[TrainAnnotation],
    ) -> Vec<AnnotationOutcome> {
        let mut outcomes = Vec::with_capacity(annotations.len());
        for annotation in annotations {
            let error = match self.enroll_one(image, annotation).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(label = %annotation.label, error = %e, "annotation not enrolled");
                    Some(e)
                }
            };
            outcomes.push(AnnotationOutcome {
                region: annotation.region,
                label: annotation.label.clone(),
                enrolled: error.is_none(),
                error,
            });
        }
        outcomes
    }

    async fn enroll_one(&self, image: &RgbImage, annotation: &TrainAnnotation) -> Result<(), String> {
        if annotation.label.is_empty() {
            return Err("label must be non-empty".to_string());
        }
        let crop = crop_region(image, annotation.region).map_err(|e| e.to_string())?;
        self.persist_audit_crop(&annotation.label, &crop);

        let embedding = self.engine.embed(crop).await.map_err(|e| e.to_string())?;

        self.store.insert(&annotation.label, embedding).map_err(|e| {
            if let StoreError::DimensionMismatch { .. } = e {
                // Store corruption relative to the active model — operator
                // must clear the store after a model swap.
                tracing::error!(label = %annotation.label, error = %e, "embedding dimension mismatch");
            }
            e.to_string()
        })
    }

    /// Rank each requested region against the current store snapshot.
    ///
    /// An empty region list means "the whole frame is one region". Regions
    /// that fail (bad bounds, no extractable face) produce a result with an
    /// empty ranking and the error recorded — never a request failure.
    /// Request order is preserved.
    pub async fn recognize(
        &self,
        image: &RgbImage,
        regions: &[FaceRegion],
    ) -> Result<Vec<FaceRecognitionResult>, StoreError> {
        let (width, height) = image.dimensions();
        let regions: Vec<FaceRegion> = if regions.is_empty() {
            vec![FaceRegion::full_frame(width, height)]
        } else {
            regions.to_vec()
        };

        // One snapshot per request: every region sees the same
        // point-in-time view even while enrollment runs concurrently.
        let entries = self.store.all_entries()?;

        let mut results = Vec::with_capacity(regions.len());
        for region in regions {
            results.push(self.recognize_one(image, region, &entries).await);
        }
        Ok(results)
    }

    async fn recognize_one(
        &self,
        image: &RgbImage,
        region: FaceRegion,
        entries: &[mien_core::LabeledEmbedding],
    ) -> FaceRecognitionResult {
        let failed = |error: String| FaceRecognitionResult {
            region,
            ranked: Vec::new(),
            identities: Vec::new(),
            unknown_probability: 1.0,
            error: Some(error),
        };

        let crop = match crop_region(image, region) {
            Ok(crop) => crop,
            Err(e) => return failed(e.to_string()),
        };
        let query = match self.engine.embed(crop).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::debug!(?region, error = %e, "region yielded no embedding");
                return failed(e.to_string());
            }
        };
        let ranked = match matcher::rank(&query, entries) {
            Ok(ranked) => ranked,
            Err(e) => {
                tracing::error!(?region, error = %e, "store does not match active model");
                return failed(e.to_string());
            }
        };

        let scored = matcher::score(&ranked, self.unknown_threshold);
        FaceRecognitionResult {
            region,
            ranked,
            identities: scored.identities,
            unknown_probability: scored.unknown_probability,
            error: None,
        }
    }

    /// Drop every enrolled embedding.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.clear()?;
        tracing::info!("face store cleared");
        Ok(())
    }

    pub fn enrolled_count(&self) -> Result<usize, StoreError> {
        self.store.len()
    }

    pub fn embedding_dimension(&self) -> usize {
        self.engine.dimension()
    }

    pub fn unknown_threshold(&self) -> Option<f32> {
        self.unknown_threshold
    }

    /// Audit side effect: keep a copy of the enrolled crop on disk. A write
    /// failure is logged and never fails the annotation.
    fn persist_audit_crop(&self, label: &str, crop: &RgbImage) {
        let Some(dir) = &self.audit_dir else {
            return;
        };
        let filename = format!(
            "{}-{}-{}.png",
            sanitize_label(label),
            chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
            uuid::Uuid::new_v4()
        );
        let path = dir.join(filename);
        match crop.save(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "audit crop saved"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to save audit crop")
            }
        }
    }
}

/// Bounds-check a region and cut it out of the source image.
fn crop_region(image: &RgbImage, region: FaceRegion) -> Result<RgbImage, InvalidRegion> {
    let (width, height) = image.dimensions();
    region.validate(width, height)?;
    Ok(image::imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image())
}

/// Labels feed into audit filenames; anything outside [A-Za-z0-9_-] is
/// replaced.
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::doubles::{FailingEmbedder, FixedEmbedder};
    use crate::engine::spawn_engine;
    use mien_core::Embedding;

    fn service_with(extractor: Box<dyn mien_core::EmbeddingExtractor>) -> RecognitionService {
        RecognitionService::new(
            Arc::new(FaceStore::new()),
            spawn_engine(extractor),
            None,
            None,
        )
    }

    fn region(x: u32, y: u32, width: u32, height: u32) -> FaceRegion {
        FaceRegion { x, y, width, height }
    }

    #[tokio::test]
    async fn train_enrolls_each_annotation() {
        let service = service_with(Box::new(FixedEmbedder { vector: vec![1.0, 2.0] }));
        let image = RgbImage::new(100, 100);
        let annotations = vec![
            TrainAnnotation { region: region(0, 0, 50, 50), label: "alice".into() },
            TrainAnnotation { region: region(50, 50, 50, 50), label: "bob".into() },
        ];

        let outcomes = service.train(&image, &annotations).await;
        assert!(outcomes.iter().all(|o| o.enrolled && o.error.is_none()));
        assert_eq!(service.enrolled_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn train_partial_failure_keeps_valid_annotation() {
        let service = service_with(Box::new(FixedEmbedder { vector: vec![1.0, 2.0] }));
        let image = RgbImage::new(100, 100);
        let annotations = vec![
            TrainAnnotation { region: region(90, 90, 50, 50), label: "alice".into() },
            TrainAnnotation { region: region(10, 10, 20, 20), label: "bob".into() },
        ];

        let outcomes = service.train(&image, &annotations).await;
        assert!(!outcomes[0].enrolled);
        assert!(outcomes[0].error.as_deref().unwrap().contains("invalid region"));
        assert!(outcomes[1].enrolled);
        // The store gained exactly one entry.
        assert_eq!(service.enrolled_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn train_rejects_empty_label() {
        let service = service_with(Box::new(FixedEmbedder { vector: vec![1.0] }));
        let image = RgbImage::new(10, 10);
        let annotations = vec![TrainAnnotation { region: region(0, 0, 10, 10), label: String::new() }];

        let outcomes = service.train(&image, &annotations).await;
        assert!(!outcomes[0].enrolled);
        assert_eq!(service.enrolled_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn train_reports_extraction_failure_per_annotation() {
        let service = service_with(Box::new(FailingEmbedder));
        let image = RgbImage::new(10, 10);
        let annotations = vec![TrainAnnotation { region: region(0, 0, 10, 10), label: "alice".into() }];

        let outcomes = service.train(&image, &annotations).await;
        assert!(!outcomes[0].enrolled);
        assert!(outcomes[0].error.as_deref().unwrap().contains("extraction failed"));
    }

    #[tokio::test]
    async fn recognize_ranks_against_enrolled_faces() {
        let service = service_with(Box::new(FixedEmbedder { vector: vec![0.0, 0.0] }));
        service.store.insert("alice", Embedding::new(vec![0.0, 0.0])).unwrap();
        service.store.insert("bob", Embedding::new(vec![3.0, 4.0])).unwrap();

        let image = RgbImage::new(64, 64);
        let results = service
            .recognize(&image, &[region(0, 0, 32, 32)])
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.error.is_none());
        assert_eq!(result.ranked[0].label, "alice");
        assert!(result.ranked[0].distance.abs() < 1e-6);
        assert_eq!(result.ranked[1].label, "bob");
        assert!((result.ranked[1].distance - 5.0).abs() < 1e-6);
        assert!((result.identities[0].probability - 1.0).abs() < 1e-6);
        assert!((result.identities[1].probability - 0.2).abs() < 1e-6);
        assert_eq!(result.unknown_probability, 0.0);
    }

    #[tokio::test]
    async fn recognize_empty_store_reports_unknown() {
        let service = service_with(Box::new(FixedEmbedder { vector: vec![1.0, 1.0] }));
        let image = RgbImage::new(64, 64);
        let results = service
            .recognize(&image, &[region(0, 0, 64, 64)])
            .await
            .unwrap();

        assert!(results[0].error.is_none());
        assert!(results[0].ranked.is_empty());
        assert_eq!(results[0].unknown_probability, 1.0);
    }

    #[tokio::test]
    async fn recognize_without_regions_uses_full_frame() {
        let service = service_with(Box::new(FixedEmbedder { vector: vec![1.0] }));
        let image = RgbImage::new(48, 32);
        let results = service.recognize(&image, &[]).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].region, FaceRegion::full_frame(48, 32));
    }

    #[tokio::test]
    async fn recognize_scopes_bad_region_to_its_result() {
        let service = service_with(Box::new(FixedEmbedder { vector: vec![1.0] }));
        service.store.insert("alice", Embedding::new(vec![1.0])).unwrap();

        let image = RgbImage::new(64, 64);
        let results = service
            .recognize(&image, &[region(60, 60, 20, 20), region(0, 0, 64, 64)])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].error.is_some());
        assert!(results[0].ranked.is_empty());
        assert_eq!(results[0].unknown_probability, 1.0);
        assert!(results[1].error.is_none());
        assert_eq!(results[1].ranked[0].label, "alice");
    }

    #[tokio::test]
    async fn recognize_reports_dimension_mismatch_against_store() {
        // Store filled by a 3-dim model, queries answered by a 2-dim one.
        let service = service_with(Box::new(FixedEmbedder { vector: vec![1.0, 2.0] }));
        service
            .store
            .insert("alice", Embedding::new(vec![1.0, 2.0, 3.0]))
            .unwrap();

        let image = RgbImage::new(16, 16);
        let results = service.recognize(&image, &[]).await.unwrap();
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let service = service_with(Box::new(FixedEmbedder { vector: vec![1.0] }));
        service.store.insert("alice", Embedding::new(vec![1.0])).unwrap();
        service.clear().unwrap();
        service.clear().unwrap();
        assert_eq!(service.enrolled_count().unwrap(), 0);
    }

    #[test]
    fn sanitize_label_replaces_path_separators() {
        assert_eq!(sanitize_label("alice/..\\evil"), "alice___evil");
        assert_eq!(sanitize_label("bob-2_ok"), "bob-2_ok");
    }

    #[test]
    fn crop_region_cuts_requested_rectangle() {
        let mut image = RgbImage::new(10, 10);
        image.put_pixel(5, 5, image::Rgb([255, 0, 0]));
        let crop = crop_region(&image, region(4, 4, 3, 3)).unwrap();
        assert_eq!(crop.dimensions(), (3, 3));
        assert_eq!(crop.get_pixel(1, 1), &image::Rgb([255, 0, 0]));
    }

    #[test]
    fn crop_region_rejects_out_of_bounds() {
        let image = RgbImage::new(10, 10);
        assert!(crop_region(&image, region(8, 8, 5, 5)).is_err());
        assert!(crop_region(&image, region(0, 0, 0, 5)).is_err());
    }
}
