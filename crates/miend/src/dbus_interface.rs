use image::RgbImage;
use mien_core::types::{FaceRegion, TrainAnnotation};
use zbus::interface;

use crate::service::RecognitionService;

/// D-Bus interface for the Mien face recognition daemon.
///
/// Bus name: org.freedesktop.Mien1
/// Object path: /org/freedesktop/Mien1
///
/// Images travel as raw encoded bytes; structured payloads travel as JSON
/// strings. Decoding happens here — the core never touches raw bytes.
pub struct MienService {
    service: RecognitionService,
}

impl MienService {
    pub fn new(service: RecognitionService) -> Self {
        Self { service }
    }
}

#[interface(name = "org.freedesktop.Mien1")]
impl MienService {
    /// Enroll labeled face regions from an image. `annotations` is a JSON
    /// array of `{region: {x, y, width, height}, label}`. Returns a JSON
    /// array of per-annotation outcomes.
    async fn train(&self, image: Vec<u8>, annotations: &str) -> zbus::fdo::Result<String> {
        let image = decode_image(&image)?;
        let annotations: Vec<TrainAnnotation> = serde_json::from_str(annotations)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("annotations: {e}")))?;
        tracing::info!(annotations = annotations.len(), "train requested");

        let outcomes = self.service.train(&image, &annotations).await;
        to_json(&outcomes)
    }

    /// Rank enrolled identities for each region of an image. `regions` is a
    /// JSON array of `{x, y, width, height}`; an empty array means the
    /// whole frame. Returns a JSON array of recognition results in request
    /// order.
    async fn recognize(&self, image: Vec<u8>, regions: &str) -> zbus::fdo::Result<String> {
        let image = decode_image(&image)?;
        let regions: Vec<FaceRegion> = serde_json::from_str(regions)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("regions: {e}")))?;
        tracing::info!(regions = regions.len(), "recognize requested");

        let results = self
            .service
            .recognize(&image, &regions)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        to_json(&results)
    }

    /// Drop every enrolled embedding.
    async fn clear(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("clear requested");
        self.service
            .clear()
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(true)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let enrolled = self
            .service
            .enrolled_count()
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "enrolled": enrolled,
            "embedding_dimension": self.service.embedding_dimension(),
            "unknown_distance_threshold": self.service.unknown_threshold(),
        })
        .to_string())
    }
}

fn decode_image(bytes: &[u8]) -> Result<RgbImage, zbus::fdo::Error> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("image: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}
