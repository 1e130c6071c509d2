use image::RgbImage;
use mien_core::{EmbedderError, Embedding, EmbeddingExtractor};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Embedder(#[from] EmbedderError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Embed {
        crop: RgbImage,
        reply: oneshot::Sender<Result<Embedding, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    dimension: usize,
}

impl EngineHandle {
    /// Dimensionality of the embeddings this engine produces.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Extract an embedding from a face crop on the engine thread.
    pub async fn embed(&self, crop: RgbImage) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                crop,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the extraction engine on a dedicated OS thread.
///
/// The thread owns the extractor — ONNX sessions need `&mut self`, so all
/// inference serializes here while handlers merely await replies. The face
/// store lock is never held across an engine round-trip.
pub fn spawn_engine(mut extractor: Box<dyn EmbeddingExtractor>) -> EngineHandle {
    let dimension = extractor.dimension();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("mien-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed { crop, reply } => {
                        let result = extractor.extract(&crop).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx, dimension }
}

/// Extractor doubles shared by engine and service tests.
#[cfg(test)]
pub(crate) mod doubles {
    use super::*;

    /// Test double returning the same vector for every crop.
    pub(crate) struct FixedEmbedder {
        pub vector: Vec<f32>,
    }

    impl EmbeddingExtractor for FixedEmbedder {
        fn dimension(&self) -> usize {
            self.vector.len()
        }

        fn extract(&mut self, _crop: &RgbImage) -> Result<Embedding, EmbedderError> {
            Ok(Embedding::new(self.vector.clone()))
        }
    }

    /// Test double that always fails extraction.
    pub(crate) struct FailingEmbedder;

    impl EmbeddingExtractor for FailingEmbedder {
        fn dimension(&self) -> usize {
            512
        }

        fn extract(&mut self, _crop: &RgbImage) -> Result<Embedding, EmbedderError> {
            Err(EmbedderError::ExtractionFailed("no face in crop".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::doubles::{FailingEmbedder, FixedEmbedder};
    use super::*;

    #[tokio::test]
    async fn embed_returns_extractor_output() {
        let engine = spawn_engine(Box::new(FixedEmbedder {
            vector: vec![0.5, -0.5, 1.0],
        }));
        assert_eq!(engine.dimension(), 3);

        let crop = RgbImage::new(8, 8);
        let embedding = engine.embed(crop).await.unwrap();
        assert_eq!(embedding.values, vec![0.5, -0.5, 1.0]);
    }

    #[tokio::test]
    async fn embed_propagates_extraction_failure() {
        let engine = spawn_engine(Box::new(FailingEmbedder));
        let err = engine.embed(RgbImage::new(8, 8)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Embedder(EmbedderError::ExtractionFailed(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_embeds_all_answer() {
        let engine = spawn_engine(Box::new(FixedEmbedder {
            vector: vec![1.0, 2.0],
        }));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(
                async move { engine.embed(RgbImage::new(4, 4)).await },
            ));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
    }
}
