//! Inference engine thread.
//!
//! Both ONNX sessions require exclusive access, so a dedicated OS thread owns
//! them and serves requests over an mpsc channel. HTTP handlers hold a
//! clone-safe [`EngineHandle`] and await oneshot replies.

use async_trait::async_trait;
use idcheck_core::{
    compare_embeddings, BoundingBox, DetectorError, Embedding, FaceDetector, FaceEncoder,
    RecognizerError, SimilarityResult,
};
use image::DynamicImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("no face detected on the document")]
    NoFaceOnDocument,
    #[error("could not detect faces clearly in one or both images")]
    FacesNotClear,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// The face selected from a document, with its source crop.
pub struct LocatedFace {
    pub bbox: BoundingBox,
    pub crop: DynamicImage,
}

/// Face capabilities as seen by the orchestrator. Implemented by
/// [`EngineHandle`] in production and by mocks in pipeline tests.
#[async_trait]
pub trait FaceAnalyzer: Send + Sync {
    /// Find the face printed on the document and crop it out.
    async fn locate_face(&self, document: DynamicImage) -> Result<LocatedFace, EngineError>;

    /// Embed the first face of each image and score their similarity.
    async fn compare_faces(
        &self,
        document_face: DynamicImage,
        photo: DynamicImage,
        threshold: f32,
    ) -> Result<SimilarityResult, EngineError>;
}

enum EngineRequest {
    Locate {
        document: DynamicImage,
        reply: oneshot::Sender<Result<LocatedFace, EngineError>>,
    },
    Compare {
        document_face: DynamicImage,
        photo: DynamicImage,
        threshold: f32,
        reply: oneshot::Sender<Result<SimilarityResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

#[async_trait]
impl FaceAnalyzer for EngineHandle {
    async fn locate_face(&self, document: DynamicImage) -> Result<LocatedFace, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Locate {
                document,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn compare_faces(
        &self,
        document_face: DynamicImage,
        photo: DynamicImage,
        threshold: f32,
    ) -> Result<SimilarityResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Compare {
                document_face,
                photo,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously and fails fast if either is missing,
/// then enters the request loop.
pub fn spawn_engine(scrfd_path: &str, arcface_path: &str) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(scrfd_path)?;
    tracing::info!(path = scrfd_path, "SCRFD detector loaded");

    let mut encoder = FaceEncoder::load(arcface_path)?;
    tracing::info!(path = arcface_path, "ArcFace encoder loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("idcheck-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                match request {
                    EngineRequest::Locate { document, reply } => {
                        let _ = reply.send(run_locate(&mut detector, &document));
                    }
                    EngineRequest::Compare {
                        document_face,
                        photo,
                        threshold,
                        reply,
                    } => {
                        let result = run_compare(
                            &mut detector,
                            &mut encoder,
                            &document_face,
                            &photo,
                            threshold,
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Detect faces on the document and crop out the first one.
///
/// First means first in the detector's output order; candidates are never
/// re-ranked by confidence.
fn run_locate(
    detector: &mut FaceDetector,
    document: &DynamicImage,
) -> Result<LocatedFace, EngineError> {
    let faces = detector.detect(document)?;
    let Some(first) = faces.first() else {
        return Err(EngineError::NoFaceOnDocument);
    };
    if faces.len() > 1 {
        tracing::debug!(count = faces.len(), "multiple faces on document, keeping the first");
    }

    let bbox = first.clamped(document.width(), document.height());
    let crop = document.crop_imm(
        bbox.x1 as u32,
        bbox.y1 as u32,
        bbox.width() as u32,
        bbox.height() as u32,
    );

    Ok(LocatedFace { bbox, crop })
}

/// Embed the first face of each image and score them.
fn run_compare(
    detector: &mut FaceDetector,
    encoder: &mut FaceEncoder,
    document_face: &DynamicImage,
    photo: &DynamicImage,
    threshold: f32,
) -> Result<SimilarityResult, EngineError> {
    let document_embedding = embed_first_face(detector, encoder, document_face)?;
    let photo_embedding = embed_first_face(detector, encoder, photo)?;
    Ok(compare_embeddings(
        &document_embedding,
        &photo_embedding,
        threshold,
    ))
}

fn embed_first_face(
    detector: &mut FaceDetector,
    encoder: &mut FaceEncoder,
    image: &DynamicImage,
) -> Result<Embedding, EngineError> {
    let faces = detector.detect(image)?;
    let face = faces.first().ok_or(EngineError::FacesNotClear)?;
    Ok(encoder.encode(image, face)?)
}
