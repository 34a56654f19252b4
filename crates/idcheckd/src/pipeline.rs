//! The verification orchestrator.
//!
//! Sequences normalization, face localization, face comparison and field
//! extraction for one request, owns the transient-file lifecycle and maps
//! every failure mode to a stable response code.

use crate::engine::{EngineError, FaceAnalyzer};
use crate::error::PipelineError;
use crate::response::VerificationResponse;
use idcheck_core::{document, DocumentError, SimilarityResult};
use idcheck_extract::{ExtractionBackend, FieldExtractor};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One uploaded file part: raw bytes plus the declared media type.
pub struct UploadedAsset {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

/// Orchestrator policy knobs.
pub struct VerifierOptions {
    /// Similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// When set, a face-comparison failure fails the request instead of
    /// degrading to verified=false.
    pub strict_comparison: bool,
    /// Root directory for per-request transient artifacts.
    pub work_dir: PathBuf,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: idcheck_core::DEFAULT_SIMILARITY_THRESHOLD,
            strict_comparison: false,
            work_dir: std::env::temp_dir(),
        }
    }
}

/// Per-request transient artifacts, scope-released on every exit path.
struct TransientArtifacts {
    dir: tempfile::TempDir,
}

impl TransientArtifacts {
    /// Create a uniquely-named directory under `root` so concurrent requests
    /// never collide.
    fn create(root: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix("idcheck-").tempdir_in(root)?;
        tracing::debug!(dir = %dir.path().display(), "transient artifact directory created");
        Ok(Self { dir })
    }

    fn write(&self, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// The verification pipeline, one instance shared by all requests.
pub struct Verifier<B> {
    engine: Arc<dyn FaceAnalyzer>,
    extractor: FieldExtractor<B>,
    options: VerifierOptions,
}

impl<B: ExtractionBackend> Verifier<B> {
    pub fn new(
        engine: Arc<dyn FaceAnalyzer>,
        extractor: FieldExtractor<B>,
        options: VerifierOptions,
    ) -> Self {
        Self {
            engine,
            extractor,
            options,
        }
    }

    /// Run the full pipeline for one request.
    ///
    /// Every failure mode maps to a stable response code; the HTTP layer
    /// derives the status from the code.
    #[tracing::instrument(name = "verify", skip_all, fields(request_id = %uuid::Uuid::new_v4()))]
    pub async fn verify(&self, document: UploadedAsset, photo: UploadedAsset) -> VerificationResponse {
        match self.run(document, photo).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(error = %error, code = ?error.code(), "verification request failed");
                VerificationResponse::failed(error.code(), error.to_string(), None)
            }
        }
    }

    async fn run(
        &self,
        document: UploadedAsset,
        photo: UploadedAsset,
    ) -> Result<VerificationResponse, PipelineError> {
        // Both media types are checked before any heavy work or artifact
        // creation; an unsupported part must not leave files behind.
        if !document::is_supported_document_type(&document.media_type) {
            return Err(PipelineError::UnsupportedMediaType {
                part: "id_document",
                media_type: document.media_type,
            });
        }
        if !document::is_supported_photo_type(&photo.media_type) {
            return Err(PipelineError::UnsupportedMediaType {
                part: "face_photo",
                media_type: photo.media_type,
            });
        }

        let artifacts = TransientArtifacts::create(&self.options.work_dir).map_err(internal)?;

        let (document_image, document_png) = decode_asset(document, "id_document").await?;
        artifacts.write("document.png", &document_png).map_err(internal)?;

        let (photo_image, photo_png) = decode_asset(photo, "face_photo").await?;
        artifacts.write("photo.png", &photo_png).map_err(internal)?;

        let located = self
            .engine
            .locate_face(document_image)
            .await
            .map_err(|error| match error {
                EngineError::NoFaceOnDocument => PipelineError::NoFaceOnDocument,
                other => PipelineError::FaceDetection(other.to_string()),
            })?;
        tracing::debug!(confidence = located.bbox.confidence, "face located on document");
        artifacts
            .write("document_face.jpg", &encode_jpeg(&located.crop).map_err(internal)?)
            .map_err(internal)?;

        let similarity = match self
            .engine
            .compare_faces(located.crop, photo_image, self.options.similarity_threshold)
            .await
        {
            Ok(result) => result,
            Err(error) if self.options.strict_comparison => {
                return Err(match error {
                    EngineError::FacesNotClear => PipelineError::FacesNotClear,
                    other => PipelineError::FaceDetection(other.to_string()),
                });
            }
            Err(error) => {
                // Recorded, never silently dropped: operators must be able to
                // tell "faces differ" from "comparison subsystem errored".
                tracing::warn!(
                    error = %error,
                    "face comparison failed, continuing with verified=false"
                );
                SimilarityResult {
                    score: 0.0,
                    verified: false,
                }
            }
        };
        tracing::debug!(
            score = similarity.score,
            verified = similarity.verified,
            "faces compared"
        );

        // Extraction never fails the request; degradations are logged inside.
        let fields = self.extractor.extract(&document_png).await;

        Ok(VerificationResponse::completed(fields, similarity))
        // `artifacts` drops here, and on every early return above, removing
        // the per-request directory and everything in it.
    }
}

/// Decode an uploaded asset off the async runtime (pdfium and large image
/// decodes are blocking) and PNG-encode it for the on-disk representation
/// and the extraction call.
async fn decode_asset(
    asset: UploadedAsset,
    part: &'static str,
) -> Result<(DynamicImage, Vec<u8>), PipelineError> {
    let UploadedAsset { bytes, media_type } = asset;
    tokio::task::spawn_blocking(move || -> Result<(DynamicImage, Vec<u8>), DocumentError> {
        let image = document::rasterize_document(&bytes, &media_type)?;
        let png = encode_png(&image)?;
        Ok((image, png))
    })
    .await
    .map_err(internal)?
    .map_err(|source| match source {
        DocumentError::UnsupportedMediaType(media_type) => {
            PipelineError::UnsupportedMediaType { part, media_type }
        }
        source => PipelineError::InvalidImage { part, source },
    })
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, DocumentError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(DocumentError::Decode)?;
    Ok(buf)
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, DocumentError> {
    // JPEG has no alpha; flatten to RGB first.
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .map_err(DocumentError::Decode)?;
    Ok(buf)
}

fn internal<E>(error: E) -> PipelineError
where
    E: Into<anyhow::Error>,
{
    PipelineError::Internal(error.into())
}
