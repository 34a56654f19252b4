//! Pipeline failure taxonomy and its mapping onto response codes.

use crate::response::ResponseCode;
use idcheck_core::DocumentError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unsupported {part} media type: {media_type}")]
    UnsupportedMediaType { part: &'static str, media_type: String },

    #[error("could not decode {part}: {source}")]
    InvalidImage {
        part: &'static str,
        #[source]
        source: DocumentError,
    },

    #[error("no face detected on the document")]
    NoFaceOnDocument,

    #[error("face detection error: {0}")]
    FaceDetection(String),

    #[error("could not detect faces clearly in one or both images")]
    FacesNotClear,

    #[error("processing error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn code(&self) -> ResponseCode {
        match self {
            PipelineError::UnsupportedMediaType { .. } => ResponseCode::UnsupportedFileType,
            PipelineError::InvalidImage { .. } => ResponseCode::InvalidInput,
            PipelineError::NoFaceOnDocument => ResponseCode::NoFaceDetected,
            PipelineError::FaceDetection(_) => ResponseCode::FaceDetectionError,
            PipelineError::FacesNotClear => ResponseCode::FaceDetectionFailed,
            PipelineError::Internal(_) => ResponseCode::ProcessingError,
        }
    }
}
