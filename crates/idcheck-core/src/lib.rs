//! idcheck-core — imaging and face capabilities for identity-document checks.
//!
//! Rasterizes uploaded documents (PDF page 1 or direct images), detects the
//! printed face with SCRFD and extracts ArcFace embeddings for similarity
//! scoring, all via ONNX Runtime on CPU.

pub mod alignment;
pub mod detector;
pub mod document;
pub mod recognizer;
pub mod types;

pub use detector::{DetectorError, FaceDetector};
pub use document::{rasterize_document, DocumentError};
pub use recognizer::{FaceEncoder, RecognizerError};
pub use types::{compare_embeddings, BoundingBox, Embedding, SimilarityResult};

/// Default similarity threshold for a positive identity match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;
