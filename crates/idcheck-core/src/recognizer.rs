//! ArcFace face embedding via ONNX Runtime.
//!
//! Produces 512-dimensional L2-normalized embeddings from face crops using
//! the w600k_r50 ArcFace model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, unlike SCRFD
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face embedder.
pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Compute the embedding for one detected face.
    ///
    /// Faces with landmarks are aligned to the canonical 112×112 position;
    /// otherwise the bounding-box crop is resized directly.
    pub fn encode(
        &mut self,
        image: &DynamicImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let gray = image.to_luma8();

        let canonical = match &face.landmarks {
            Some(landmarks) => alignment::align_face(&gray, landmarks),
            None => crop_and_resize(&gray, face),
        };

        let input = preprocess(&canonical);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
        })
    }
}

/// Fallback canonicalization when the detector reported no landmarks.
fn crop_and_resize(gray: &GrayImage, face: &BoundingBox) -> GrayImage {
    let clamped = face.clamped(gray.width(), gray.height());
    let crop = image::imageops::crop_imm(
        gray,
        clamped.x1 as u32,
        clamped.y1 as u32,
        clamped.width().max(1.0) as u32,
        clamped.height().max(1.0) as u32,
    )
    .to_image();
    image::imageops::resize(&crop, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
}

/// Turn a 112×112 grayscale crop into the NCHW float tensor ArcFace expects.
fn preprocess(canonical: &GrayImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in canonical.enumerate_pixels() {
        let value = (pixel.0[0] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        let (tx, ty) = (x as usize, y as usize);
        if tx < size && ty < size {
            tensor[[0, 0, ty, tx]] = value;
            tensor[[0, 1, ty, tx]] = value;
            tensor[[0, 2, ty, tx]] = value;
        }
    }

    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape() {
        let canonical = GrayImage::from_pixel(112, 112, image::Luma([128]));
        let tensor = preprocess(&canonical);
        assert_eq!(tensor.shape(), &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let canonical = GrayImage::from_pixel(112, 112, image::Luma([128]));
        let tensor = preprocess(&canonical);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_replicates_channels() {
        let canonical = GrayImage::from_pixel(112, 112, image::Luma([100]));
        let tensor = preprocess(&canonical);
        for y in [0usize, 55, 111] {
            for x in [0usize, 55, 111] {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }

    #[test]
    fn test_l2_normalize_unit_norm() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_crop_and_resize_output_size() {
        let gray = GrayImage::from_pixel(300, 200, image::Luma([50]));
        let face = BoundingBox {
            x1: 40.0,
            y1: 30.0,
            x2: 140.0,
            y2: 150.0,
            confidence: 0.9,
            landmarks: None,
        };
        let out = crop_and_resize(&gray, &face);
        assert_eq!((out.width(), out.height()), (ALIGNED_SIZE, ALIGNED_SIZE));
    }
}
