//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three stride levels with NMS post-processing.
//! Detections are returned in the model's decode order, NOT re-ranked by
//! confidence: callers that take the first box rely on "first result, first
//! box" semantics surviving post-processing.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Mapping from the letterboxed model input back to source coordinates.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(path = model_path, outputs = ?output_names, "loaded SCRFD model");

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            stride_indices: discover_output_indices(&output_names),
        })
    }

    /// Detect faces, returning boxes in the model's decode order.
    pub fn detect(&mut self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let gray = image.to_luma8();
        let (input, letterbox) = self.preprocess(&gray);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[slot];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                self.input_size,
                &letterbox,
                &mut detections,
            );
        }

        Ok(nms_keep_order(detections, SCRFD_NMS_THRESHOLD))
    }

    /// Letterbox the grayscale image into a NCHW float tensor.
    ///
    /// The pad value (SCRFD_MEAN) normalizes to exactly 0.0, so only the
    /// resized window needs writing into the zeroed tensor.
    fn preprocess(&self, gray: &GrayImage) -> (Array4<f32>, Letterbox) {
        let side = self.input_size;
        let letterbox = letterbox_params(gray.width(), gray.height(), side);

        let new_w = ((gray.width() as f32) * letterbox.scale).round().max(1.0) as u32;
        let new_h = ((gray.height() as f32) * letterbox.scale).round().max(1.0) as u32;
        let resized = image::imageops::resize(gray, new_w, new_h, FilterType::Triangle);

        let pad_x = letterbox.pad_x.floor() as usize;
        let pad_y = letterbox.pad_y.floor() as usize;

        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let value = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
            let tx = x as usize + pad_x;
            let ty = y as usize + pad_y;
            if tx < side && ty < side {
                // Grayscale replicated into all three channels.
                tensor[[0, 0, ty, tx]] = value;
                tensor[[0, 1, ty, tx]] = value;
                tensor[[0, 2, ty, tx]] = value;
            }
        }

        (tensor, letterbox)
    }
}

/// Compute the letterbox scale and padding for fitting `width × height` into
/// a `side × side` square.
fn letterbox_params(width: u32, height: u32, side: usize) -> Letterbox {
    let side = side as f32;
    let scale = (side / width as f32).min(side / height as f32);
    let new_w = (width as f32 * scale).round();
    let new_h = (height as f32 * scale).round();
    Letterbox {
        scale,
        pad_x: (side - new_w) / 2.0,
        pad_y: (side - new_h) / 2.0,
    }
}

/// Discover output tensor ordering by name ("score_8", "bbox_16", ...);
/// fall back to the standard positional layout when names are generic.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut indices = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => indices[slot] = (s, b, k),
            _ => {
                tracing::debug!(?names, "SCRFD output names not recognized, using positional mapping");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    indices
}

/// Decode one stride level, appending detections in anchor order.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
    out: &mut Vec<BoundingBox>,
) {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let unmap = |v: f32, pad: f32| (v - pad) / letterbox.scale;

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCRFD_CONFIDENCE_THRESHOLD {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = ((cell % grid) * stride) as f32;
        let anchor_cy = ((cell / grid) * stride) as f32;

        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = unmap(anchor_cx - bboxes[off] * stride as f32, letterbox.pad_x);
        let y1 = unmap(anchor_cy - bboxes[off + 1] * stride as f32, letterbox.pad_y);
        let x2 = unmap(anchor_cx + bboxes[off + 2] * stride as f32, letterbox.pad_x);
        let y2 = unmap(anchor_cy + bboxes[off + 3] * stride as f32, letterbox.pad_y);

        let kps_off = idx * 10;
        let landmarks = if kps_off + 9 < kps.len() {
            let mut points = [(0.0f32, 0.0f32); 5];
            for (i, point) in points.iter_mut().enumerate() {
                *point = (
                    unmap(anchor_cx + kps[kps_off + i * 2] * stride as f32, letterbox.pad_x),
                    unmap(anchor_cy + kps[kps_off + i * 2 + 1] * stride as f32, letterbox.pad_y),
                );
            }
            Some(points)
        } else {
            None
        };

        out.push(BoundingBox {
            x1,
            y1,
            x2,
            y2,
            confidence: score,
            landmarks,
        });
    }
}

/// Non-Maximum Suppression that preserves input order.
///
/// Suppression decisions are made on a confidence-ranked view, but survivors
/// are emitted in their original decode order.
fn nms_keep_order(detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    let mut ranked: Vec<usize> = (0..detections.len()).collect();
    ranked.sort_by(|&a, &b| {
        detections[b]
            .confidence
            .partial_cmp(&detections[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; detections.len()];
    for (rank, &i) in ranked.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        for &j in &ranked[rank + 1..] {
            if !suppressed[j] && detections[i].iou(&detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    detections
        .into_iter()
        .enumerate()
        .filter_map(|(i, det)| (!suppressed[i]).then_some(det))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, size: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x1,
            y1,
            x2: x1 + size,
            y2: y1 + size,
            confidence,
            landmarks: None,
        }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            det(0.0, 0.0, 100.0, 0.9),
            det(5.0, 5.0, 100.0, 0.8),
            det(200.0, 200.0, 50.0, 0.7),
        ];
        let kept = nms_keep_order(detections, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_preserves_decode_order() {
        // The lower-confidence box comes first in decode order and does not
        // overlap the higher-confidence one; it must stay first.
        let detections = vec![
            det(0.0, 0.0, 50.0, 0.6),
            det(300.0, 300.0, 50.0, 0.95),
        ];
        let kept = nms_keep_order(detections, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.6).abs() < 1e-6, "decode order must survive NMS");
        assert!((kept[1].confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms_keep_order(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let lb = letterbox_params(320, 240, 640);
        // Map a source point into letterboxed space and back.
        let (sx, sy) = (100.0f32, 50.0f32);
        let bx = sx * lb.scale + lb.pad_x;
        let by = sy * lb.scale + lb.pad_y;
        let rx = (bx - lb.pad_x) / lb.scale;
        let ry = (by - lb.pad_y) / lb.scale;
        assert!((rx - sx).abs() < 0.1);
        assert!((ry - sy).abs() < 0.1);
    }

    #[test]
    fn test_letterbox_square_input_has_no_padding() {
        let lb = letterbox_params(640, 640, 640);
        assert!((lb.scale - 1.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 0.0);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "kps_8",
            "kps_16", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32",
            "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_stride_keeps_anchor_order() {
        // Two confident anchors at stride 32; the second has higher score but
        // must come second in the output.
        let grid = 640 / 32;
        let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; num_anchors];
        scores[4] = 0.6;
        scores[100] = 0.9;
        let bboxes = vec![1.0f32; num_anchors * 4];
        let kps = vec![0.0f32; num_anchors * 10];
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };

        let mut out = Vec::new();
        decode_stride(&scores, &bboxes, &kps, 32, 640, &lb, &mut out);

        assert_eq!(out.len(), 2);
        assert!((out[0].confidence - 0.6).abs() < 1e-6);
        assert!((out[1].confidence - 0.9).abs() < 1e-6);
        assert!(out[0].x1 < out[0].x2 && out[0].y1 < out[0].y2);
    }
}
