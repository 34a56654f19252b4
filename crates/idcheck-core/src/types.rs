use serde::{Deserialize, Serialize};

/// Corner-form bounding box for a detected face, with optional landmarks.
///
/// Invariant: `x1 < x2` and `y1 < y2`, in pixel coordinates of the image the
/// detection ran on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Clamp the box to an image of the given dimensions, preserving the
    /// corner-ordering invariant.
    pub fn clamped(&self, image_width: u32, image_height: u32) -> BoundingBox {
        let w = image_width as f32;
        let h = image_height as f32;
        let x1 = self.x1.clamp(0.0, w - 1.0);
        let y1 = self.y1.clamp(0.0, h - 1.0);
        BoundingBox {
            x1,
            y1,
            x2: self.x2.clamp(x1 + 1.0, w),
            y2: self.y2.clamp(y1 + 1.0, h),
            confidence: self.confidence,
            landmarks: self.landmarks,
        }
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.width() * self.height() + other.width() * other.height() - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace), L2-normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Euclidean distance to another embedding.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Outcome of comparing two face embeddings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// `1 − euclidean_distance`. Deliberately unclamped: distances above 1.0
    /// produce negative scores, which callers must preserve.
    pub score: f32,
    pub verified: bool,
}

/// Score two embeddings: `score = 1 − distance`, verified at `threshold`.
pub fn compare_embeddings(a: &Embedding, b: &Embedding, threshold: f32) -> SimilarityResult {
    let score = 1.0 - a.euclidean_distance(b);
    SimilarityResult {
        score,
        verified: score >= threshold,
    }
}
