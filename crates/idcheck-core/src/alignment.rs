//! Face alignment via a 4-DOF similarity transform.
//!
//! Warps a detected face to the canonical 112×112 InsightFace landmark
//! positions before embedding extraction.

use image::GrayImage;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Side length of the aligned output crop.
pub const ALIGNED_SIZE: u32 = 112;

/// Align a detected face to the canonical 112×112 crop.
pub fn align_face(gray: &GrayImage, landmarks: &[(f32, f32); 5]) -> GrayImage {
    let matrix = similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
    warp_affine(gray, &matrix, ALIGNED_SIZE)
}

/// Estimate a 2×3 similarity transform (scale, rotation, translation) from
/// `src` to `dst` landmarks by least squares.
///
/// Returns [a, -b, tx, b, a, ty] for the matrix
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Normal equations for A * [a, b, tx, ty]^T = B, where each point pair
    // contributes the two rows [sx, -sy, 1, 0] -> dx and [sy, sx, 0, 1] -> dy.
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];

        for (row, rhs) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atb[j] += row[j] * rhs;
            }
        }
    }

    let [a, b, tx, ty] = solve_4x4(ata, atb);
    [a, -b, tx, b, a, ty]
}

/// Gaussian elimination with partial pivoting for the 4×4 normal equations.
fn solve_4x4(ata: [[f32; 4]; 4], atb: [f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&a, &b| {
                m[a][col]
                    .abs()
                    .partial_cmp(&m[b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0]; // degenerate landmarks: identity-ish
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    x
}

/// Apply the similarity transform, sampling with bilinear interpolation.
/// Out-of-bounds source pixels read as black.
fn warp_affine(gray: &GrayImage, matrix: &[f32; 6], out_size: u32) -> GrayImage {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // Invert the rotation-scale part: M = [[a, -b], [b, a]], det = a² + b².
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return GrayImage::new(out_size, out_size);
    }
    let (ia, ib) = (a / det, b / det);

    let (src_w, src_h) = (gray.width() as i32, gray.height() as i32);
    let sample = |x: i32, y: i32| -> f32 {
        if x >= 0 && x < src_w && y >= 0 && y < src_h {
            gray.get_pixel(x as u32, y as u32).0[0] as f32
        } else {
            0.0
        }
    };

    GrayImage::from_fn(out_size, out_size, |ox, oy| {
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i32;
        let y0 = sy.floor() as i32;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let value = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + sample(x0 + 1, y0) * fx * (1.0 - fy)
            + sample(x0, y0 + 1) * (1.0 - fx) * fy
            + sample(x0 + 1, y0 + 1) * fx * fy;

        image::Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_when_landmarks_match_reference() {
        let m = similarity_transform(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_halving_transform_for_doubled_landmarks() {
        let doubled: [(f32, f32); 5] = std::array::from_fn(|i| {
            let (x, y) = REFERENCE_LANDMARKS_112[i];
            (x * 2.0, y * 2.0)
        });
        let m = similarity_transform(&doubled, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn test_align_output_size() {
        let gray = GrayImage::from_pixel(200, 200, image::Luma([128]));
        let landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        let aligned = align_face(&gray, &landmarks);
        assert_eq!((aligned.width(), aligned.height()), (ALIGNED_SIZE, ALIGNED_SIZE));
    }

    #[test]
    fn test_landmark_maps_to_reference_position() {
        // Paint a bright patch at the left-eye landmark and check it lands
        // near the reference left-eye position after alignment.
        let mut gray = GrayImage::new(200, 200);
        let landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in -2i32..=2 {
            for dx in -2i32..=2 {
                let x = (landmarks[0].0 as i32 + dx) as u32;
                let y = (landmarks[0].1 as i32 + dy) as u32;
                gray.put_pixel(x, y, image::Luma([255]));
            }
        }

        let aligned = align_face(&gray, &landmarks);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as i32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as i32;
        let mut max_val = 0u8;
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                let x = (ref_x + dx) as u32;
                let y = (ref_y + dy) as u32;
                if x < ALIGNED_SIZE && y < ALIGNED_SIZE {
                    max_val = max_val.max(aligned.get_pixel(x, y).0[0]);
                }
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }
}
