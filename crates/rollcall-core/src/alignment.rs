//! Five-point face alignment to the canonical 112x112 ArcFace crop.
//!
//! Fits a 4-DOF similarity (uniform scale, rotation, translation) in closed
//! form and resamples the frame bilinearly through its inverse.

/// ArcFace reference landmarks for a 112x112 output.
pub const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// `dst = [[a, -b], [b, a]] * src + [tx, ty]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares similarity mapping `src` points onto `dst` points.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = centroid(src);
        let (mdx, mdy) = centroid(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut norm = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }

        if norm < 1e-12 {
            return Self { a: 1.0, b: 0.0, tx: mdx - msx, ty: mdy - msy };
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// The inverse mapping, or `None` for a degenerate (zero-scale) transform.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Bilinear sample with zero outside the frame.
fn sample(frame: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let (fx, fy) = (x - x0, y - y0);
    let at = |px: f32, py: f32| -> f32 {
        if px < 0.0 || py < 0.0 || px >= width as f32 || py >= height as f32 {
            0.0
        } else {
            frame[py as usize * width + px as usize] as f32
        }
    };
    at(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + at(x0 + 1.0, y0) * fx * (1.0 - fy)
        + at(x0, y0 + 1.0) * (1.0 - fx) * fy
        + at(x0 + 1.0, y0 + 1.0) * fx * fy
}

/// Warp a grayscale face to the canonical `ALIGNED_SIZE`² crop.
pub fn align_face(frame: &[u8], width: u32, height: u32, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let Some(back) = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112).inverse() else {
        return vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
    };

    (0..ALIGNED_SIZE * ALIGNED_SIZE)
        .map(|i| {
            let (sx, sy) = back.apply(((i % ALIGNED_SIZE) as f32, (i / ALIGNED_SIZE) as f32));
            sample(frame, w, h, sx, sy).round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_estimate() {
        let m = Similarity::estimate(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112);
        assert!((m.a - 1.0).abs() < 1e-4, "a = {}", m.a);
        assert!(m.b.abs() < 1e-4, "b = {}", m.b);
        assert!(m.tx.abs() < 1e-3 && m.ty.abs() < 1e-3);
    }

    #[test]
    fn test_half_scale_estimate() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 - 4.0));
        let m = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((m.a - 0.5).abs() < 1e-4, "a = {}", m.a);
        let (x, y) = m.apply(src[2]);
        assert!((x - REFERENCE_LANDMARKS_112[2].0).abs() < 1e-3);
        assert!((y - REFERENCE_LANDMARKS_112[2].1).abs() < 1e-3);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let m = Similarity { a: 0.8, b: 0.3, tx: 12.0, ty: -7.0 };
        let inv = m.inverse().unwrap();
        let (x, y) = inv.apply(m.apply((33.0, 41.0)));
        assert!((x - 33.0).abs() < 1e-3 && (y - 41.0).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_inverse() {
        let m = Similarity { a: 0.0, b: 0.0, tx: 1.0, ty: 1.0 };
        assert!(m.inverse().is_none());
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = vec![128u8; 640 * 480];
        let aligned = align_face(&frame, 640, 480, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.len(), ALIGNED_SIZE * ALIGNED_SIZE);
        // Identity alignment inside a uniform frame stays uniform away from the border.
        assert_eq!(aligned[56 * ALIGNED_SIZE + 56], 128);
    }
}
