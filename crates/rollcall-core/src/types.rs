/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Return a copy with every coordinate (landmarks included) multiplied by `factor`.
    ///
    /// Used to map boxes found on a downscaled frame back onto the full frame.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }

    /// Right edge (x + width).
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge (y + height).
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Face signature: a fixed-length embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub values: Vec<f32>,
    /// Model version that produced this signature (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Signature {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance. Mismatched lengths compare over the shorter prefix.
    pub fn euclidean_distance(&self, other: &Signature) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Signature::new(vec![0.0, 0.0]);
        let b = Signature::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(b.euclidean_distance(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance_uses_shorter_prefix() {
        let a = Signature::new(vec![1.0, 0.0]);
        let b = Signature::new(vec![1.0, 0.0, 9.0]);
        assert_eq!(a.euclidean_distance(&b), 0.0);
    }

    #[test]
    fn test_bbox_scaled() {
        let mut b = bbox(10.0, 20.0, 30.0, 40.0);
        b.landmarks = Some([(1.0, 2.0); 5]);
        let s = b.scaled(4.0);
        assert_eq!((s.x, s.y, s.width, s.height), (40.0, 80.0, 120.0, 160.0));
        assert_eq!(s.right(), 160.0);
        assert_eq!(s.bottom(), 240.0);
        assert_eq!(s.landmarks.unwrap()[0], (4.0, 8.0));
        assert_eq!(s.confidence, b.confidence);
    }
}
