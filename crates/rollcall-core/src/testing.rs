//! Test doubles.

use crate::engine::{EngineError, FaceEngine};
use crate::recognizer::RecognizerError;
use crate::types::{BoundingBox, Signature};
use image::RgbImage;

/// Deterministic engine driven by the top-left pixel of each image.
///
/// Red = number of faces to report, green/blue = signature components.
/// A red value of 255 makes detection fail.
pub(crate) struct StubEngine {
    tolerance: f32,
}

impl StubEngine {
    pub fn with_tolerance(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl FaceEngine for StubEngine {
    fn detect_faces(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        let [faces, _, _] = frame.get_pixel(0, 0).0;
        if faces == 255 {
            return Err(EngineError::Recognizer(RecognizerError::InferenceFailed(
                "stub failure".into(),
            )));
        }
        Ok((0..faces)
            .map(|i| BoundingBox {
                x: i as f32 * 10.0,
                y: 0.0,
                width: 8.0,
                height: 8.0,
                confidence: 1.0 - i as f32 * 0.1,
                landmarks: None,
            })
            .collect())
    }

    fn encode_faces(
        &mut self,
        frame: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Signature>, EngineError> {
        let [_, g, b] = frame.get_pixel(0, 0).0;
        Ok(boxes
            .iter()
            .enumerate()
            .map(|(i, _)| Signature::new(vec![g as f32 + i as f32 * 100.0, b as f32]))
            .collect())
    }

    fn distance(&self, a: &Signature, b: &Signature) -> f32 {
        a.euclidean_distance(b)
    }

    fn same_person(&self, distance: f32) -> bool {
        distance <= self.tolerance
    }
}
