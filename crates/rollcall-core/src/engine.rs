//! The face-detection/signature seam used by enrollment and the live loop.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Signature};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// Default same-person tolerance: Euclidean distance between L2-normalized
/// ArcFace signatures (≈ cosine similarity 0.40).
pub const DEFAULT_MATCH_TOLERANCE: f32 = 1.10;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Face detection, signature extraction and the same-person decision.
pub trait FaceEngine {
    /// Locate faces in an RGB frame, best detection first.
    fn detect_faces(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, EngineError>;

    /// Compute one signature per box, in the same order as `boxes`.
    fn encode_faces(
        &mut self,
        frame: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Signature>, EngineError>;

    /// Distance between two signatures. Smaller is more alike.
    fn distance(&self, a: &Signature, b: &Signature) -> f32;

    /// Whether a distance is close enough to call it the same person.
    fn same_person(&self, distance: f32) -> bool;
}

/// SCRFD detection + ArcFace signatures, compared by Euclidean distance.
pub struct ArcFaceEngine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    tolerance: f32,
}

impl ArcFaceEngine {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(scrfd_path: &Path, arcface_path: &Path, tolerance: f32) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        tracing::info!(tolerance, "face engine ready");
        Ok(Self {
            detector,
            recognizer,
            tolerance,
        })
    }
}

impl FaceEngine for ArcFaceEngine {
    fn detect_faces(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        Ok(self.detector.detect(frame)?)
    }

    fn encode_faces(
        &mut self,
        frame: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Signature>, EngineError> {
        boxes
            .iter()
            .map(|face| self.recognizer.extract(frame, face).map_err(EngineError::from))
            .collect()
    }

    fn distance(&self, a: &Signature, b: &Signature) -> f32 {
        a.euclidean_distance(b)
    }

    fn same_person(&self, distance: f32) -> bool {
        distance <= self.tolerance
    }
}
