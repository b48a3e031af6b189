//! rollcall-core: face matching and attendance bookkeeping.
//!
//! Uses SCRFD for face detection and ArcFace for face signatures, both
//! running via ONNX Runtime, behind the [`FaceEngine`] trait. Enrollment,
//! roster and attendance log live here too so the live loop only wires them.

pub mod alignment;
pub mod attendance;
pub mod detector;
pub mod engine;
pub mod enrollment;
pub mod matching;
pub mod names;
pub mod recognizer;
pub mod roster;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use attendance::{AttendanceError, AttendanceLog, Marked, UNKNOWN_STUDENT_ID};
pub use detector::FaceDetector;
pub use engine::{ArcFaceEngine, EngineError, FaceEngine, DEFAULT_MATCH_TOLERANCE};
pub use enrollment::{Enrollment, EnrollmentError, EnrollmentReport, SkipReason};
pub use matching::{match_signature, MatchOutcome};
pub use names::normalize_name;
pub use recognizer::FaceRecognizer;
pub use roster::{Roster, RosterError, RosterRecord};
pub use types::{BoundingBox, Signature};

use std::path::PathBuf;

/// SCRFD detection model file name.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/rollcall/models`, falling back to `~/.local/share/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("models")
}
