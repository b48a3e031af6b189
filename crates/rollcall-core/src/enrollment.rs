//! Enrollment: build the known-identity signature set from a directory of photos.
//!
//! Each image file contributes at most one identity, named after its file
//! stem. Unreadable images and images without a detectable face are logged
//! and skipped; only a missing directory is fatal.

use crate::engine::FaceEngine;
use crate::matching::{self, MatchOutcome};
use crate::names::normalize_name;
use crate::types::Signature;
use image::{ColorType, DynamicImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("image directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("failed to list {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why an image did not produce an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Undecodable,
    NoFace,
    EngineFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub reason: SkipReason,
    pub detail: String,
}

/// What happened to each file during enrollment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrollmentReport {
    pub files_seen: usize,
    pub decoded: usize,
    pub skipped: Vec<SkippedImage>,
}

impl EnrollmentReport {
    fn skip(&mut self, path: &Path, reason: SkipReason, detail: impl Into<String>) {
        self.skipped.push(SkippedImage {
            path: path.to_path_buf(),
            reason,
            detail: detail.into(),
        });
    }
}

/// Enrolled identities as parallel lists: `names()[i]` owns `signatures()[i]`.
#[derive(Debug, Clone, Default)]
pub struct Enrollment {
    names: Vec<String>,
    signatures: Vec<Signature>,
    sources: Vec<PathBuf>,
    report: EnrollmentReport,
}

impl Enrollment {
    /// Load every image file in `dir` and compute one signature per image.
    pub fn load<E>(dir: &Path, engine: &mut E) -> Result<Self, EnrollmentError>
    where
        E: FaceEngine + ?Sized,
    {
        if !dir.is_dir() {
            return Err(EnrollmentError::DirectoryNotFound(dir.to_path_buf()));
        }

        let read_dir = |source| EnrollmentError::ReadDir {
            path: dir.to_path_buf(),
            source,
        };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_dir)? {
            let path = entry.map_err(read_dir)?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        tracing::info!(dir = %dir.display(), files = files.len(), "enrolling reference photos");

        let mut enrollment = Enrollment::default();
        enrollment.report.files_seen = files.len();

        for (idx, path) in files.iter().enumerate() {
            tracing::debug!(file = %path.display(), "encoding image {}/{}", idx + 1, files.len());
            enrollment.enroll_file(path, engine);
        }

        tracing::info!(
            enrolled = enrollment.len(),
            decoded = enrollment.report.decoded,
            skipped = enrollment.report.skipped.len(),
            "enrollment complete"
        );

        Ok(enrollment)
    }

    fn enroll_file<E>(&mut self, path: &Path, engine: &mut E)
    where
        E: FaceEngine + ?Sized,
    {
        let image = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "unable to load image");
                self.report.skip(path, SkipReason::Undecodable, e.to_string());
                return;
            }
        };
        self.report.decoded += 1;

        let rgb = to_rgb8(image, path);
        let name = normalize_name(&path.file_stem().unwrap_or_default().to_string_lossy());

        let signature = engine
            .detect_faces(&rgb)
            .and_then(|boxes| match boxes.first() {
                Some(first) => {
                    if boxes.len() > 1 {
                        tracing::debug!(
                            file = %path.display(),
                            faces = boxes.len(),
                            "several faces found, using the first"
                        );
                    }
                    engine
                        .encode_faces(&rgb, std::slice::from_ref(first))
                        .map(|sigs| sigs.into_iter().next())
                }
                None => Ok(None),
            });

        match signature {
            Ok(Some(signature)) => {
                tracing::debug!(file = %path.display(), name = %name, "enrolled");
                self.push(name, signature, path.to_path_buf());
            }
            Ok(None) => {
                tracing::warn!(file = %path.display(), "no face found in image");
                self.report.skip(path, SkipReason::NoFace, "no face detected");
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "face encoding failed");
                self.report.skip(path, SkipReason::EngineFailed, e.to_string());
            }
        }
    }

    /// Build an enrollment directly from names and signatures.
    pub fn from_parts(entries: impl IntoIterator<Item = (String, Signature)>) -> Self {
        let mut enrollment = Enrollment::default();
        for (name, signature) in entries {
            enrollment.push(normalize_name(&name), signature, PathBuf::new());
        }
        enrollment
    }

    fn push(&mut self, name: String, signature: Signature, source: PathBuf) {
        self.names.push(name);
        self.signatures.push(signature);
        self.sources.push(source);
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Image file each identity was enrolled from.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn report(&self) -> &EnrollmentReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Match a probe signature against every enrolled identity.
    pub fn identify<E>(&self, engine: &E, probe: &Signature) -> MatchOutcome
    where
        E: FaceEngine + ?Sized,
    {
        matching::match_signature(engine, &self.signatures, probe)
    }
}

/// Coerce any decoded image to 8-bit RGB.
fn to_rgb8(image: DynamicImage, path: &Path) -> image::RgbImage {
    match image.color() {
        ColorType::Rgb8 => {}
        color if color.bytes_per_pixel() / color.channel_count() > 1 => {
            tracing::warn!(file = %path.display(), ?color, "image not 8-bit, converting");
        }
        color => {
            tracing::debug!(file = %path.display(), ?color, "converting to RGB8");
        }
    }
    image.into_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubEngine;
    use image::{ImageBuffer, Rgb, RgbImage};

    /// Write a PNG whose top-left pixel drives the stub engine.
    fn write_face(dir: &Path, file: &str, faces: u8, g: u8, b: u8) {
        let img = RgbImage::from_pixel(16, 16, Rgb([faces, g, b]));
        img.save(dir.join(file)).unwrap();
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let mut engine = StubEngine::with_tolerance(1.0);
        let err = Enrollment::load(Path::new("/nonexistent/photos"), &mut engine).unwrap_err();
        assert!(matches!(err, EnrollmentError::DirectoryNotFound(_)));
    }

    #[test]
    fn test_only_undecodable_files_yields_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alice.jpg"), b"not a jpeg").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let mut engine = StubEngine::with_tolerance(1.0);
        let enrollment = Enrollment::load(dir.path(), &mut engine).unwrap();

        assert!(enrollment.is_empty());
        assert_eq!(enrollment.report().files_seen, 2);
        assert_eq!(enrollment.report().decoded, 0);
        assert!(enrollment
            .report()
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::Undecodable));
    }

    #[test]
    fn test_one_face_one_signature_zero_faces_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_face(dir.path(), " Alice .png", 1, 10, 20);
        write_face(dir.path(), "empty.png", 0, 0, 0);

        let mut engine = StubEngine::with_tolerance(1.0);
        let enrollment = Enrollment::load(dir.path(), &mut engine).unwrap();

        assert_eq!(enrollment.names(), ["alice"]);
        assert_eq!(enrollment.signatures().len(), 1);
        assert_eq!(enrollment.signatures()[0].values, vec![10.0, 20.0]);

        let skipped = &enrollment.report().skipped;
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].reason, SkipReason::NoFace);
        assert!(skipped[0].path.ends_with("empty.png"));
    }

    #[test]
    fn test_multiple_faces_use_first() {
        let dir = tempfile::tempdir().unwrap();
        write_face(dir.path(), "group.png", 3, 7, 9);

        let mut engine = StubEngine::with_tolerance(1.0);
        let enrollment = Enrollment::load(dir.path(), &mut engine).unwrap();

        assert_eq!(enrollment.len(), 1);
        // Stub offsets later faces by 100; the first face has no offset.
        assert_eq!(enrollment.signatures()[0].values, vec![7.0, 9.0]);
    }

    #[test]
    fn test_engine_failure_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_face(dir.path(), "broken.png", 255, 0, 0);
        write_face(dir.path(), "bob.png", 1, 1, 1);

        let mut engine = StubEngine::with_tolerance(1.0);
        let enrollment = Enrollment::load(dir.path(), &mut engine).unwrap();

        assert_eq!(enrollment.names(), ["bob"]);
        assert_eq!(enrollment.report().skipped[0].reason, SkipReason::EngineFailed);
    }

    #[test]
    fn test_sixteen_bit_image_is_coerced() {
        let dir = tempfile::tempdir().unwrap();
        let img: ImageBuffer<Rgb<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(8, 8, Rgb([257 * 2, 257 * 40, 257 * 50]));
        img.save(dir.path().join("Carol.png")).unwrap();

        let mut engine = StubEngine::with_tolerance(1.0);
        let enrollment = Enrollment::load(dir.path(), &mut engine).unwrap();

        assert_eq!(enrollment.names(), ["carol"]);
        assert_eq!(enrollment.signatures()[0].values, vec![40.0, 50.0]);
    }

    #[test]
    fn test_identify_returns_enrolled_name() {
        let enrollment = Enrollment::from_parts([
            ("Alice".to_string(), Signature::new(vec![0.0, 0.0])),
            ("Bob".to_string(), Signature::new(vec![10.0, 10.0])),
        ]);
        let engine = StubEngine::with_tolerance(1.0);
        let outcome = enrollment.identify(&engine, &Signature::new(vec![9.5, 10.0]));
        let idx = outcome.accepted_index().unwrap();
        assert_eq!(enrollment.name(idx), Some("bob"));
    }
}
