use crate::preview::{Overlay, Preview};
use anyhow::Context;
use image::RgbImage;
use rollcall_core::{
    AttendanceLog, BoundingBox, EngineError, Enrollment, FaceEngine, Marked, Roster, Signature,
    UNKNOWN_STUDENT_ID,
};
use rollcall_hw::{frame, FrameSource};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Banner text for a recognized face with no roster row.
pub const DETAILS_NOT_FOUND: &str = "Details not found";

/// Everything known about the class before the camera opens.
pub struct Classroom {
    pub enrollment: Enrollment,
    pub roster: Roster,
}

impl Classroom {
    /// Encode the reference photos, then read the roster. Both failures are fatal.
    pub fn load<E>(photos_dir: &Path, roster_path: &Path, engine: &mut E) -> anyhow::Result<Self>
    where
        E: FaceEngine + ?Sized,
    {
        let enrollment = Enrollment::load(photos_dir, engine)
            .with_context(|| format!("enrolling photos from {}", photos_dir.display()))?;
        let roster = Roster::load(roster_path)
            .with_context(|| format!("loading roster {}", roster_path.display()))?;

        let classroom = Self { enrollment, roster };
        for name in classroom.unrostered() {
            tracing::warn!(name, "enrolled photo has no roster row");
        }
        Ok(classroom)
    }

    /// Enrolled names the roster has no row for.
    pub fn unrostered(&self) -> Vec<&str> {
        self.enrollment
            .names()
            .iter()
            .filter(|name| self.roster.get(name).is_none())
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Exit key or window closed.
    UserRequested,
    /// Ctrl-C.
    Interrupted,
    CaptureFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Stopped(StopReason),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub frames: u64,
    pub faces: u64,
    pub recognized: u64,
    /// Names newly written to the log during this session.
    pub marked: Vec<String>,
    pub stop_reason: Option<StopReason>,
}

/// The live attendance loop.
///
/// Owns the camera and the preview. Both are released exactly once: at the
/// end of [`Session::run`] or, failing that, on drop.
pub struct Session<E, C, P>
where
    E: FaceEngine,
    C: FrameSource,
    P: Preview,
{
    engine: E,
    classroom: Classroom,
    log: AttendanceLog,
    camera: C,
    preview: P,
    downscale: f32,
    stop: Arc<AtomicBool>,
    released: bool,
}

impl<E, C, P> Session<E, C, P>
where
    E: FaceEngine,
    C: FrameSource,
    P: Preview,
{
    pub fn new(
        engine: E,
        classroom: Classroom,
        log: AttendanceLog,
        camera: C,
        preview: P,
        downscale: f32,
    ) -> Self {
        Self {
            engine,
            classroom,
            log,
            camera,
            preview,
            downscale,
            stop: Arc::new(AtomicBool::new(false)),
            released: false,
        }
    }

    /// Share an interrupt flag; setting it stops the loop after the current frame.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Run until the user exits, the stop flag is set, or capture fails.
    pub fn run(&mut self) -> SessionSummary {
        let mut summary = SessionSummary::default();
        if self.classroom.enrollment.is_empty() {
            tracing::warn!("no enrolled faces; every face will be reported as not found");
        }
        tracing::info!(
            enrolled = self.classroom.enrollment.len(),
            roster = self.classroom.roster.len(),
            log_path = %self.log.path().display(),
            "attendance session started"
        );

        let reason = loop {
            if let LoopState::Stopped(reason) = self.step(&mut summary) {
                break reason;
            }
        };
        summary.stop_reason = Some(reason);

        self.shutdown();
        tracing::info!(
            frames = summary.frames,
            faces = summary.faces,
            recognized = summary.recognized,
            marked = summary.marked.len(),
            reason = ?reason,
            "attendance session stopped"
        );
        summary
    }

    fn step(&mut self, summary: &mut SessionSummary) -> LoopState {
        let frame = match self.camera.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to capture frame");
                return LoopState::Stopped(StopReason::CaptureFailed);
            }
        };
        summary.frames += 1;

        let overlays = match self.annotate(&frame.image, summary) {
            Ok(overlays) => overlays,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "face processing failed; frame skipped");
                Vec::new()
            }
        };

        self.preview.present(&frame.image, &overlays);

        if self.preview.exit_requested() {
            tracing::info!("exit requested");
            return LoopState::Stopped(StopReason::UserRequested);
        }
        if self.stop.load(Ordering::SeqCst) {
            return LoopState::Stopped(StopReason::Interrupted);
        }
        LoopState::Running
    }

    fn annotate(
        &mut self,
        image: &RgbImage,
        summary: &mut SessionSummary,
    ) -> Result<Vec<Overlay>, EngineError> {
        let small = frame::downscale(image, self.downscale);
        let boxes = self.engine.detect_faces(&small)?;
        if boxes.is_empty() {
            return Ok(Vec::new());
        }
        let signatures = self.engine.encode_faces(&small, &boxes)?;

        let upscale = 1.0 / self.downscale;
        Ok(boxes
            .iter()
            .zip(&signatures)
            .map(|(face, signature)| self.classify(face.scaled(upscale), signature, summary))
            .collect())
    }

    fn classify(
        &mut self,
        face: BoundingBox,
        signature: &Signature,
        summary: &mut SessionSummary,
    ) -> Overlay {
        summary.faces += 1;

        let outcome = self.classroom.enrollment.identify(&self.engine, signature);
        let name = match outcome
            .accepted_index()
            .and_then(|index| self.classroom.enrollment.name(index))
        {
            Some(name) => name.to_string(),
            None => {
                tracing::debug!(distance = outcome.distance, "face not recognized");
                return Overlay::unrecognized(face);
            }
        };
        summary.recognized += 1;

        let (label, student_id) = match self.classroom.roster.get(&name) {
            Some(record) => (record.display_text(), record.student_id.clone()),
            None => {
                tracing::warn!(name = %name, "recognized face has no roster details");
                (DETAILS_NOT_FOUND.to_string(), UNKNOWN_STUDENT_ID.to_string())
            }
        };

        match self.log.mark(&name, &student_id) {
            Ok(Marked::Recorded) => summary.marked.push(name),
            Ok(Marked::AlreadyPresent) => {}
            Err(e) => tracing::error!(error = %e, name = %name, "failed to write attendance"),
        }

        Overlay::recognized(face, label)
    }

    /// Release the camera and close the preview. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.camera.release();
        self.preview.close();
    }
}

impl<E, C, P> Drop for Session<E, C, P>
where
    E: FaceEngine,
    C: FrameSource,
    P: Preview,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::OverlayKind;
    use image::Rgb;
    use rollcall_core::RosterRecord;
    use rollcall_hw::{CameraError, Frame};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Red channel of pixel (0, 0) is the face count (255 = engine error);
    /// green seeds the signature of each face.
    struct ScriptedEngine {
        tolerance: f32,
    }

    impl FaceEngine for ScriptedEngine {
        fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
            let [count, _, _] = image.get_pixel(0, 0).0;
            if count == 255 {
                let err = rollcall_core::detector::DetectorError::InferenceFailed("scripted".into());
                return Err(err.into());
            }
            Ok((0..count)
                .map(|i| BoundingBox {
                    x: 1.0 + i as f32,
                    y: 1.0,
                    width: 2.0,
                    height: 2.0,
                    confidence: 0.9,
                    landmarks: None,
                })
                .collect())
        }

        fn encode_faces(
            &mut self,
            image: &RgbImage,
            boxes: &[BoundingBox],
        ) -> Result<Vec<Signature>, EngineError> {
            let [_, seed, _] = image.get_pixel(0, 0).0;
            Ok(boxes
                .iter()
                .enumerate()
                .map(|(i, _)| Signature::new(vec![seed as f32 + i as f32 * 100.0]))
                .collect())
        }

        fn distance(&self, a: &Signature, b: &Signature) -> f32 {
            a.euclidean_distance(b)
        }

        fn same_person(&self, distance: f32) -> bool {
            distance <= self.tolerance
        }
    }

    struct FakeCamera {
        frames: VecDeque<RgbImage>,
        releases: Rc<Cell<usize>>,
    }

    impl FrameSource for FakeCamera {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            self.frames
                .pop_front()
                .map(|image| Frame::new(image, 0))
                .ok_or_else(|| CameraError::CaptureFailed("end of script".into()))
        }

        fn release(&mut self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    struct FakePreview {
        presented: Rc<RefCell<Vec<Vec<Overlay>>>>,
        exit_after: Option<usize>,
        closes: Rc<Cell<usize>>,
    }

    impl Preview for FakePreview {
        fn present(&mut self, _frame: &RgbImage, overlays: &[Overlay]) {
            self.presented.borrow_mut().push(overlays.to_vec());
        }

        fn exit_requested(&self) -> bool {
            self.exit_after
                .is_some_and(|n| self.presented.borrow().len() >= n)
        }

        fn close(&mut self) {
            self.closes.set(self.closes.get() + 1);
        }
    }

    /// 16x16 frame whose corner pixel scripts the engine.
    fn frame(faces: u8, seed: u8) -> RgbImage {
        RgbImage::from_pixel(16, 16, Rgb([faces, seed, 0]))
    }

    fn classroom() -> Classroom {
        let enrollment = Enrollment::from_parts([
            ("Alice".to_string(), Signature::new(vec![10.0])),
            ("Bob".to_string(), Signature::new(vec![50.0])),
        ]);
        let mut roster = Roster::default();
        roster.insert(RosterRecord {
            name: "Alice".into(),
            student_id: "S1".into(),
            branch: "CSE".into(),
            extra: Vec::new(),
        });
        Classroom { enrollment, roster }
    }

    struct Harness {
        releases: Rc<Cell<usize>>,
        closes: Rc<Cell<usize>>,
        presented: Rc<RefCell<Vec<Vec<Overlay>>>>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn log_path(&self) -> std::path::PathBuf {
            self.dir.path().join("attendance.csv")
        }

        fn log_contents(&self) -> String {
            std::fs::read_to_string(self.log_path()).unwrap_or_default()
        }
    }

    fn session(
        frames: Vec<RgbImage>,
        classroom: Classroom,
        exit_after: Option<usize>,
    ) -> (Session<ScriptedEngine, FakeCamera, FakePreview>, Harness) {
        let harness = Harness {
            releases: Rc::default(),
            closes: Rc::default(),
            presented: Rc::default(),
            dir: tempfile::tempdir().unwrap(),
        };
        let camera = FakeCamera {
            frames: frames.into(),
            releases: harness.releases.clone(),
        };
        let preview = FakePreview {
            presented: harness.presented.clone(),
            exit_after,
            closes: harness.closes.clone(),
        };
        let session = Session::new(
            ScriptedEngine { tolerance: 1.0 },
            classroom,
            AttendanceLog::new(harness.log_path()),
            camera,
            preview,
            0.25,
        );
        (session, harness)
    }

    #[test]
    fn test_capture_failure_stops_and_releases_once() {
        let (mut session, h) = session(vec![frame(0, 0), frame(0, 0)], classroom(), None);
        let summary = session.run();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.stop_reason, Some(StopReason::CaptureFailed));
        assert_eq!(h.releases.get(), 1);
        assert_eq!(h.closes.get(), 1);

        drop(session);
        assert_eq!(h.releases.get(), 1, "drop after run must not release again");
    }

    #[test]
    fn test_recognized_student_is_logged_once() {
        let frames = vec![frame(1, 10), frame(1, 10), frame(1, 10)];
        let (mut session, h) = session(frames, classroom(), None);
        let summary = session.run();

        assert_eq!(summary.faces, 3);
        assert_eq!(summary.recognized, 3);
        assert_eq!(summary.marked, vec!["alice".to_string()]);

        let log = h.log_contents();
        assert!(log.starts_with("Name,Student Id,Timestamp\n"));
        assert_eq!(log.lines().filter(|l| l.starts_with("alice,S1,")).count(), 1);

        let presented = h.presented.borrow();
        let overlay = &presented[0][0];
        assert_eq!(overlay.kind, OverlayKind::Recognized);
        assert_eq!(overlay.label, "ID: S1, Name: Alice, Branch: CSE");
    }

    #[test]
    fn test_recognized_without_roster_row_uses_unknown_id() {
        let (mut session, h) = session(vec![frame(1, 50)], classroom(), None);
        let summary = session.run();

        assert_eq!(summary.marked, vec!["bob".to_string()]);
        assert!(h.log_contents().lines().any(|l| l.starts_with("bob,Unknown,")));
        let presented = h.presented.borrow();
        assert_eq!(presented[0][0].label, DETAILS_NOT_FOUND);
        assert_eq!(presented[0][0].kind, OverlayKind::Recognized);
    }

    #[test]
    fn test_unmatched_face_is_not_found_and_not_logged() {
        let (mut session, h) = session(vec![frame(1, 200)], classroom(), None);
        let summary = session.run();

        assert_eq!(summary.faces, 1);
        assert_eq!(summary.recognized, 0);
        assert!(h.log_contents().is_empty());
        let presented = h.presented.borrow();
        assert_eq!(presented[0][0].kind, OverlayKind::Unrecognized);
        assert_eq!(presented[0][0].label, "Not Found");
    }

    #[test]
    fn test_boxes_scaled_back_to_full_frame() {
        let (mut session, h) = session(vec![frame(1, 200)], classroom(), None);
        session.run();
        let presented = h.presented.borrow();
        let face = &presented[0][0].face;
        assert_eq!((face.x, face.y, face.width, face.height), (4.0, 4.0, 8.0, 8.0));
    }

    #[test]
    fn test_engine_error_skips_frame_but_still_presents() {
        let (mut session, h) = session(vec![frame(255, 0), frame(1, 10)], classroom(), None);
        let summary = session.run();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.faces, 1);
        let presented = h.presented.borrow();
        assert_eq!(presented.len(), 2);
        assert!(presented[0].is_empty());
    }

    #[test]
    fn test_user_exit_stops_loop() {
        let frames = vec![frame(0, 0), frame(0, 0), frame(0, 0)];
        let (mut session, h) = session(frames, classroom(), Some(1));
        let summary = session.run();
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.stop_reason, Some(StopReason::UserRequested));
        assert_eq!(h.releases.get(), 1);
    }

    #[test]
    fn test_stop_flag_interrupts() {
        let stop = Arc::new(AtomicBool::new(true));
        let (session, h) = session(vec![frame(0, 0), frame(0, 0)], classroom(), None);
        let mut session = session.with_stop_flag(stop);
        let summary = session.run();
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.stop_reason, Some(StopReason::Interrupted));
        assert_eq!(h.releases.get(), 1);
    }

    #[test]
    fn test_empty_enrollment_never_matches() {
        let empty = Classroom {
            enrollment: Enrollment::default(),
            roster: Roster::default(),
        };
        let (mut session, h) = session(vec![frame(2, 10)], empty, None);
        let summary = session.run();
        assert_eq!(summary.faces, 2);
        assert_eq!(summary.recognized, 0);
        assert!(h.presented.borrow()[0]
            .iter()
            .all(|o| o.kind == OverlayKind::Unrecognized));
    }

    #[test]
    fn test_release_runs_once_on_panic() {
        struct PanickingPreview;
        impl Preview for PanickingPreview {
            fn present(&mut self, _frame: &RgbImage, _overlays: &[Overlay]) {
                panic!("preview failed");
            }
            fn exit_requested(&self) -> bool {
                false
            }
            fn close(&mut self) {}
        }

        let releases = Rc::new(Cell::new(0));
        let camera = FakeCamera {
            frames: vec![frame(0, 0)].into(),
            releases: releases.clone(),
        };
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(
            ScriptedEngine { tolerance: 1.0 },
            classroom(),
            AttendanceLog::new(dir.path().join("log.csv")),
            camera,
            PanickingPreview,
            0.25,
        );

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || session.run()));
        assert!(result.is_err());
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn test_classroom_load_missing_photos_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let roster = dir.path().join("input.csv");
        std::fs::write(&roster, "Name,Student Id,Branch\nAlice,S1,CSE\n").unwrap();

        let mut engine = ScriptedEngine { tolerance: 1.0 };
        let err = Classroom::load(&dir.path().join("photos"), &roster, &mut engine)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("image directory not found"));
    }

    #[test]
    fn test_classroom_load_missing_roster_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ScriptedEngine { tolerance: 1.0 };
        let err = Classroom::load(dir.path(), &dir.path().join("input.csv"), &mut engine)
            .err()
            .unwrap();
        assert!(err.downcast_ref::<rollcall_core::RosterError>().is_some());
    }

    #[test]
    fn test_classroom_load_empty_photo_dir() {
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        std::fs::create_dir(&photos).unwrap();
        let roster = dir.path().join("input.csv");
        std::fs::write(&roster, "Name,Student Id,Branch\nAlice,S1,CSE\n").unwrap();

        let mut engine = ScriptedEngine { tolerance: 1.0 };
        let classroom = Classroom::load(&photos, &roster, &mut engine).unwrap();
        assert!(classroom.enrollment.is_empty());
        assert_eq!(classroom.roster.len(), 1);
    }

    #[test]
    fn test_unrostered_lists_enrolled_names_without_rows() {
        assert_eq!(classroom().unrostered(), vec!["bob"]);
    }
}
