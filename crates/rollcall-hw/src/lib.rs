//! rollcall-hw: camera capture.
//!
//! Provides V4L2-based camera access producing RGB frames, behind the
//! [`FrameSource`] trait so the live loop can run against any frame source.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;

/// A source of live frames that owns an exclusive device handle.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// Give the device back. Must be safe to call more than once.
    fn release(&mut self);
}
