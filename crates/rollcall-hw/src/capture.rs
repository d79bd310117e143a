//! Capture contract consumed by the attendance pipeline.
//!
//! A [`CaptureBackend`] opens a device and hands back a [`CaptureSource`];
//! the source yields frames until end-of-stream and is released exactly once.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;

/// An open capture handle.
pub trait CaptureSource: Send {
    /// Block until the next frame is available.
    ///
    /// `Ok(None)` signals end-of-stream; the handle should be released.
    fn read(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Release the underlying device.
    fn release(self: Box<Self>);
}

/// Opens capture devices by identifier.
pub trait CaptureBackend: Send {
    fn open(&mut self, device: &str) -> Result<Box<dyn CaptureSource>, CameraError>;
}

/// V4L2 backend; every `open` negotiates a fresh [`Camera`].
#[derive(Debug, Default, Clone, Copy)]
pub struct V4lBackend;

impl CaptureBackend for V4lBackend {
    fn open(&mut self, device: &str) -> Result<Box<dyn CaptureSource>, CameraError> {
        Ok(Box::new(Camera::open(device)?))
    }
}
