//! rollcall-hw — Camera capture for the attendance kiosk.
//!
//! Provides the capture contract the pipeline consumes and a V4L2
//! implementation of it.

pub mod camera;
pub mod capture;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use capture::{CaptureBackend, CaptureSource, V4lBackend};
pub use frame::Frame;
