//! rollcall-hw — V4L2 camera capture producing grayscale frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo};
pub use frame::{Frame, FrameError, PixelFormat};
