//! facewatch-hw: camera capture for the live identification loop.
//!
//! Provides V4L2-based colour capture (YUYV, MJPG, RGB3, BGR3) producing
//! [`facewatch_core::Frame`]s.

pub mod camera;
pub mod convert;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
