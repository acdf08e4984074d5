pub mod capture;
pub mod v4l2;

pub use capture::FaceCaptureController;
pub use v4l2::V4l2Camera;

use crate::common::Result;
use image::DynamicImage;

/// A frame source the capture controller can own.
///
/// Implementations are blocking; the controller calls them from
/// `spawn_blocking`.
pub trait CameraDevice: Send + 'static {
    /// Acquires the device. Fails with `CameraUnavailable` when there is no
    /// device or access is denied.
    fn start(&mut self) -> Result<()>;

    fn grab_frame(&mut self) -> Result<DynamicImage>;

    /// Releases the device. Safe to call when already stopped.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}
