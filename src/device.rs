use crate::error::{CaptureError, PlaybackError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token for an acquired camera or playback resource.
///
/// Handles are minted by the source that acquired the underlying device and
/// are only meaningful to that source. A controller instance owns at most one
/// live handle at a time, wrapped in a [`ResourceGuard`](crate::ResourceGuard).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// Camera facing preference passed to acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Rear-facing (environment) camera
    Rear,
    /// Front-facing (user) camera
    Front,
}

/// Constraints for camera acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConstraints {
    pub facing: FacingMode,
    pub audio: bool,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            facing: FacingMode::Rear,
            audio: false,
        }
    }
}

/// A live camera stream as returned by acquisition: the handle plus the
/// stream's native resolution
#[derive(Debug, Clone)]
pub struct CameraStream {
    pub handle: DeviceHandle,
    pub width: u32,
    pub height: u32,
}

/// A raw frame drawn from a live stream, RGB24 at the stream's native
/// resolution
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Expected RGB24 buffer size for the frame dimensions
    pub fn expected_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Reference to a playable media resource, opaque to this crate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef(String);

impl ResourceRef {
    pub fn new<S: Into<String>>(reference: S) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Camera device primitive consumed by [`CaptureSession`](crate::CaptureSession).
///
/// Acquisition is asynchronous and may be denied; release is synchronous and
/// infallible. `draw_frame` reports [`CaptureError::DeviceRevoked`] when the
/// underlying device disappeared mid-use, in which case the handle must not
/// be released or touched again.
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Request camera access with the given constraints
    async fn acquire(&self, constraints: &CameraConstraints) -> Result<CameraStream, CaptureError>;

    /// Draw the stream's current frame into a pixel buffer
    fn draw_frame(&self, handle: &DeviceHandle) -> Result<RawFrame, CaptureError>;

    /// Release an acquired camera
    fn release(&self, handle: &DeviceHandle);
}

/// Playback device primitive consumed by
/// [`VisibilityPlaybackController`](crate::VisibilityPlaybackController).
///
/// `play` is asynchronous and may be rejected (e.g. autoplay policy);
/// `pause` is synchronous and always succeeds.
#[async_trait]
pub trait PlaybackSource: Send + Sync {
    /// Acquire a decoding/playback pipeline for the resource
    fn acquire(&self, resource: &ResourceRef) -> Result<DeviceHandle, PlaybackError>;

    /// Request playback to start
    async fn play(&self, handle: &DeviceHandle) -> Result<(), PlaybackError>;

    /// Pause playback
    fn pause(&self, handle: &DeviceHandle);

    /// Release the pipeline
    fn release(&self, handle: &DeviceHandle);
}
