pub mod artifact;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod guard;
pub mod mock;
pub mod playback;
pub mod visibility;

pub use artifact::{encode_jpeg, ImageArtifact, ImageEncoding};
pub use capture::{AcquireTicket, CaptureSession, CaptureSink, CaptureState};
pub use config::{CaptureSettings, MediaConfig, PlaybackSettings, VisibilitySettings};
pub use device::{
    CameraConstraints, CameraSource, CameraStream, DeviceHandle, FacingMode, PlaybackSource,
    RawFrame, ResourceRef,
};
pub use error::{CaptureError, MediaError, PlaybackError, Result};
pub use events::{DeviceKind, EventBus, MediaEvent};
pub use guard::ResourceGuard;
pub use mock::{MockCameraSource, MockPlaybackSource};
pub use playback::{PlaybackState, StartTicket, VisibilityPlaybackController};
pub use visibility::{Rect, VisibilityTracker};

/// Route controller tracing through the test harness, honoring `RUST_LOG`.
/// Safe to call from every test; later calls are no-ops.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
