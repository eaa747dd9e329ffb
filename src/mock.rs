use crate::device::{
    CameraConstraints, CameraSource, CameraStream, DeviceHandle, PlaybackSource, RawFrame,
    ResourceRef,
};
use crate::error::{CaptureError, PlaybackError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Mock camera source for testing without real hardware.
///
/// Mints sequential handles, serves synthetic RGB frames, and records every
/// acquire/release so tests can assert the no-leak/no-double-release
/// properties. Failures are scripted per-call via `fail_next_acquire`.
#[derive(Clone)]
pub struct MockCameraSource {
    inner: Arc<Mutex<MockCameraState>>,
}

struct MockCameraState {
    next_handle: u64,
    resolution: (u32, u32),
    pending_failure: Option<CaptureError>,
    revoked: bool,
    acquired: Vec<u64>,
    released: Vec<u64>,
}

impl MockCameraSource {
    /// Create a mock serving frames at the given native resolution
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockCameraState {
                next_handle: 1,
                resolution: (width, height),
                pending_failure: None,
                revoked: false,
                acquired: Vec::new(),
                released: Vec::new(),
            })),
        }
    }

    /// Script the next `acquire` call to fail with the given error
    pub fn fail_next_acquire(&self, error: CaptureError) {
        self.inner.lock().pending_failure = Some(error);
    }

    /// Simulate external device revocation: subsequent frame draws report
    /// [`CaptureError::DeviceRevoked`]
    pub fn revoke(&self) {
        self.inner.lock().revoked = true;
        debug!("Mock camera revoked");
    }

    /// Change the native resolution served to future acquisitions and draws
    pub fn set_resolution(&self, width: u32, height: u32) {
        self.inner.lock().resolution = (width, height);
    }

    pub fn acquire_count(&self) -> usize {
        self.inner.lock().acquired.len()
    }

    pub fn release_count(&self) -> usize {
        self.inner.lock().released.len()
    }

    /// Handles acquired but not yet released
    pub fn live_handles(&self) -> Vec<u64> {
        let state = self.inner.lock();
        state
            .acquired
            .iter()
            .copied()
            .filter(|id| !state.released.contains(id))
            .collect()
    }
}

#[async_trait]
impl CameraSource for MockCameraSource {
    async fn acquire(&self, constraints: &CameraConstraints) -> Result<CameraStream, CaptureError> {
        let mut state = self.inner.lock();

        if let Some(failure) = state.pending_failure.take() {
            return Err(failure);
        }

        let handle = DeviceHandle::new(state.next_handle);
        state.next_handle += 1;
        state.revoked = false;
        state.acquired.push(handle.id());

        let (width, height) = state.resolution;
        debug!(
            "Mock camera acquired: {} ({:?}, audio={}, {}x{})",
            handle, constraints.facing, constraints.audio, width, height
        );

        Ok(CameraStream {
            handle,
            width,
            height,
        })
    }

    fn draw_frame(&self, handle: &DeviceHandle) -> Result<RawFrame, CaptureError> {
        let state = self.inner.lock();

        if state.revoked {
            return Err(CaptureError::DeviceRevoked);
        }

        let (width, height) = state.resolution;
        debug!("Mock frame drawn from {}: {}x{}", handle, width, height);

        // Solid gray test pattern
        Ok(RawFrame::new(
            vec![128u8; (width * height * 3) as usize],
            width,
            height,
        ))
    }

    fn release(&self, handle: &DeviceHandle) {
        let mut state = self.inner.lock();
        state.released.push(handle.id());
        debug!("Mock camera released: {}", handle);
    }
}

/// Mock playback source with scripted start outcomes and call accounting
#[derive(Clone)]
pub struct MockPlaybackSource {
    inner: Arc<Mutex<MockPlaybackState>>,
}

struct MockPlaybackState {
    next_handle: u64,
    reject_starts: bool,
    fail_acquire: bool,
    play_calls: u32,
    pause_calls: u32,
    acquired: Vec<u64>,
    released: Vec<u64>,
}

impl MockPlaybackSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockPlaybackState {
                next_handle: 1,
                reject_starts: false,
                fail_acquire: false,
                play_calls: 0,
                pause_calls: 0,
                acquired: Vec::new(),
                released: Vec::new(),
            })),
        }
    }

    /// Script all subsequent `play` calls to be rejected (autoplay policy)
    pub fn reject_starts(&self, reject: bool) {
        self.inner.lock().reject_starts = reject;
    }

    /// Script all subsequent `acquire` calls to fail
    pub fn fail_acquire(&self, fail: bool) {
        self.inner.lock().fail_acquire = fail;
    }

    pub fn play_calls(&self) -> u32 {
        self.inner.lock().play_calls
    }

    pub fn pause_calls(&self) -> u32 {
        self.inner.lock().pause_calls
    }

    pub fn acquire_count(&self) -> usize {
        self.inner.lock().acquired.len()
    }

    pub fn release_count(&self) -> usize {
        self.inner.lock().released.len()
    }
}

impl Default for MockPlaybackSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackSource for MockPlaybackSource {
    fn acquire(&self, resource: &ResourceRef) -> Result<DeviceHandle, PlaybackError> {
        let mut state = self.inner.lock();

        if state.fail_acquire {
            return Err(PlaybackError::AcquisitionFailed {
                details: format!("no pipeline available for {}", resource),
            });
        }

        let handle = DeviceHandle::new(state.next_handle);
        state.next_handle += 1;
        state.acquired.push(handle.id());
        debug!("Mock playback acquired: {} for {}", handle, resource);

        Ok(handle)
    }

    async fn play(&self, handle: &DeviceHandle) -> Result<(), PlaybackError> {
        let mut state = self.inner.lock();
        state.play_calls += 1;

        if state.reject_starts {
            return Err(PlaybackError::StartRejected {
                details: "autoplay blocked by policy".to_string(),
            });
        }

        debug!("Mock playback started: {}", handle);
        Ok(())
    }

    fn pause(&self, handle: &DeviceHandle) {
        let mut state = self.inner.lock();
        state.pause_calls += 1;
        debug!("Mock playback paused: {}", handle);
    }

    fn release(&self, handle: &DeviceHandle) {
        let mut state = self.inner.lock();
        state.released.push(handle.id());
        debug!("Mock playback released: {}", handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_camera_accounting() {
        let source = MockCameraSource::new(640, 480);
        let stream = source
            .acquire(&CameraConstraints::default())
            .await
            .unwrap();

        assert_eq!(source.acquire_count(), 1);
        assert_eq!(source.live_handles(), vec![stream.handle.id()]);

        source.release(&stream.handle);
        assert_eq!(source.release_count(), 1);
        assert!(source.live_handles().is_empty());
    }

    #[tokio::test]
    async fn test_mock_camera_scripted_failure_is_one_shot() {
        let source = MockCameraSource::new(640, 480);
        source.fail_next_acquire(CaptureError::DeviceBusy);

        let err = source
            .acquire(&CameraConstraints::default())
            .await
            .unwrap_err();
        assert_eq!(err, CaptureError::DeviceBusy);

        // The failure is consumed; the next acquire succeeds
        assert!(source.acquire(&CameraConstraints::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_camera_revocation() {
        let source = MockCameraSource::new(640, 480);
        let stream = source
            .acquire(&CameraConstraints::default())
            .await
            .unwrap();

        source.revoke();
        assert_eq!(
            source.draw_frame(&stream.handle).unwrap_err(),
            CaptureError::DeviceRevoked
        );
    }

    #[tokio::test]
    async fn test_mock_playback_rejection() {
        let source = MockPlaybackSource::new();
        let handle = source.acquire(&ResourceRef::new("clip-1")).unwrap();

        source.reject_starts(true);
        assert!(source.play(&handle).await.is_err());

        source.reject_starts(false);
        assert!(source.play(&handle).await.is_ok());
        assert_eq!(source.play_calls(), 2);
    }
}
