use crate::artifact::{encode_jpeg, ImageArtifact};
use crate::config::CaptureSettings;
use crate::device::{CameraConstraints, CameraSource, CameraStream, DeviceHandle};
use crate::error::CaptureError;
use crate::events::{DeviceKind, EventBus, MediaEvent};
use crate::guard::ResourceGuard;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Current state of a capture session
#[derive(Debug)]
pub enum CaptureState {
    /// No camera held; `start()` may acquire one
    Idle,
    /// Acquisition in flight
    Acquiring,
    /// Live camera held, previewing
    Streaming,
    /// Frame frozen and encoded; the camera has already been released
    Frozen(ImageArtifact),
    /// Last operation failed; the session stays usable for a retry
    Error(CaptureError),
    /// Terminal state; every resource has been released
    Closed,
}

impl CaptureState {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureState::Idle => "Idle",
            CaptureState::Acquiring => "Acquiring",
            CaptureState::Streaming => "Streaming",
            CaptureState::Frozen(_) => "Frozen",
            CaptureState::Error(_) => "Error",
            CaptureState::Closed => "Closed",
        }
    }
}

/// Host callbacks invoked by the session
pub trait CaptureSink: Send {
    /// The user confirmed a frozen frame
    fn image_captured(&mut self, artifact: ImageArtifact);

    /// The session reached its terminal state
    fn session_closed(&mut self);
}

/// No-op sink for hosts that poll session state instead
impl CaptureSink for () {
    fn image_captured(&mut self, _artifact: ImageArtifact) {}
    fn session_closed(&mut self) {}
}

/// Ticket handed out by [`CaptureSession::begin_start`]; the matching
/// acquisition completion must present it to [`CaptureSession::finish_start`].
#[derive(Debug)]
pub struct AcquireTicket {
    token: u64,
}

impl AcquireTicket {
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// One camera-based photo capture cycle.
///
/// Owns the camera handle and the capture state machine
/// (idle → acquiring → streaming → frozen → confirmed/cancelled). The
/// physical camera is released on every exit path: freezing a frame releases
/// it immediately, and `close()` (also run on drop) releases whatever is
/// still held.
///
/// Acquisition carries a monotonically increasing attempt token. A completion
/// whose token no longer matches is stale: its handle is released on the spot
/// and no transition occurs, which is how `close()` cancels an acquisition
/// primitive that has no real cancellation.
pub struct CaptureSession<S: CaptureSink> {
    id: Uuid,
    source: Arc<dyn CameraSource>,
    sink: S,
    settings: CaptureSettings,
    events: Option<EventBus>,
    state: CaptureState,
    guard: Option<ResourceGuard<DeviceHandle>>,
    attempt: u64,
}

impl<S: CaptureSink> CaptureSession<S> {
    pub fn new(source: Arc<dyn CameraSource>, settings: CaptureSettings, sink: S) -> Self {
        let id = Uuid::new_v4();
        info!("Capture session {} created", id);

        Self {
            id,
            source,
            sink,
            settings,
            events: None,
            state: CaptureState::Idle,
            guard: None,
            attempt: 0,
        }
    }

    /// Attach an event bus for lifecycle telemetry
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    /// The frozen artifact, when in `Frozen`
    pub fn artifact(&self) -> Option<&ImageArtifact> {
        match &self.state {
            CaptureState::Frozen(artifact) => Some(artifact),
            _ => None,
        }
    }

    fn constraints(&self) -> CameraConstraints {
        CameraConstraints {
            facing: self.settings.facing,
            audio: self.settings.audio,
        }
    }

    /// Transition to `next`, logging and publishing the change. Returns the
    /// previous state.
    fn transition(&mut self, next: CaptureState) -> CaptureState {
        let from = self.state.name();
        let to = next.name();
        debug!("Capture session {}: {} -> {}", self.id, from, to);

        if let Some(bus) = &self.events {
            bus.publish(MediaEvent::CaptureStateChanged {
                session_id: self.id,
                from: from.to_string(),
                to: to.to_string(),
                timestamp: Utc::now(),
            });
        }

        std::mem::replace(&mut self.state, next)
    }

    fn wrap_guard(&self, handle: DeviceHandle) -> ResourceGuard<DeviceHandle> {
        let source = Arc::clone(&self.source);
        let events = self.events.clone();
        ResourceGuard::new(handle, move |h| {
            source.release(&h);
            if let Some(bus) = events {
                bus.publish(MediaEvent::DeviceReleased {
                    kind: DeviceKind::Camera,
                    handle_id: h.id(),
                    timestamp: Utc::now(),
                });
            }
        })
    }

    /// Begin an acquisition attempt. Returns `None` when starting is a no-op
    /// from the current state (already acquiring or streaming, or the session
    /// is closed).
    pub fn begin_start(&mut self) -> Option<AcquireTicket> {
        match self.state {
            CaptureState::Acquiring | CaptureState::Streaming => {
                debug!(
                    "Capture session {}: start ignored, already {}",
                    self.id,
                    self.state.name()
                );
                None
            }
            CaptureState::Frozen(_) => {
                warn!(
                    "Capture session {}: start ignored while frozen, use retake",
                    self.id
                );
                None
            }
            CaptureState::Closed => {
                warn!("Capture session {}: start ignored, session closed", self.id);
                None
            }
            CaptureState::Idle | CaptureState::Error(_) => {
                self.attempt += 1;
                self.transition(CaptureState::Acquiring);
                Some(AcquireTicket {
                    token: self.attempt,
                })
            }
        }
    }

    /// Apply an acquisition completion.
    ///
    /// A completion whose ticket is stale (the session moved on, was closed,
    /// or retried) takes no effect; a handle delivered late is released
    /// immediately so nothing leaks.
    pub fn finish_start(
        &mut self,
        ticket: AcquireTicket,
        result: Result<CameraStream, CaptureError>,
    ) {
        let stale =
            ticket.token != self.attempt || !matches!(self.state, CaptureState::Acquiring);

        if stale {
            if let Ok(stream) = result {
                debug!(
                    "Capture session {}: discarding stale acquisition, releasing {}",
                    self.id, stream.handle
                );
                self.source.release(&stream.handle);
            }
            return;
        }

        match result {
            Ok(stream) => {
                info!(
                    "Capture session {}: camera acquired ({}, {}x{})",
                    self.id, stream.handle, stream.width, stream.height
                );

                if let Some(bus) = &self.events {
                    bus.publish(MediaEvent::DeviceAcquired {
                        kind: DeviceKind::Camera,
                        handle_id: stream.handle.id(),
                        timestamp: Utc::now(),
                    });
                }

                self.guard = Some(self.wrap_guard(stream.handle));
                self.transition(CaptureState::Streaming);
            }
            Err(e) => {
                warn!("Capture session {}: acquisition failed: {}", self.id, e);
                self.transition(CaptureState::Error(e));
            }
        }
    }

    /// Request camera access and start streaming.
    ///
    /// No-op when already acquiring or streaming, or after close. On failure
    /// the session enters `Error` and stays usable; the caller may retry.
    pub async fn start(&mut self) -> Result<(), CaptureError> {
        let Some(ticket) = self.begin_start() else {
            return Ok(());
        };

        let constraints = self.constraints();
        let result = self.source.acquire(&constraints).await;
        self.finish_start(ticket, result);

        match &self.state {
            CaptureState::Error(e) => Err(e.clone()),
            _ => Ok(()),
        }
    }

    /// Freeze the current frame.
    ///
    /// Valid only while streaming (no-op elsewhere). On success the camera is
    /// released immediately, before any user confirmation. An encoding
    /// failure (including a stream that reports zero resolution) leaves the
    /// session streaming so the caller can try again; a revoked device moves
    /// the session to `Error` without touching the dead handle again.
    pub fn freeze(&mut self) -> Result<(), CaptureError> {
        if !matches!(self.state, CaptureState::Streaming) {
            debug!(
                "Capture session {}: freeze ignored in state {}",
                self.id,
                self.state.name()
            );
            return Ok(());
        }

        let Some(handle) = self.guard.as_ref().and_then(|g| g.handle()).copied() else {
            warn!("Capture session {}: streaming without a handle", self.id);
            return Ok(());
        };

        let frame = match self.source.draw_frame(&handle) {
            Ok(frame) => frame,
            Err(CaptureError::DeviceRevoked) => {
                self.handle_revocation();
                return Err(CaptureError::DeviceRevoked);
            }
            Err(e) => {
                warn!("Capture session {}: frame draw failed: {}", self.id, e);
                return Err(e);
            }
        };

        let artifact = match encode_jpeg(self.id, &frame, self.settings.jpeg_quality) {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(
                    "Capture session {}: staying in Streaming after encoding failure: {}",
                    self.id, e
                );
                return Err(e);
            }
        };

        // The physical camera stops being used the moment a frame is frozen
        if let Some(mut guard) = self.guard.take() {
            guard.release();
        }

        if let Some(bus) = &self.events {
            bus.publish(MediaEvent::ArtifactCaptured {
                session_id: self.id,
                width: artifact.width,
                height: artifact.height,
                bytes: artifact.len(),
                timestamp: Utc::now(),
            });
        }

        info!(
            "Capture session {}: frame frozen ({}x{}, {} bytes)",
            self.id,
            artifact.width,
            artifact.height,
            artifact.len()
        );
        self.transition(CaptureState::Frozen(artifact));
        Ok(())
    }

    /// Discard the frozen artifact and reacquire the camera.
    ///
    /// Valid only from `Frozen`; no-op elsewhere.
    pub async fn retake(&mut self) -> Result<(), CaptureError> {
        if !matches!(self.state, CaptureState::Frozen(_)) {
            debug!(
                "Capture session {}: retake ignored in state {}",
                self.id,
                self.state.name()
            );
            return Ok(());
        }

        // Dropping the previous state discards the artifact
        self.transition(CaptureState::Idle);
        self.start().await
    }

    /// Hand the frozen artifact to the host and close the session.
    ///
    /// Idempotent: only the first call from `Frozen` invokes the sink.
    pub fn confirm(&mut self) {
        if !matches!(self.state, CaptureState::Frozen(_)) {
            debug!(
                "Capture session {}: confirm ignored in state {}",
                self.id,
                self.state.name()
            );
            return;
        }

        let prev = self.transition(CaptureState::Closed);
        if let CaptureState::Frozen(artifact) = prev {
            info!("Capture session {}: artifact confirmed", self.id);
            self.sink.image_captured(artifact);
        }
        self.sink.session_closed();
    }

    /// Close the session from any state, releasing the camera if held and
    /// cancelling any in-flight acquisition. Idempotent.
    pub fn close(&mut self) {
        if matches!(self.state, CaptureState::Closed) {
            return;
        }

        // Invalidate any acquisition still in flight
        self.attempt += 1;

        if let Some(mut guard) = self.guard.take() {
            guard.release();
        }

        info!("Capture session {} closed", self.id);
        self.transition(CaptureState::Closed);
        self.sink.session_closed();
    }

    /// The host observed external revocation of the camera (e.g. the OS
    /// reclaimed it). The dead handle is dropped without a release call.
    pub fn device_revoked(&mut self) {
        match self.state {
            CaptureState::Streaming | CaptureState::Acquiring => self.handle_revocation(),
            _ => debug!(
                "Capture session {}: revocation ignored in state {}",
                self.id,
                self.state.name()
            ),
        }
    }

    fn handle_revocation(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.disarm();
        }

        if let Some(bus) = &self.events {
            bus.publish(MediaEvent::DeviceRevoked {
                kind: DeviceKind::Camera,
                timestamp: Utc::now(),
            });
        }

        warn!("Capture session {}: camera revoked externally", self.id);
        self.transition(CaptureState::Error(CaptureError::DeviceRevoked));
    }
}

impl<S: CaptureSink> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCameraSource;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct SinkLog {
        captured: Vec<ImageArtifact>,
        closed: u32,
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<SinkLog>>);

    impl CaptureSink for RecordingSink {
        fn image_captured(&mut self, artifact: ImageArtifact) {
            self.0.lock().captured.push(artifact);
        }

        fn session_closed(&mut self) {
            self.0.lock().closed += 1;
        }
    }

    fn session(
        source: &MockCameraSource,
    ) -> (CaptureSession<RecordingSink>, RecordingSink) {
        crate::init_test_logging();
        let sink = RecordingSink::default();
        let session = CaptureSession::new(
            Arc::new(source.clone()),
            CaptureSettings::default(),
            sink.clone(),
        );
        (session, sink)
    }

    #[tokio::test]
    async fn test_start_acquires_and_streams() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        session.start().await.unwrap();
        assert!(matches!(session.state(), CaptureState::Streaming));
        assert_eq!(source.acquire_count(), 1);
        assert_eq!(source.release_count(), 0);
    }

    #[tokio::test]
    async fn test_start_while_streaming_is_noop() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        session.start().await.unwrap();
        session.start().await.unwrap();
        assert_eq!(source.acquire_count(), 1);
    }

    #[tokio::test]
    async fn test_denied_acquisition_is_retryable() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        source.fail_next_acquire(CaptureError::AcquisitionDenied {
            details: "permission denied".to_string(),
        });

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::AcquisitionDenied { .. }));
        assert!(matches!(session.state(), CaptureState::Error(_)));

        // The session stays usable and a retry can succeed
        session.start().await.unwrap();
        assert!(matches!(session.state(), CaptureState::Streaming));
    }

    #[tokio::test]
    async fn test_freeze_releases_camera_immediately() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        session.start().await.unwrap();
        session.freeze().unwrap();

        assert!(matches!(session.state(), CaptureState::Frozen(_)));
        let artifact = session.artifact().unwrap();
        assert_eq!(artifact.width, 640);
        assert_eq!(artifact.height, 480);
        assert!(!artifact.is_empty());
        assert_eq!(source.release_count(), 1);
    }

    #[tokio::test]
    async fn test_freeze_then_close_releases_exactly_once() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        session.start().await.unwrap();
        session.freeze().unwrap();
        session.close();

        assert_eq!(source.acquire_count(), 1);
        assert_eq!(source.release_count(), 1);
    }

    #[tokio::test]
    async fn test_freeze_outside_streaming_is_noop() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        session.freeze().unwrap();
        assert!(matches!(session.state(), CaptureState::Idle));
    }

    #[tokio::test]
    async fn test_retake_reacquires_and_discards_artifact() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        session.start().await.unwrap();
        session.freeze().unwrap();
        session.retake().await.unwrap();

        assert!(matches!(session.state(), CaptureState::Streaming));
        assert!(session.artifact().is_none());
        assert_eq!(source.acquire_count(), 2);
        assert_eq!(source.release_count(), 1);
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, sink) = session(&source);

        session.start().await.unwrap();
        session.freeze().unwrap();
        session.confirm();
        session.confirm();

        assert!(matches!(session.state(), CaptureState::Closed));
        let log = sink.0.lock();
        assert_eq!(log.captured.len(), 1);
        assert_eq!(log.closed, 1);
    }

    #[tokio::test]
    async fn test_close_from_streaming_releases() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, sink) = session(&source);

        session.start().await.unwrap();
        session.close();
        session.close();

        assert!(matches!(session.state(), CaptureState::Closed));
        assert_eq!(source.release_count(), 1);
        assert_eq!(sink.0.lock().closed, 1);
    }

    #[tokio::test]
    async fn test_drop_releases_camera() {
        let source = MockCameraSource::new(640, 480);
        {
            let (mut session, _sink) = session(&source);
            session.start().await.unwrap();
        }
        assert_eq!(source.release_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_acquisition_after_close_is_released() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        let ticket = session.begin_start().unwrap();
        session.close();

        // The acquisition resolves after the session was torn down
        let stream = source
            .acquire(&CameraConstraints::default())
            .await
            .unwrap();
        session.finish_start(ticket, Ok(stream));

        assert!(matches!(session.state(), CaptureState::Closed));
        assert!(source.live_handles().is_empty());
    }

    #[tokio::test]
    async fn test_stale_acquisition_after_retry_is_released() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        let old_ticket = session.begin_start().unwrap();
        let old_stream = source
            .acquire(&CameraConstraints::default())
            .await
            .unwrap();

        // A failure resolves the first attempt; a second attempt begins
        session.finish_start(
            AcquireTicket {
                token: old_ticket.token(),
            },
            Err(CaptureError::DeviceBusy),
        );
        session.start().await.unwrap();

        // Now the first attempt's handle arrives late
        session.finish_start(old_ticket, Ok(old_stream));

        assert!(matches!(session.state(), CaptureState::Streaming));
        assert_eq!(source.live_handles().len(), 1);
    }

    #[tokio::test]
    async fn test_revoked_device_is_not_released() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        session.start().await.unwrap();
        source.revoke();

        let err = session.freeze().unwrap_err();
        assert_eq!(err, CaptureError::DeviceRevoked);
        assert!(matches!(
            session.state(),
            CaptureState::Error(CaptureError::DeviceRevoked)
        ));
        // The dead handle must not be passed back to the source
        assert_eq!(source.release_count(), 0);

        // Re-acquisition recovers
        session.start().await.unwrap();
        assert!(matches!(session.state(), CaptureState::Streaming));
    }

    #[tokio::test]
    async fn test_external_revocation_signal() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        session.start().await.unwrap();
        session.device_revoked();

        assert!(matches!(
            session.state(),
            CaptureState::Error(CaptureError::DeviceRevoked)
        ));
        assert_eq!(source.release_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_resolution_freeze_stays_streaming() {
        let source = MockCameraSource::new(640, 480);
        let (mut session, _sink) = session(&source);

        session.start().await.unwrap();
        source.set_resolution(0, 0);

        let err = session.freeze().unwrap_err();
        assert!(matches!(err, CaptureError::EncodingFailure { .. }));
        assert!(matches!(session.state(), CaptureState::Streaming));
        assert_eq!(source.live_handles().len(), 1);
    }
}
