use crate::config::PlaybackSettings;
use crate::device::{DeviceHandle, PlaybackSource, ResourceRef};
use crate::error::PlaybackError;
use crate::events::{DeviceKind, EventBus, MediaEvent};
use crate::guard::ResourceGuard;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Current state of a visibility-driven playback controller
#[derive(Debug)]
pub enum PlaybackState {
    /// No start attempted yet
    Idle,
    /// Asynchronous start in flight
    Starting,
    /// Playback running
    Playing,
    /// Playback paused (the authoritative state whenever the resource is
    /// not visible)
    Paused,
    /// The last start was rejected; the next true-visibility signal is a
    /// fresh attempt
    StartRejected(PlaybackError),
}

impl PlaybackState {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "Idle",
            PlaybackState::Starting => "Starting",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
            PlaybackState::StartRejected(_) => "StartRejected",
        }
    }
}

/// Ticket for an in-flight start attempt; the completion must present it to
/// [`VisibilityPlaybackController::complete_start`].
#[derive(Debug)]
pub struct StartTicket {
    token: u64,
    handle: DeviceHandle,
}

impl StartTicket {
    pub fn token(&self) -> u64 {
        self.token
    }

    /// The pipeline handle the start attempt should drive
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }
}

/// Keeps a playback resource's running state synchronized with an external
/// visibility signal.
///
/// The sole external input is `on_visibility_change`; asynchronous start
/// completions re-enter through `complete_start` carrying a token, and a
/// completion whose token is stale (or that lands after the signal flipped
/// false) never forces the resource back into playing. The current signal
/// always wins.
///
/// The pipeline is acquired lazily on first visibility. Pausing is
/// synchronous and always succeeds; start rejection (e.g. autoplay policy)
/// is recorded, never fatal, and retried on the next true signal.
pub struct VisibilityPlaybackController {
    source: Arc<dyn PlaybackSource>,
    resource: ResourceRef,
    settings: PlaybackSettings,
    events: Option<EventBus>,
    state: PlaybackState,
    visible: bool,
    attempt: u64,
    guard: Option<ResourceGuard<DeviceHandle>>,
    disposed: bool,
}

impl VisibilityPlaybackController {
    pub fn new(
        source: Arc<dyn PlaybackSource>,
        resource: ResourceRef,
        settings: PlaybackSettings,
    ) -> Self {
        debug!("Playback controller created for {}", resource);

        Self {
            source,
            resource,
            settings,
            events: None,
            state: PlaybackState::Idle,
            visible: false,
            attempt: 0,
            guard: None,
            disposed: false,
        }
    }

    /// Attach an event bus for lifecycle telemetry
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    fn transition(&mut self, next: PlaybackState) {
        let from = self.state.name();
        let to = next.name();
        debug!("Playback {}: {} -> {}", self.resource, from, to);

        if let Some(bus) = &self.events {
            bus.publish(MediaEvent::PlaybackStateChanged {
                from: from.to_string(),
                to: to.to_string(),
                timestamp: Utc::now(),
            });
        }

        self.state = next;
    }

    fn wrap_guard(&self, handle: DeviceHandle) -> ResourceGuard<DeviceHandle> {
        let source = Arc::clone(&self.source);
        let events = self.events.clone();
        ResourceGuard::new(handle, move |h| {
            source.release(&h);
            if let Some(bus) = events {
                bus.publish(MediaEvent::DeviceReleased {
                    kind: DeviceKind::Playback,
                    handle_id: h.id(),
                    timestamp: Utc::now(),
                });
            }
        })
    }

    fn pause_if_held(&mut self) {
        if let Some(handle) = self.guard.as_ref().and_then(|g| g.handle()).copied() {
            self.source.pause(&handle);
        }
    }

    /// Apply the latest visibility signal.
    ///
    /// A false signal pauses synchronously from any state, including
    /// mid-start. A true signal from `Idle`, `Paused` or `StartRejected`
    /// begins a start attempt and returns a ticket the host drives through
    /// the playback primitive; use [`apply_visibility`](Self::apply_visibility)
    /// when no external event loop is involved.
    pub fn on_visibility_change(&mut self, visible: bool) -> Option<StartTicket> {
        if self.disposed {
            debug!("Playback {}: signal ignored after dispose", self.resource);
            return None;
        }

        self.visible = visible;

        if !visible {
            // The current signal wins over any in-flight start
            self.pause_if_held();

            if self.settings.release_when_hidden {
                if let Some(mut guard) = self.guard.take() {
                    guard.release();
                }
            }

            if !matches!(self.state, PlaybackState::Idle) {
                self.transition(PlaybackState::Paused);
            }
            return None;
        }

        match self.state {
            PlaybackState::Idle | PlaybackState::Paused | PlaybackState::StartRejected(_) => {
                let handle = match self.ensure_pipeline() {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!(
                            "Playback {}: pipeline acquisition failed: {}",
                            self.resource, e
                        );
                        self.transition(PlaybackState::StartRejected(e));
                        return None;
                    }
                };

                self.attempt += 1;
                self.transition(PlaybackState::Starting);
                Some(StartTicket {
                    token: self.attempt,
                    handle,
                })
            }
            PlaybackState::Starting | PlaybackState::Playing => {
                debug!(
                    "Playback {}: visibility true ignored, already {}",
                    self.resource,
                    self.state.name()
                );
                None
            }
        }
    }

    fn ensure_pipeline(&mut self) -> Result<DeviceHandle, PlaybackError> {
        if let Some(handle) = self.guard.as_ref().and_then(|g| g.handle()).copied() {
            return Ok(handle);
        }

        let handle = self.source.acquire(&self.resource)?;
        info!("Playback {}: pipeline acquired ({})", self.resource, handle);

        if let Some(bus) = &self.events {
            bus.publish(MediaEvent::DeviceAcquired {
                kind: DeviceKind::Playback,
                handle_id: handle.id(),
                timestamp: Utc::now(),
            });
        }

        self.guard = Some(self.wrap_guard(handle));
        Ok(handle)
    }

    /// Apply a start completion.
    ///
    /// Stale tickets (superseded attempt, or the controller was disposed)
    /// are discarded. A success that lands after the signal flipped false is
    /// paused immediately; the displayed state always matches the most
    /// recently received signal.
    pub fn complete_start(&mut self, ticket: StartTicket, outcome: Result<(), PlaybackError>) {
        let stale = self.disposed
            || ticket.token != self.attempt
            || !matches!(self.state, PlaybackState::Starting);

        if stale {
            debug!(
                "Playback {}: discarding stale start completion",
                self.resource
            );
            // The start may have physically begun; reconcile the pipeline
            // with the current signal before discarding
            if outcome.is_ok() && !self.visible {
                self.pause_if_held();
            }
            return;
        }

        match outcome {
            Ok(()) if self.visible => {
                info!("Playback {}: playing", self.resource);
                self.transition(PlaybackState::Playing);
            }
            Ok(()) => {
                // Visibility flipped away while the start was in flight
                debug!(
                    "Playback {}: start resolved after visibility lost, pausing",
                    self.resource
                );
                self.pause_if_held();
                self.transition(PlaybackState::Paused);
            }
            Err(e) => {
                if let Some(bus) = &self.events {
                    bus.publish(MediaEvent::StartRejected {
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                warn!("Playback {}: start rejected: {}", self.resource, e);
                self.transition(PlaybackState::StartRejected(e));
            }
        }
    }

    /// Convenience for hosts without their own event loop: apply the signal
    /// and, when it begins a start attempt, drive it to completion.
    pub async fn apply_visibility(&mut self, visible: bool) {
        if let Some(ticket) = self.on_visibility_change(visible) {
            let handle = ticket.handle();
            let outcome = self.source.play(&handle).await;
            self.complete_start(ticket, outcome);
        }
    }

    /// Tear the controller down: pause, release the pipeline, and suppress
    /// any effect of in-flight starts. Safe from any state; idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }

        self.pause_if_held();
        if let Some(mut guard) = self.guard.take() {
            guard.release();
        }

        // Invalidate any start still in flight
        self.attempt += 1;
        self.disposed = true;
        info!("Playback {} disposed", self.resource);
    }
}

impl Drop for VisibilityPlaybackController {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlaybackSource;

    fn controller(source: &MockPlaybackSource) -> VisibilityPlaybackController {
        crate::init_test_logging();
        VisibilityPlaybackController::new(
            Arc::new(source.clone()),
            ResourceRef::new("clip-1"),
            PlaybackSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_visible_starts_playing() {
        let source = MockPlaybackSource::new();
        let mut ctrl = controller(&source);

        ctrl.apply_visibility(true).await;

        assert!(matches!(ctrl.state(), PlaybackState::Playing));
        assert_eq!(source.acquire_count(), 1);
        assert_eq!(source.play_calls(), 1);
    }

    #[tokio::test]
    async fn test_hidden_pauses_synchronously() {
        let source = MockPlaybackSource::new();
        let mut ctrl = controller(&source);

        ctrl.apply_visibility(true).await;
        ctrl.apply_visibility(false).await;

        assert!(matches!(ctrl.state(), PlaybackState::Paused));
        assert_eq!(source.pause_calls(), 1);
    }

    #[tokio::test]
    async fn test_late_success_after_hidden_ends_paused() {
        let source = MockPlaybackSource::new();
        let mut ctrl = controller(&source);

        // Start attempt begins, then the signal flips false before the
        // asynchronous start resolves
        let ticket = ctrl.on_visibility_change(true).unwrap();
        ctrl.on_visibility_change(false);
        assert!(matches!(ctrl.state(), PlaybackState::Paused));

        ctrl.complete_start(ticket, Ok(()));

        assert!(matches!(ctrl.state(), PlaybackState::Paused));
        assert!(source.pause_calls() >= 1);
    }

    #[tokio::test]
    async fn test_true_false_true_interleaving() {
        let source = MockPlaybackSource::new();
        let mut ctrl = controller(&source);

        let first = ctrl.on_visibility_change(true).unwrap();
        ctrl.on_visibility_change(false);
        let second = ctrl.on_visibility_change(true).unwrap();

        // The first attempt resolves late and must not affect the second
        ctrl.complete_start(first, Ok(()));
        assert!(matches!(ctrl.state(), PlaybackState::Starting));

        ctrl.complete_start(second, Ok(()));
        assert!(matches!(ctrl.state(), PlaybackState::Playing));
    }

    #[tokio::test]
    async fn test_rejection_is_retried_on_next_signal() {
        let source = MockPlaybackSource::new();
        let mut ctrl = controller(&source);

        source.reject_starts(true);
        ctrl.apply_visibility(true).await;
        assert!(matches!(ctrl.state(), PlaybackState::StartRejected(_)));

        // No automatic retry
        assert_eq!(source.play_calls(), 1);

        // The next true signal is a fresh attempt
        source.reject_starts(false);
        ctrl.apply_visibility(false).await;
        ctrl.apply_visibility(true).await;
        assert!(matches!(ctrl.state(), PlaybackState::Playing));
        assert_eq!(source.play_calls(), 2);
    }

    #[tokio::test]
    async fn test_rejected_state_accepts_true_signal_directly() {
        let source = MockPlaybackSource::new();
        let mut ctrl = controller(&source);

        source.reject_starts(true);
        ctrl.apply_visibility(true).await;

        source.reject_starts(false);
        ctrl.apply_visibility(true).await;
        assert!(matches!(ctrl.state(), PlaybackState::Playing));
    }

    #[tokio::test]
    async fn test_pipeline_acquired_lazily_once() {
        let source = MockPlaybackSource::new();
        let mut ctrl = controller(&source);

        assert_eq!(source.acquire_count(), 0);

        ctrl.apply_visibility(true).await;
        ctrl.apply_visibility(false).await;
        ctrl.apply_visibility(true).await;

        // Pausing keeps the pipeline warm by default
        assert_eq!(source.acquire_count(), 1);
        assert_eq!(source.release_count(), 0);
    }

    #[tokio::test]
    async fn test_release_when_hidden_reacquires() {
        let source = MockPlaybackSource::new();
        let mut ctrl = VisibilityPlaybackController::new(
            Arc::new(source.clone()),
            ResourceRef::new("clip-1"),
            PlaybackSettings {
                release_when_hidden: true,
            },
        );

        ctrl.apply_visibility(true).await;
        ctrl.apply_visibility(false).await;
        assert_eq!(source.release_count(), 1);

        ctrl.apply_visibility(true).await;
        assert_eq!(source.acquire_count(), 2);
        assert!(matches!(ctrl.state(), PlaybackState::Playing));
    }

    #[tokio::test]
    async fn test_acquisition_failure_is_deferred_not_fatal() {
        let source = MockPlaybackSource::new();
        let mut ctrl = controller(&source);

        source.fail_acquire(true);
        ctrl.apply_visibility(true).await;
        assert!(matches!(ctrl.state(), PlaybackState::StartRejected(_)));

        source.fail_acquire(false);
        ctrl.apply_visibility(false).await;
        ctrl.apply_visibility(true).await;
        assert!(matches!(ctrl.state(), PlaybackState::Playing));
    }

    #[tokio::test]
    async fn test_dispose_releases_and_suppresses_late_start() {
        let source = MockPlaybackSource::new();
        let mut ctrl = controller(&source);

        let ticket = ctrl.on_visibility_change(true).unwrap();
        ctrl.dispose();

        assert_eq!(source.release_count(), 1);
        assert_eq!(source.pause_calls(), 1);

        // Late completion after dispose has no effect
        ctrl.complete_start(ticket, Ok(()));
        assert!(!matches!(ctrl.state(), PlaybackState::Playing));

        // Further signals are ignored
        assert!(ctrl.on_visibility_change(true).is_none());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let source = MockPlaybackSource::new();
        let mut ctrl = controller(&source);

        ctrl.apply_visibility(true).await;
        ctrl.dispose();
        ctrl.dispose();

        assert_eq!(source.release_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_disposes() {
        let source = MockPlaybackSource::new();
        {
            let mut ctrl = controller(&source);
            ctrl.apply_visibility(true).await;
        }
        assert_eq!(source.release_count(), 1);
    }

    #[tokio::test]
    async fn test_visible_while_playing_is_noop() {
        let source = MockPlaybackSource::new();
        let mut ctrl = controller(&source);

        ctrl.apply_visibility(true).await;
        ctrl.apply_visibility(true).await;

        assert_eq!(source.play_calls(), 1);
        assert!(matches!(ctrl.state(), PlaybackState::Playing));
    }
}
