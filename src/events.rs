use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle events emitted by the media controllers.
///
/// These are telemetry: nothing in the crate depends on a subscriber being
/// present, and publishing to an empty bus is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MediaEvent {
    /// A capture session changed state
    CaptureStateChanged {
        session_id: Uuid,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },
    /// A frame was frozen and encoded
    ArtifactCaptured {
        session_id: Uuid,
        width: u32,
        height: u32,
        bytes: usize,
        timestamp: DateTime<Utc>,
    },
    /// A camera or playback device was acquired
    DeviceAcquired {
        kind: DeviceKind,
        handle_id: u64,
        timestamp: DateTime<Utc>,
    },
    /// A camera or playback device was released
    DeviceReleased {
        kind: DeviceKind,
        handle_id: u64,
        timestamp: DateTime<Utc>,
    },
    /// A device was revoked externally while in use
    DeviceRevoked {
        kind: DeviceKind,
        timestamp: DateTime<Utc>,
    },
    /// A playback controller changed state
    PlaybackStateChanged {
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },
    /// An asynchronous playback start was rejected
    StartRejected {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// Which kind of device an acquisition event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Camera,
    Playback,
}

impl MediaEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MediaEvent::CaptureStateChanged { timestamp, .. } => *timestamp,
            MediaEvent::ArtifactCaptured { timestamp, .. } => *timestamp,
            MediaEvent::DeviceAcquired { timestamp, .. } => *timestamp,
            MediaEvent::DeviceReleased { timestamp, .. } => *timestamp,
            MediaEvent::DeviceRevoked { timestamp, .. } => *timestamp,
            MediaEvent::PlaybackStateChanged { timestamp, .. } => *timestamp,
            MediaEvent::StartRejected { timestamp, .. } => *timestamp,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            MediaEvent::CaptureStateChanged {
                session_id, from, to, ..
            } => format!("Capture session {} moved {} -> {}", session_id, from, to),
            MediaEvent::ArtifactCaptured {
                width,
                height,
                bytes,
                ..
            } => format!("Artifact captured: {}x{} ({} bytes)", width, height, bytes),
            MediaEvent::DeviceAcquired {
                kind, handle_id, ..
            } => format!("{:?} device#{} acquired", kind, handle_id),
            MediaEvent::DeviceReleased {
                kind, handle_id, ..
            } => format!("{:?} device#{} released", kind, handle_id),
            MediaEvent::DeviceRevoked { kind, .. } => format!("{:?} device revoked", kind),
            MediaEvent::PlaybackStateChanged { from, to, .. } => {
                format!("Playback moved {} -> {}", from, to)
            }
            MediaEvent::StartRejected { reason, .. } => {
                format!("Playback start rejected: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            MediaEvent::CaptureStateChanged { .. } => "capture_state_changed",
            MediaEvent::ArtifactCaptured { .. } => "artifact_captured",
            MediaEvent::DeviceAcquired { .. } => "device_acquired",
            MediaEvent::DeviceReleased { .. } => "device_released",
            MediaEvent::DeviceRevoked { .. } => "device_revoked",
            MediaEvent::PlaybackStateChanged { .. } => "playback_state_changed",
            MediaEvent::StartRejected { .. } => "start_rejected",
        }
    }
}

/// Broadcast bus distributing lifecycle events to any number of subscribers
pub struct EventBus {
    sender: broadcast::Sender<MediaEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event; zero
    /// subscribers is not an error.
    pub fn publish(&self, event: MediaEvent) -> usize {
        match &event {
            MediaEvent::DeviceRevoked { kind, .. } => {
                warn!("{:?} device revoked while in use", kind);
            }
            MediaEvent::StartRejected { reason, .. } => {
                warn!("Playback start rejected: {}", reason);
            }
            MediaEvent::ArtifactCaptured {
                width,
                height,
                bytes,
                ..
            } => {
                info!("Artifact captured: {}x{} ({} bytes)", width, height, bytes);
            }
            _ => {
                debug!("Event: {}", event.description());
            }
        }

        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
