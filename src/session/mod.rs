// ABOUTME: Streaming session module
// ABOUTME: Session snapshot types, normalized stream events, and the coordinator that owns them

mod coordinator;
mod events;

pub use coordinator::StreamCoordinator;
pub use events::{EventBus, Subscription};

use crate::error::StreamError;
use std::time::SystemTime;

/// Normalized events from whichever transport is active
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A session is starting
    Connecting,
    /// Audio is available to play
    Ready,
    /// Audio is playing
    Playing,
    /// Playback is waiting for data or a reconnect
    Buffering,
    /// Terminal failure; the session is over
    Error(StreamError),
    /// The stream finished; the session is over
    Ended,
}

/// Which transport carries the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Peer-negotiated low-latency transport
    Primary,
    /// Continuous byte-stream transport
    Fallback,
    /// No transport attached
    None,
}

impl TransportKind {
    /// Convert to a log-friendly string
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Primary => "primary",
            TransportKind::Fallback => "fallback",
            TransportKind::None => "none",
        }
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Probing or negotiating
    Connecting,
    /// Audio available
    Ready,
    /// Audio playing
    Playing,
    /// Waiting for data
    Buffering,
    /// Ended with an error
    Failed,
    /// Ended normally
    Ended,
}

impl SessionState {
    fn for_event(event: &StreamEvent) -> Self {
        match event {
            StreamEvent::Connecting => SessionState::Connecting,
            StreamEvent::Ready => SessionState::Ready,
            StreamEvent::Playing => SessionState::Playing,
            StreamEvent::Buffering => SessionState::Buffering,
            StreamEvent::Error(_) => SessionState::Failed,
            StreamEvent::Ended => SessionState::Ended,
        }
    }

    /// Whether the session is over
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Ended)
    }
}

/// Snapshot of the client's single active session
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSession {
    /// Transport currently carrying audio
    pub kind: TransportKind,
    /// Lifecycle state
    pub state: SessionState,
    /// Opaque per-session token
    pub client_token: String,
    /// When the session was started
    pub started_at: SystemTime,
    /// Last time the session produced an event
    pub last_activity_at: SystemTime,
}

impl StreamSession {
    fn new() -> Self {
        let now = SystemTime::now();
        Self {
            kind: TransportKind::None,
            state: SessionState::Connecting,
            client_token: uuid::Uuid::new_v4().to_string(),
            started_at: now,
            last_activity_at: now,
        }
    }
}
