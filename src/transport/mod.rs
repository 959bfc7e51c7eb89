// ABOUTME: Transport module for the live audio session
// ABOUTME: Primary peer transport, fallback byte stream, shared sink, heartbeat, and task tracking

mod fallback;
mod heartbeat;
mod http_sink;
mod peer;
mod primary;
mod sink;
mod stats;
mod tasks;

pub use fallback::{FallbackEvent, FallbackTransport};
pub use heartbeat::{Beat, Heartbeat};
pub use http_sink::HttpStreamSink;
pub use peer::{
    MediaPeer, PeerEvent, PeerFactory, PeerHandle, PeerState, RemoteTrack, UnavailablePeerFactory,
};
pub use primary::{PrimaryEvent, PrimaryState, PrimaryTransport};
pub use sink::{
    AudioSink, PlayError, SinkError, SinkEvent, SinkHandler, SinkHandlers, SinkSource,
    SinkSubscription,
};
pub use stats::{StreamCounters, TransportStats};
pub use tasks::TaskTracker;
