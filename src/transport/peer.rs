// ABOUTME: Media peer abstraction for the primary transport
// ABOUTME: Receive-only offer/answer/ICE negotiation surface implemented by a peer media engine

use crate::error::Error;
use crate::protocol::IceCandidate;
use crate::transport::stats::StreamCounters;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection state reported by the media pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Negotiation in progress
    Connecting,
    /// Media is flowing
    Connected,
    /// Connectivity lost; the pipeline may still recover
    Disconnected,
    /// Connectivity failed permanently
    Failed,
}

/// Remote audio track delivered by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Track identifier
    pub id: String,
}

/// Events raised by a media peer
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Pipeline connection state changed
    State(PeerState),
    /// Locally gathered ICE candidate to trickle to the server
    LocalCandidate(IceCandidate),
    /// Decoded remote audio track is available
    Track(RemoteTrack),
}

/// One peer connection
///
/// The client only ever receives: offers ask for a single audio stream and
/// never add local tracks.
#[async_trait]
pub trait MediaPeer: Send {
    /// Create a receive-only audio offer
    async fn create_recvonly_offer(&mut self) -> Result<String>;

    /// Record the local description
    async fn set_local_description(&mut self, sdp: &str) -> Result<()>;

    /// Apply the remote answer
    async fn set_remote_description(&mut self, sdp: &str) -> Result<()>;

    /// Apply a remote ICE candidate
    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<()>;

    /// Tear the connection down
    async fn close(&mut self);
}

/// A freshly created peer and its event stream
pub struct PeerHandle {
    /// The peer connection
    pub peer: Box<dyn MediaPeer>,
    /// Events raised by the peer
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

/// Creates peer connections, one per signaling attempt
pub trait PeerFactory: Send + Sync {
    /// Create a peer that records received media into `counters`
    fn create(&self, counters: Arc<StreamCounters>) -> Result<PeerHandle>;
}

/// Factory for builds without a peer media engine
///
/// Every creation fails, so sessions negotiate nothing and go straight to the
/// fallback stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailablePeerFactory;

impl PeerFactory for UnavailablePeerFactory {
    fn create(&self, _counters: Arc<StreamCounters>) -> Result<PeerHandle> {
        Err(Error::Peer(
            "no peer media engine available in this build".to_string(),
        ))
    }
}
