// ABOUTME: Signaling protocol module
// ABOUTME: Message definitions and the channel used to negotiate the primary transport

/// Signaling message definitions
pub mod messages;
/// Signaling channel trait and WebSocket implementation
pub mod signaling;

pub use messages::{IceCandidate, SessionDescription, SignalingMessage};
pub use signaling::{SignalingChannel, SignalingConnector, WsChannel, WsConnector};
