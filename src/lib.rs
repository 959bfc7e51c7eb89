// ABOUTME: Main library entry point for nowplaying
// ABOUTME: Exports the streaming session coordinator, transports, and edit-safe polling API

//! # nowplaying
//!
//! Client-side coordination for a single live "now playing" audio session.
//!
//! A session prefers a low-latency peer-negotiated transport (offer/answer/ICE
//! over a WebSocket signaling channel) and falls back to a continuous HTTP
//! byte stream when the peer path is disabled server-side or fails. Both
//! transports are normalized into one [`StreamEvent`] surface.
//!
//! Alongside the stream, the [`edit`] module keeps background status polling
//! from racing local list edits: an [`OperationLock`] pauses the poller for the
//! whole lifetime of a drag-reorder gesture.
//!
//! ## Features
//!
//! - **Session**: one coordinator, one active transport, deterministic teardown
//! - **Primary transport**: signaling state machine with heartbeat and backoff
//! - **Fallback transport**: readiness detection, bounded play retry, stall grace
//! - **Edits**: reference-counted operation lock, optimistic reorder, status poller
//!
//! ## Example: Starting a Session
//!
//! ```no_run
//! use nowplaying::backend::HttpBackend;
//! use nowplaying::protocol::WsConnector;
//! use nowplaying::session::{StreamCoordinator, StreamEvent};
//! use nowplaying::transport::{HttpStreamSink, UnavailablePeerFactory};
//! use nowplaying::{ClientConfig, FormatHint};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClientConfig::new("http://localhost:8080");
//!     let backend = Arc::new(HttpBackend::new(&config));
//!
//!     let coordinator = StreamCoordinator::new(
//!         config,
//!         backend,
//!         Arc::new(WsConnector),
//!         Arc::new(UnavailablePeerFactory),
//!         Arc::new(HttpStreamSink::new()),
//!     );
//!
//!     let mut events = coordinator.subscribe();
//!     coordinator.start_session(FormatHint::Mp3).await;
//!
//!     while let Some(event) = events.recv().await {
//!         if matches!(event, StreamEvent::Ended) {
//!             break;
//!         }
//!     }
//! }
//! ```

#![warn(missing_docs)]

/// HTTP backend collaborators (feature probe, reorder, status)
pub mod backend;
/// Client configuration
pub mod config;
/// Command-line argument handling for the client binary
pub mod cli;
/// Edit-safe list mutation and status polling
pub mod edit;
/// Signaling protocol and channel
pub mod protocol;
/// Streaming session coordinator
pub mod session;
/// Primary and fallback transports
pub mod transport;

pub use config::{ClientConfig, FormatHint};
pub use edit::{OperationGuard, OperationLock, ReorderIntent};
pub use error::StreamError;
pub use session::{StreamCoordinator, StreamEvent, StreamSession, TransportKind};

/// Result type for nowplaying operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for nowplaying
pub mod error {
    use thiserror::Error;

    /// Error types raised by collaborator implementations (sockets, HTTP, parsing)
    #[derive(Error, Debug)]
    pub enum Error {
        /// WebSocket-related error
        #[error("WebSocket error: {0}")]
        WebSocket(String),

        /// HTTP request error
        #[error("HTTP error: {0}")]
        Http(String),

        /// Protocol violation or parsing error
        #[error("Protocol error: {0}")]
        Protocol(String),

        /// Connection-related error
        #[error("Connection error: {0}")]
        Connection(String),

        /// Media peer error
        #[error("Peer error: {0}")]
        Peer(String),

        /// I/O error
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
    }

    impl From<serde_json::Error> for Error {
        fn from(e: serde_json::Error) -> Self {
            Error::Protocol(e.to_string())
        }
    }

    /// Failure taxonomy surfaced through the session event stream
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StreamError {
        /// Signaling channel could not be opened or was lost
        #[error("signaling unavailable: {0}")]
        SignalingUnavailable(String),

        /// Offer/answer negotiation was refused or malformed
        #[error("negotiation failed: {0}")]
        NegotiationFailed(String),

        /// No traffic within the liveness deadline
        #[error("transport timed out: {0}")]
        TransportTimeout(String),

        /// Sink cannot decode the stream
        #[error("decode unsupported: {0}")]
        DecodeUnsupported(String),

        /// Network link dropped
        #[error("network disconnected: {0}")]
        NetworkDisconnected(String),

        /// Backend refused a reorder
        #[error("reorder rejected: {0}")]
        ReorderRejected(String),

        /// Operation lock invariant was violated and repaired
        #[error("operation lock inconsistent: {0}")]
        LockInconsistent(String),
    }

    impl StreamError {
        /// Transient errors are retried locally before being surfaced
        pub fn is_transient(&self) -> bool {
            matches!(
                self,
                StreamError::SignalingUnavailable(_)
                    | StreamError::TransportTimeout(_)
                    | StreamError::NetworkDisconnected(_)
            )
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_transient_classification() {
            assert!(StreamError::SignalingUnavailable("x".into()).is_transient());
            assert!(StreamError::TransportTimeout("x".into()).is_transient());
            assert!(StreamError::NetworkDisconnected("x".into()).is_transient());
            assert!(!StreamError::NegotiationFailed("x".into()).is_transient());
            assert!(!StreamError::DecodeUnsupported("x".into()).is_transient());
            assert!(!StreamError::ReorderRejected("x".into()).is_transient());
        }
    }
}
