// ABOUTME: Signaling message type definitions and serialization
// ABOUTME: Supports client_id, offer, answer, ice, ping, pong, and error envelopes

use serde::{Deserialize, Serialize};

/// Top-level signaling message envelope
///
/// Signaling carries negotiation metadata only, never audio payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SignalingMessage {
    /// Server assigns this connection its client id; must precede any offer
    #[serde(rename = "client_id")]
    ClientId(ClientIdAssignment),

    /// Session description offer
    #[serde(rename = "offer")]
    Offer(SessionDescription),

    /// Session description answer
    #[serde(rename = "answer")]
    Answer(SessionDescription),

    /// Trickled ICE candidate
    #[serde(rename = "ice")]
    Ice(IceCandidate),

    /// Keepalive request
    #[serde(rename = "ping")]
    Ping(Keepalive),

    /// Keepalive response
    #[serde(rename = "pong")]
    Pong(Keepalive),

    /// Server-reported failure
    #[serde(rename = "error")]
    Error(SignalingError),
}

impl SignalingMessage {
    /// Wire name of this message, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::ClientId(_) => "client_id",
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer(_) => "answer",
            SignalingMessage::Ice(_) => "ice",
            SignalingMessage::Ping(_) => "ping",
            SignalingMessage::Pong(_) => "pong",
            SignalingMessage::Error(_) => "error",
        }
    }
}

/// Client id assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdAssignment {
    /// Server-issued identifier for this signaling connection
    pub client_id: String,
}

/// SDP session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Raw SDP text
    pub sdp: String,
    /// Client id the description belongs to (set on offers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default, rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// Keepalive payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Keepalive {
    /// Sender timestamp (milliseconds, sender clock)
    #[serde(default)]
    pub timestamp: i64,
}

/// Error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingError {
    /// Human-readable reason
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_wire_shape() {
        let json = r#"{"type":"client_id","payload":{"client_id":"c-42"}}"#;
        let msg: SignalingMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            SignalingMessage::ClientId(ClientIdAssignment {
                client_id: "c-42".to_string()
            })
        );
    }

    #[test]
    fn test_offer_omits_missing_client_id() {
        let msg = SignalingMessage::Answer(SessionDescription {
            sdp: "v=0".to_string(),
            client_id: None,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"answer","payload":{"sdp":"v=0"}}"#);
    }

    #[test]
    fn test_ice_uses_browser_field_names() {
        let json = r#"{"type":"ice","payload":{"candidate":"candidate:1 1 UDP 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        let msg: SignalingMessage = serde_json::from_str(json).unwrap();
        match msg {
            SignalingMessage::Ice(c) => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
            }
            other => panic!("expected ice, got {:?}", other),
        }
    }

    #[test]
    fn test_ping_without_timestamp() {
        let msg: SignalingMessage = serde_json::from_str(r#"{"type":"ping","payload":{}}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Ping(Keepalive { timestamp: 0 }));
        assert_eq!(msg.kind(), "ping");
    }
}
