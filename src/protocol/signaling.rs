// ABOUTME: Signaling channel abstraction and WebSocket implementation
// ABOUTME: Opens the negotiation socket and frames SignalingMessage values as JSON text

use crate::error::Error;
use crate::protocol::messages::SignalingMessage;
use crate::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Bidirectional signaling channel
#[async_trait]
pub trait SignalingChannel: Send {
    /// Send a message to the server
    async fn send(&mut self, msg: &SignalingMessage) -> Result<()>;

    /// Receive the next message
    ///
    /// Returns `Ok(None)` when the server closed the channel cleanly and
    /// `Err` on an unclean drop. Must be cancel-safe.
    async fn recv(&mut self) -> Result<Option<SignalingMessage>>;

    /// Close the channel cleanly
    async fn close(&mut self);
}

/// Opens signaling channels
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Open a channel to `url`
    async fn open(&self, url: &str) -> Result<Box<dyn SignalingChannel>>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn SignalingChannel>> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        log::debug!("Signaling socket open: {}", url);
        Ok(Box::new(WsChannel { stream }))
    }
}

/// WebSocket signaling channel
pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SignalingChannel for WsChannel {
    async fn send(&mut self, msg: &SignalingMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.stream
            .send(WsMessage::Text(json))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<SignalingMessage>> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<SignalingMessage>(&text) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => {
                        log::warn!("Dropping unparseable signaling message: {}", e);
                    }
                },
                Ok(WsMessage::Close(frame)) => {
                    let clean = frame
                        .as_ref()
                        .map(|f| f.code == CloseCode::Normal || f.code == CloseCode::Away)
                        .unwrap_or(false);
                    return if clean {
                        Ok(None)
                    } else {
                        Err(Error::Connection(format!("closed uncleanly: {:?}", frame)))
                    };
                }
                Ok(WsMessage::Binary(data)) => {
                    log::debug!("Ignoring binary signaling frame ({} bytes)", data.len());
                }
                Ok(_) => {
                    // Ping/Pong frames are answered by tungstenite
                }
                Err(e) => return Err(Error::WebSocket(e.to_string())),
            }
        }
        Err(Error::Connection("stream ended without close frame".to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            log::debug!("Signaling close failed: {}", e);
        }
    }
}
