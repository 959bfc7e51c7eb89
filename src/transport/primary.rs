// ABOUTME: Primary transport state machine
// ABOUTME: Negotiates a receive-only peer audio session over signaling, with heartbeat and backoff

use crate::config::ClientConfig;
use crate::error::StreamError;
use crate::protocol::messages::{Keepalive, SessionDescription};
use crate::protocol::{IceCandidate, SignalingChannel, SignalingConnector, SignalingMessage};
use crate::transport::heartbeat::{Beat, Heartbeat};
use crate::transport::peer::{MediaPeer, PeerEvent, PeerFactory, PeerState, RemoteTrack};
use crate::transport::stats::{StreamCounters, TransportStats};
use crate::transport::tasks::TaskTracker;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Primary transport connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryState {
    /// Not connected; a reconnect may be pending
    Disconnected,
    /// Signaling open, negotiation in progress, or media path recovering
    Connecting,
    /// Media pipeline reports connected
    Connected,
    /// Gave up; terminal for this transport instance
    Failed,
    /// Explicitly closed; terminal
    Closed,
}

impl PrimaryState {
    /// Convert to a log-friendly string
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimaryState::Disconnected => "disconnected",
            PrimaryState::Connecting => "connecting",
            PrimaryState::Connected => "connected",
            PrimaryState::Failed => "failed",
            PrimaryState::Closed => "closed",
        }
    }
}

/// Events raised by the primary transport
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryEvent {
    /// State transition
    State(PrimaryState),
    /// Remote audio track is ready to be attached to the sink
    Track(RemoteTrack),
    /// Media path reported a transient disconnect
    Interrupted,
    /// Link dropped; a reconnect is scheduled after `delay`
    Retrying {
        /// 1-based reconnect attempt
        attempt: u32,
        /// Backoff before the attempt
        delay: Duration,
        /// Why the link dropped
        error: StreamError,
    },
    /// Terminal failure (retry budget exhausted or non-retryable error)
    Failed(StreamError),
    /// Server closed signaling cleanly; no reconnect
    RemoteClosed,
}

/// Handle to a running primary transport
///
/// Dropping the handle aborts the driver; [`PrimaryTransport::close`] shuts it
/// down cleanly and waits for it.
pub struct PrimaryTransport {
    state: watch::Receiver<PrimaryState>,
    shutdown: watch::Sender<bool>,
    driver: Option<JoinHandle<()>>,
    counters: Arc<StreamCounters>,
}

impl PrimaryTransport {
    /// Start connecting; events arrive on the returned receiver
    pub fn connect(
        config: Arc<ClientConfig>,
        connector: Arc<dyn SignalingConnector>,
        peers: Arc<dyn PeerFactory>,
        counters: Arc<StreamCounters>,
        tasks: &TaskTracker,
    ) -> (Self, mpsc::UnboundedReceiver<PrimaryEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PrimaryState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = Driver {
            config,
            connector,
            peers,
            counters: Arc::clone(&counters),
            events: events_tx,
            state: state_tx,
        };
        let handle = tasks.spawn(driver.run(shutdown_rx));

        (
            Self {
                state: state_rx,
                shutdown: shutdown_tx,
                driver: Some(handle),
                counters,
            },
            events_rx,
        )
    }

    /// Current state
    pub fn state(&self) -> PrimaryState {
        *self.state.borrow()
    }

    /// Received media counters
    pub fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }

    /// Close signaling and the peer; never reconnects. Idempotent.
    pub async fn close(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }
}

impl Drop for PrimaryTransport {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// How one signaling connection ended
#[derive(Debug)]
enum Outcome {
    /// Explicit close requested
    Shutdown,
    /// Server closed cleanly
    RemoteClosed,
    /// Unclean drop; eligible for reconnect
    Dropped(StreamError),
    /// Non-retryable failure
    Fatal(StreamError),
}

/// Per-connection negotiation state
struct Negotiation {
    peer: Box<dyn MediaPeer>,
    client_id: Option<String>,
    local_description_set: bool,
    pending_ice: Vec<IceCandidate>,
}

struct Driver {
    config: Arc<ClientConfig>,
    connector: Arc<dyn SignalingConnector>,
    peers: Arc<dyn PeerFactory>,
    counters: Arc<StreamCounters>,
    events: mpsc::UnboundedSender<PrimaryEvent>,
    state: watch::Sender<PrimaryState>,
}

impl Driver {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            self.set_state(PrimaryState::Connecting);

            match self.run_once(&mut attempt, &mut shutdown).await {
                Outcome::Shutdown => {
                    self.set_state(PrimaryState::Closed);
                    return;
                }
                Outcome::RemoteClosed => {
                    log::info!("Signaling closed by server");
                    self.set_state(PrimaryState::Disconnected);
                    self.emit(PrimaryEvent::RemoteClosed);
                    return;
                }
                Outcome::Fatal(error) => {
                    log::warn!("Primary transport failed: {}", error);
                    self.set_state(PrimaryState::Failed);
                    self.emit(PrimaryEvent::Failed(error));
                    return;
                }
                Outcome::Dropped(error) => {
                    attempt += 1;
                    if attempt > self.config.max_reconnect_attempts {
                        log::warn!(
                            "Primary transport giving up after {} reconnect attempts: {}",
                            self.config.max_reconnect_attempts,
                            error
                        );
                        self.set_state(PrimaryState::Failed);
                        self.emit(PrimaryEvent::Failed(error));
                        return;
                    }

                    let delay = self.config.backoff_delay(attempt);
                    log::info!(
                        "Signaling dropped ({}), reconnect attempt {} in {:?}",
                        error,
                        attempt,
                        delay
                    );
                    self.set_state(PrimaryState::Disconnected);
                    self.emit(PrimaryEvent::Retrying {
                        attempt,
                        delay,
                        error,
                    });

                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => {
                            self.set_state(PrimaryState::Closed);
                            return;
                        }
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Open signaling, negotiate, and run until the connection ends
    async fn run_once(&self, attempt: &mut u32, shutdown: &mut watch::Receiver<bool>) -> Outcome {
        let opened = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => return Outcome::Shutdown,
            opened = timeout(
                self.config.connect_timeout,
                self.connector.open(&self.config.signaling_url),
            ) => opened,
        };

        let mut channel = match opened {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => return Outcome::Dropped(StreamError::SignalingUnavailable(e.to_string())),
            Err(_) => {
                return Outcome::Dropped(StreamError::SignalingUnavailable(format!(
                    "open timed out after {:?}",
                    self.config.connect_timeout
                )))
            }
        };
        *attempt = 0;

        let handle = match self.peers.create(Arc::clone(&self.counters)) {
            Ok(handle) => handle,
            Err(e) => {
                channel.close().await;
                return Outcome::Fatal(StreamError::NegotiationFailed(e.to_string()));
            }
        };

        let mut negotiation = Negotiation {
            peer: handle.peer,
            client_id: None,
            local_description_set: false,
            pending_ice: Vec::new(),
        };

        let outcome = self
            .negotiate(channel.as_mut(), &mut negotiation, handle.events, shutdown)
            .await;

        negotiation.peer.close().await;
        if matches!(outcome, Outcome::Shutdown | Outcome::Fatal(_)) {
            channel.close().await;
        }
        outcome
    }

    async fn negotiate(
        &self,
        channel: &mut dyn SignalingChannel,
        negotiation: &mut Negotiation,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Outcome {
        let mut heartbeat = Heartbeat::new(
            self.config.heartbeat_interval,
            self.config.heartbeat_miss_limit,
        );
        let mut peer_events_open = true;

        // Keepalives alone must not hold a connection that never negotiates
        let deadline = sleep(self.config.negotiation_timeout);
        tokio::pin!(deadline);
        let mut media_connected = false;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return Outcome::Shutdown,
                _ = &mut deadline, if !media_connected => {
                    log::warn!(
                        "Media path not connected within {:?}",
                        self.config.negotiation_timeout
                    );
                    return Outcome::Dropped(StreamError::TransportTimeout(format!(
                        "negotiation did not complete within {:?}",
                        self.config.negotiation_timeout
                    )));
                }
                beat = heartbeat.next() => match beat {
                    Beat::Ping => {
                        let ping = SignalingMessage::Ping(Keepalive { timestamp: now_millis() });
                        if let Err(e) = channel.send(&ping).await {
                            return Outcome::Dropped(StreamError::NetworkDisconnected(e.to_string()));
                        }
                    }
                    Beat::Expired => {
                        return Outcome::Dropped(StreamError::TransportTimeout(format!(
                            "no signaling traffic for {:?}",
                            self.config.liveness_deadline()
                        )));
                    }
                },
                inbound = channel.recv() => match inbound {
                    Ok(Some(msg)) => {
                        heartbeat.touch();
                        if let Some(outcome) = self.handle_message(channel, negotiation, msg).await {
                            return outcome;
                        }
                    }
                    Ok(None) => return Outcome::RemoteClosed,
                    Err(e) => return Outcome::Dropped(StreamError::NetworkDisconnected(e.to_string())),
                },
                event = peer_events.recv(), if peer_events_open => match event {
                    Some(event) => {
                        if matches!(event, PeerEvent::State(PeerState::Connected)) {
                            media_connected = true;
                        }
                        if let Some(outcome) = self.handle_peer_event(channel, event).await {
                            return outcome;
                        }
                    }
                    None => peer_events_open = false,
                },
            }
        }
    }

    async fn handle_message(
        &self,
        channel: &mut dyn SignalingChannel,
        negotiation: &mut Negotiation,
        msg: SignalingMessage,
    ) -> Option<Outcome> {
        log::trace!("Signaling <- {}", msg.kind());

        match msg {
            SignalingMessage::ClientId(assignment) => {
                log::info!("Assigned client id {}", assignment.client_id);
                negotiation.client_id = Some(assignment.client_id);
                if negotiation.local_description_set {
                    log::debug!("Client id re-assigned after offer was sent");
                    return None;
                }
                self.send_offer(channel, negotiation).await.err()
            }
            SignalingMessage::Answer(answer) => {
                if !negotiation.local_description_set {
                    return Some(Outcome::Fatal(StreamError::NegotiationFailed(
                        "answer received before offer".to_string(),
                    )));
                }
                if let Err(e) = negotiation.peer.set_remote_description(&answer.sdp).await {
                    return Some(Outcome::Fatal(StreamError::NegotiationFailed(e.to_string())));
                }
                log::debug!("Remote description applied");
                None
            }
            SignalingMessage::Ice(candidate) => {
                if negotiation.local_description_set {
                    if let Err(e) = negotiation.peer.add_ice_candidate(&candidate).await {
                        log::warn!("Rejected remote ICE candidate: {}", e);
                    }
                } else {
                    negotiation.pending_ice.push(candidate);
                }
                None
            }
            SignalingMessage::Ping(keepalive) => {
                if let Err(e) = channel.send(&SignalingMessage::Pong(keepalive)).await {
                    return Some(Outcome::Dropped(StreamError::NetworkDisconnected(e.to_string())));
                }
                None
            }
            SignalingMessage::Pong(_) => None,
            SignalingMessage::Error(error) => {
                Some(Outcome::Fatal(StreamError::NegotiationFailed(error.message)))
            }
            SignalingMessage::Offer(_) => {
                log::warn!("Ignoring offer from server; this client only sends offers");
                None
            }
        }
    }

    async fn send_offer(
        &self,
        channel: &mut dyn SignalingChannel,
        negotiation: &mut Negotiation,
    ) -> Result<(), Outcome> {
        let negotiation_failed = |e: crate::error::Error| {
            Outcome::Fatal(StreamError::NegotiationFailed(e.to_string()))
        };

        let sdp = negotiation
            .peer
            .create_recvonly_offer()
            .await
            .map_err(negotiation_failed)?;
        negotiation
            .peer
            .set_local_description(&sdp)
            .await
            .map_err(negotiation_failed)?;
        negotiation.local_description_set = true;

        for candidate in std::mem::take(&mut negotiation.pending_ice) {
            if let Err(e) = negotiation.peer.add_ice_candidate(&candidate).await {
                log::warn!("Rejected buffered ICE candidate: {}", e);
            }
        }

        let offer = SignalingMessage::Offer(SessionDescription {
            sdp,
            client_id: negotiation.client_id.clone(),
        });
        channel
            .send(&offer)
            .await
            .map_err(|e| Outcome::Dropped(StreamError::NetworkDisconnected(e.to_string())))?;
        log::debug!("Receive-only offer sent");
        Ok(())
    }

    async fn handle_peer_event(
        &self,
        channel: &mut dyn SignalingChannel,
        event: PeerEvent,
    ) -> Option<Outcome> {
        match event {
            PeerEvent::State(PeerState::Connected) => {
                log::info!("Media path connected");
                self.set_state(PrimaryState::Connected);
                None
            }
            PeerEvent::State(PeerState::Disconnected) => {
                log::debug!("Media path interrupted");
                self.set_state(PrimaryState::Connecting);
                self.emit(PrimaryEvent::Interrupted);
                None
            }
            PeerEvent::State(PeerState::Failed) => Some(Outcome::Dropped(
                StreamError::NetworkDisconnected("media path failed".to_string()),
            )),
            PeerEvent::State(PeerState::Connecting) => None,
            PeerEvent::LocalCandidate(candidate) => {
                if let Err(e) = channel.send(&SignalingMessage::Ice(candidate)).await {
                    return Some(Outcome::Dropped(StreamError::NetworkDisconnected(e.to_string())));
                }
                None
            }
            PeerEvent::Track(track) => {
                log::debug!("Remote track {} available", track.id);
                self.emit(PrimaryEvent::Track(track));
                None
            }
        }
    }

    fn set_state(&self, next: PrimaryState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            log::debug!("Primary transport {} -> {}", previous.as_str(), next.as_str());
            self.emit(PrimaryEvent::State(next));
        }
    }

    fn emit(&self, event: PrimaryEvent) {
        let _ = self.events.send(event);
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means shut down
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
