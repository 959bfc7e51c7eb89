// ABOUTME: Streaming session coordinator
// ABOUTME: Probes, runs primary with immediate fallback, normalizes events, and owns session teardown

use super::events::{EventBus, Subscription};
use super::{SessionState, StreamEvent, StreamSession, TransportKind};
use crate::backend::FeatureProbe;
use crate::config::{ClientConfig, FormatHint};
use crate::error::StreamError;
use crate::protocol::SignalingConnector;
use crate::transport::{
    AudioSink, FallbackEvent, FallbackTransport, PeerFactory, PrimaryEvent, PrimaryState,
    PrimaryTransport, SinkSource, StreamCounters, TaskTracker, TransportStats,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long a disposing driver gets to close its transport before it is aborted
const DISPOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Owner of the client's single streaming session
///
/// Starting a session always tears down the previous one first. Events from
/// either transport arrive normalized as [`StreamEvent`]s on subscriptions.
pub struct StreamCoordinator {
    shared: Arc<Shared>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
}

struct ActiveSession {
    shutdown: watch::Sender<bool>,
    driver: JoinHandle<()>,
}

struct Shared {
    config: Arc<ClientConfig>,
    probe: Arc<dyn FeatureProbe>,
    connector: Arc<dyn SignalingConnector>,
    peers: Arc<dyn PeerFactory>,
    sink: Arc<dyn AudioSink>,
    counters: Arc<StreamCounters>,
    tasks: TaskTracker,
    bus: EventBus<StreamEvent>,
    session: Mutex<Option<StreamSession>>,
}

impl StreamCoordinator {
    /// Create a coordinator around its collaborators
    pub fn new(
        config: ClientConfig,
        probe: Arc<dyn FeatureProbe>,
        connector: Arc<dyn SignalingConnector>,
        peers: Arc<dyn PeerFactory>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                probe,
                connector,
                peers,
                sink,
                counters: Arc::new(StreamCounters::new()),
                tasks: TaskTracker::new(),
                bus: EventBus::new(),
                session: Mutex::new(None),
            }),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Receive session events
    pub fn subscribe(&self) -> Subscription<StreamEvent> {
        self.shared.bus.subscribe()
    }

    /// Start a new session, disposing any active one first
    pub async fn start_session(&self, format: FormatHint) -> StreamSession {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            log::info!("Replacing active session");
            self.dispose(previous).await;
        }

        let session = StreamSession::new();
        log::info!(
            "Starting session {} ({})",
            session.client_token,
            format.as_str()
        );
        *self.shared.session.lock() = Some(session.clone());
        self.shared.counters.reset();
        self.shared.emit(StreamEvent::Connecting);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = SessionDriver {
            shared: Arc::clone(&self.shared),
            format,
        };
        let driver = self.shared.tasks.spawn(driver.run(shutdown_rx));

        *active = Some(ActiveSession {
            shutdown: shutdown_tx,
            driver,
        });
        session
    }

    /// Dispose the active session, if any. Idempotent.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.dispose(previous).await;
        }
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Option<StreamSession> {
        self.shared.session.lock().clone()
    }

    /// Counters of the transport currently carrying audio
    pub fn stats(&self) -> TransportStats {
        let kind = self
            .shared
            .session
            .lock()
            .as_ref()
            .map_or(TransportKind::None, |s| s.kind);
        match kind {
            TransportKind::Primary => self.shared.counters.snapshot(),
            TransportKind::Fallback => self.shared.sink.stats(),
            TransportKind::None => TransportStats::default(),
        }
    }

    /// Background tasks (drivers, timers) still alive
    pub fn live_tasks(&self) -> usize {
        self.shared.tasks.live()
    }

    async fn dispose(&self, mut previous: ActiveSession) {
        previous.shutdown.send_replace(true);
        if tokio::time::timeout(DISPOSE_TIMEOUT, &mut previous.driver)
            .await
            .is_err()
        {
            log::warn!("Session driver did not stop within {:?}, aborting", DISPOSE_TIMEOUT);
            previous.driver.abort();
            let _ = previous.driver.await;
        }
        self.shared.sink.pause();
        self.shared.sink.detach();
        *self.shared.session.lock() = None;
        log::debug!("Session disposed");
    }
}

impl Drop for StreamCoordinator {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.shutdown.send_replace(true);
            active.driver.abort();
        }
        self.shared.bus.close();
    }
}

impl Shared {
    fn emit(&self, event: StreamEvent) {
        if let Some(session) = self.session.lock().as_mut() {
            session.state = SessionState::for_event(&event);
            session.last_activity_at = SystemTime::now();
        }
        log::debug!("Session event: {:?}", event);
        self.bus.publish(event);
    }

    fn set_kind(&self, kind: TransportKind) {
        if let Some(session) = self.session.lock().as_mut() {
            session.kind = kind;
        }
        log::info!("Active transport: {}", kind.as_str());
    }
}

/// How the primary phase of a session ended
enum PrimaryOutcome {
    Shutdown,
    Ended,
    Fallback(StreamError),
}

struct SessionDriver {
    shared: Arc<Shared>,
    format: FormatHint,
}

impl SessionDriver {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let enabled = tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            enabled = self.shared.probe.primary_enabled() => match enabled {
                Ok(enabled) => enabled,
                Err(e) => {
                    log::warn!("Feature probe failed, using fallback: {}", e);
                    false
                }
            },
        };

        if enabled {
            match self.run_primary(&mut shutdown).await {
                PrimaryOutcome::Shutdown => return,
                PrimaryOutcome::Ended => {
                    self.shared.set_kind(TransportKind::None);
                    self.shared.emit(StreamEvent::Ended);
                    return;
                }
                PrimaryOutcome::Fallback(reason) => {
                    log::info!("Primary transport unavailable ({}), switching to fallback", reason);
                }
            }
        } else {
            log::info!("Primary transport disabled by server");
        }

        self.run_fallback(&mut shutdown).await;
    }

    async fn run_primary(&self, shutdown: &mut watch::Receiver<bool>) -> PrimaryOutcome {
        let shared = &self.shared;
        let (mut primary, mut events) = PrimaryTransport::connect(
            Arc::clone(&shared.config),
            Arc::clone(&shared.connector),
            Arc::clone(&shared.peers),
            Arc::clone(&shared.counters),
            &shared.tasks,
        );
        shared.set_kind(TransportKind::Primary);

        let mut ever_connected = false;
        let mut connected = false;
        let mut track_attached = false;
        let mut playing = false;
        let mut buffering = false;

        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => break PrimaryOutcome::Shutdown,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break PrimaryOutcome::Fallback(StreamError::NegotiationFailed(
                    "primary transport stopped unexpectedly".to_string(),
                ));
            };

            match event {
                PrimaryEvent::State(PrimaryState::Connected) => {
                    connected = true;
                    if !ever_connected {
                        ever_connected = true;
                        shared.emit(StreamEvent::Ready);
                    } else if playing && buffering {
                        buffering = false;
                        shared.emit(StreamEvent::Playing);
                    }
                }
                PrimaryEvent::State(state) => {
                    log::debug!("Primary transport {}", state.as_str());
                }
                PrimaryEvent::Track(track) => {
                    log::debug!("Attaching remote track {}", track.id);
                    shared.sink.attach(SinkSource::Track(track));
                    track_attached = true;
                }
                PrimaryEvent::Interrupted => {
                    connected = false;
                    if ever_connected && !buffering {
                        buffering = true;
                        shared.emit(StreamEvent::Buffering);
                    }
                }
                PrimaryEvent::Retrying {
                    attempt,
                    delay,
                    error,
                } => {
                    if !ever_connected {
                        break PrimaryOutcome::Fallback(error);
                    }
                    log::info!("Primary reconnect {} in {:?} after {}", attempt, delay, error);
                    connected = false;
                    track_attached = false;
                    playing = false;
                    if !buffering {
                        buffering = true;
                        shared.emit(StreamEvent::Buffering);
                    }
                }
                PrimaryEvent::Failed(error) => break PrimaryOutcome::Fallback(error),
                PrimaryEvent::RemoteClosed => {
                    if ever_connected {
                        break PrimaryOutcome::Ended;
                    }
                    break PrimaryOutcome::Fallback(StreamError::SignalingUnavailable(
                        "server closed signaling before connecting".to_string(),
                    ));
                }
            }

            if connected && track_attached && !playing {
                match shared.sink.play().await {
                    Ok(()) => {
                        playing = true;
                        buffering = false;
                        shared.emit(StreamEvent::Playing);
                    }
                    Err(e) => {
                        break PrimaryOutcome::Fallback(StreamError::DecodeUnsupported(e.to_string()))
                    }
                }
            }
        };

        primary.close().await;
        if track_attached || playing {
            shared.sink.pause();
            shared.sink.detach();
        }
        outcome
    }

    async fn run_fallback(&self, shutdown: &mut watch::Receiver<bool>) {
        let shared = &self.shared;
        let mut fallback = FallbackTransport::new(
            Arc::clone(&shared.config),
            Arc::clone(&shared.sink),
            shared.tasks.clone(),
        );
        let mut events = fallback.start(self.format).await;
        if let Some(url) = fallback.source_url() {
            shared.sink.attach(SinkSource::Url(url.to_string()));
        }
        shared.set_kind(TransportKind::Fallback);

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };

            match event {
                FallbackEvent::Ready => shared.emit(StreamEvent::Ready),
                FallbackEvent::Playing => shared.emit(StreamEvent::Playing),
                FallbackEvent::Buffering => shared.emit(StreamEvent::Buffering),
                FallbackEvent::Ended => {
                    shared.set_kind(TransportKind::None);
                    shared.emit(StreamEvent::Ended);
                    break;
                }
                FallbackEvent::Closed(error) | FallbackEvent::Error(error) => {
                    log::warn!("Fallback stream failed: {}", error);
                    shared.set_kind(TransportKind::None);
                    shared.emit(StreamEvent::Error(error));
                    break;
                }
            }
        }

        fallback.dispose().await;
        shared.sink.detach();
    }
}
