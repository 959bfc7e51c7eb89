// ABOUTME: Shared fakes for integration tests
// ABOUTME: Scripted feature probe, signaling connector, media peer, and audio sink

#![allow(dead_code)]

use async_trait::async_trait;
use nowplaying::backend::FeatureProbe;
use nowplaying::error::Error;
use nowplaying::protocol::messages::{ClientIdAssignment, SignalingError};
use nowplaying::protocol::{
    IceCandidate, SessionDescription, SignalingChannel, SignalingConnector, SignalingMessage,
};
use nowplaying::session::{StreamCoordinator, StreamEvent, Subscription};
use nowplaying::transport::{
    AudioSink, MediaPeer, PeerEvent, PeerFactory, PeerHandle, PeerState, PlayError, RemoteTrack,
    SinkEvent, SinkHandler, SinkHandlers, SinkSource, SinkSubscription, StreamCounters,
    TransportStats,
};
use nowplaying::{ClientConfig, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Probe whose answer can be flipped between sessions
#[derive(Default)]
pub struct FakeProbe {
    enabled: AtomicBool,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureProbe for FakeProbe {
    async fn primary_enabled(&self) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.enabled.load(Ordering::SeqCst))
    }
}

/// What the fake server does with one signaling open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Refuse the connection
    Fail,
    /// Assign a client id, answer the offer, and keep the link up
    Serve,
    /// Assign a client id, then report a signaling error
    Refuse,
    /// Answer keepalives but never assign a client id
    Mute,
}

/// Health of every open fake signaling connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Up,
    Reset,
    Closed,
}

/// Connector following a per-open plan; opens past the plan use the last entry
pub struct FakeConnector {
    plan: Mutex<VecDeque<Plan>>,
    last: Mutex<Plan>,
    opens: Mutex<Vec<Instant>>,
    link: watch::Sender<Link>,
    sent: Arc<Mutex<Vec<&'static str>>>,
}

impl FakeConnector {
    pub fn new(plan: impl IntoIterator<Item = Plan>) -> Self {
        let plan: VecDeque<Plan> = plan.into_iter().collect();
        let last = plan.back().copied().unwrap_or(Plan::Fail);
        let (link, _) = watch::channel(Link::Up);
        Self {
            plan: Mutex::new(plan),
            last: Mutex::new(last),
            opens: Mutex::new(Vec::new()),
            link,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().clone()
    }

    /// Kinds of messages the client has sent, across all connections
    pub fn sent(&self) -> Vec<&'static str> {
        self.sent.lock().clone()
    }

    /// Break every open connection uncleanly
    pub fn drop_link(&self) {
        self.link.send_replace(Link::Reset);
    }

    /// Close every open connection the way a server shutting down would
    pub fn close_link(&self) {
        self.link.send_replace(Link::Closed);
    }
}

#[async_trait]
impl SignalingConnector for FakeConnector {
    async fn open(&self, _url: &str) -> Result<Box<dyn SignalingChannel>> {
        self.opens.lock().push(Instant::now());
        let plan = self
            .plan
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.last.lock());

        let mut inbox = VecDeque::new();
        match plan {
            Plan::Fail => return Err(Error::Connection("connection refused".to_string())),
            Plan::Serve | Plan::Mute => {}
            Plan::Refuse => {
                inbox.push_back(SignalingMessage::Error(SignalingError {
                    message: "streaming disabled".to_string(),
                }));
            }
        }
        if plan != Plan::Mute {
            inbox.push_front(SignalingMessage::ClientId(ClientIdAssignment {
                client_id: "client-1".to_string(),
            }));
        }

        // A fresh connection starts with a healthy link
        self.link.send_replace(Link::Up);
        Ok(Box::new(FakeChannel {
            inbox,
            link: self.link.subscribe(),
            sent: Arc::clone(&self.sent),
        }))
    }
}

pub struct FakeChannel {
    inbox: VecDeque<SignalingMessage>,
    link: watch::Receiver<Link>,
    sent: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl SignalingChannel for FakeChannel {
    async fn send(&mut self, message: &SignalingMessage) -> Result<()> {
        if *self.link.borrow() != Link::Up {
            return Err(Error::Connection("link down".to_string()));
        }
        self.sent.lock().push(message.kind());
        match message {
            SignalingMessage::Offer(_) => {
                self.inbox.push_back(SignalingMessage::Answer(SessionDescription {
                    sdp: "v=0 answer".to_string(),
                    client_id: None,
                }));
            }
            SignalingMessage::Ping(keepalive) => {
                self.inbox.push_back(SignalingMessage::Pong(*keepalive));
            }
            _ => {}
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<SignalingMessage>> {
        if let Some(message) = self.inbox.pop_front() {
            return Ok(Some(message));
        }
        let link = match self.link.wait_for(|link| *link != Link::Up).await {
            Ok(link) => *link,
            Err(_) => Link::Reset,
        };
        match link {
            Link::Closed => Ok(None),
            _ => Err(Error::Connection("connection reset".to_string())),
        }
    }

    async fn close(&mut self) {}
}

/// Peer that connects as soon as the remote answer is applied
#[derive(Default)]
pub struct FakePeerFactory {
    created: AtomicUsize,
    latest: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
}

impl FakePeerFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Report a media state change from the most recently created peer
    pub fn report(&self, state: PeerState) {
        if let Some(events) = self.latest.lock().as_ref() {
            let _ = events.send(PeerEvent::State(state));
        }
    }
}

impl PeerFactory for FakePeerFactory {
    fn create(&self, _counters: Arc<StreamCounters>) -> Result<PeerHandle> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let (events, rx) = mpsc::unbounded_channel();
        *self.latest.lock() = Some(events.clone());
        Ok(PeerHandle {
            peer: Box::new(FakePeer {
                events,
                track_id: format!("track-{}", n),
            }),
            events: rx,
        })
    }
}

struct FakePeer {
    events: mpsc::UnboundedSender<PeerEvent>,
    track_id: String,
}

#[async_trait]
impl MediaPeer for FakePeer {
    async fn create_recvonly_offer(&mut self) -> Result<String> {
        Ok("v=0 recvonly".to_string())
    }

    async fn set_local_description(&mut self, _sdp: &str) -> Result<()> {
        Ok(())
    }

    async fn set_remote_description(&mut self, _sdp: &str) -> Result<()> {
        let _ = self.events.send(PeerEvent::State(PeerState::Connected));
        let _ = self.events.send(PeerEvent::Track(RemoteTrack {
            id: self.track_id.clone(),
        }));
        Ok(())
    }

    async fn add_ice_candidate(&mut self, _candidate: &IceCandidate) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) {}
}

/// Sink that records calls and optionally reports readiness on attach
pub struct FakeSink {
    handlers: SinkHandlers,
    announce_ready: bool,
    plays: AtomicUsize,
    detaches: AtomicUsize,
    sources: Mutex<Vec<String>>,
}

impl FakeSink {
    pub fn new(announce_ready: bool) -> Self {
        Self {
            handlers: SinkHandlers::new(),
            announce_ready,
            plays: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
            sources: Mutex::new(Vec::new()),
        }
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Every source attached so far: `url:<url>` or `track:<id>`
    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().clone()
    }

    pub fn emit(&self, event: SinkEvent) {
        self.handlers.emit(event);
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    fn attach(&self, source: SinkSource) {
        match source {
            SinkSource::Url(url) => {
                self.sources.lock().push(format!("url:{}", url));
                if self.announce_ready {
                    self.handlers.emit(SinkEvent::CanPlay);
                }
            }
            SinkSource::Track(track) => {
                self.sources.lock().push(format!("track:{}", track.id));
            }
        }
    }

    fn detach(&self) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }

    async fn play(&self) -> std::result::Result<(), PlayError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {}

    fn subscribe(&self, handler: SinkHandler) -> SinkSubscription {
        self.handlers.add(handler)
    }

    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Coordinator wired to fakes
pub struct Harness {
    pub probe: Arc<FakeProbe>,
    pub connector: Arc<FakeConnector>,
    pub peers: Arc<FakePeerFactory>,
    pub sink: Arc<FakeSink>,
    pub coordinator: StreamCoordinator,
}

impl Harness {
    pub fn new(primary_enabled: bool, plan: impl IntoIterator<Item = Plan>, announce_ready: bool) -> Self {
        init_logging();
        let probe = Arc::new(FakeProbe::new(primary_enabled));
        let connector = Arc::new(FakeConnector::new(plan));
        let peers = Arc::new(FakePeerFactory::default());
        let sink = Arc::new(FakeSink::new(announce_ready));
        let config = ClientConfig::new("http://radio.test")
            .reconnect(Duration::from_secs(2), 3)
            .readiness_backup(Duration::from_secs(3));
        let coordinator = StreamCoordinator::new(
            config,
            probe.clone(),
            connector.clone(),
            peers.clone(),
            sink.clone(),
        );
        Self {
            probe,
            connector,
            peers,
            sink,
            coordinator,
        }
    }
}

/// Wait for the next event, failing the test if none arrives
pub async fn next_event(events: &mut Subscription<StreamEvent>) -> StreamEvent {
    match tokio::time::timeout(Duration::from_secs(60), events.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event stream closed"),
        Err(_) => panic!("no event within 60s"),
    }
}

/// Collect the next `n` events
pub async fn next_events(events: &mut Subscription<StreamEvent>, n: usize) -> Vec<StreamEvent> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(next_event(events).await);
    }
    out
}
