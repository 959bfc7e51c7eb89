// ABOUTME: Fallback byte-stream transport
// ABOUTME: Readiness with a backup timer, bounded play retry, and stall grace before reporting closure

use crate::config::{ClientConfig, FormatHint};
use crate::error::StreamError;
use crate::transport::sink::{
    AudioSink, PlayError, SinkError, SinkEvent, SinkSubscription,
};
use crate::transport::stats::TransportStats;
use crate::transport::tasks::TaskTracker;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Events raised by the fallback transport
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackEvent {
    /// Enough data is buffered (or the backup timer fired)
    Ready,
    /// Playback is running
    Playing,
    /// Playback is waiting for data
    Buffering,
    /// Stream stalled beyond the grace window
    Closed(StreamError),
    /// Stream ended
    Ended,
    /// Terminal playback error
    Error(StreamError),
}

/// Pull-based continuous stream played through the shared sink
pub struct FallbackTransport {
    config: Arc<ClientConfig>,
    sink: Arc<dyn AudioSink>,
    tasks: TaskTracker,
    active: Option<ActiveStream>,
}

struct ActiveStream {
    source_url: String,
    subscription: SinkSubscription,
    driver: JoinHandle<()>,
}

impl FallbackTransport {
    /// Create an idle transport bound to `sink`
    pub fn new(config: Arc<ClientConfig>, sink: Arc<dyn AudioSink>, tasks: TaskTracker) -> Self {
        Self {
            config,
            sink,
            tasks,
            active: None,
        }
    }

    /// Start streaming `format`, disposing any previous stream first
    ///
    /// The caller owns the sink source: attach [`Self::source_url`] after
    /// this returns and detach it after [`Self::dispose`].
    pub async fn start(&mut self, format: FormatHint) -> mpsc::UnboundedReceiver<FallbackEvent> {
        self.dispose().await;

        let token = uuid::Uuid::new_v4().simple().to_string();
        let source_url = self.config.stream_url(format, &token);
        log::info!("Starting fallback stream: {}", source_url);

        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // Subscribed before the caller attaches, so an early CanPlay is not missed
        let subscription = self.sink.subscribe(Arc::new(move |event| {
            let _ = sink_tx.send(event);
        }));

        let driver = FallbackDriver {
            config: Arc::clone(&self.config),
            sink: Arc::clone(&self.sink),
            events: events_tx,
        };
        let driver = self.tasks.spawn(driver.run(sink_rx));

        self.active = Some(ActiveStream {
            source_url,
            subscription,
            driver,
        });
        events_rx
    }

    /// URL of the stream currently attached, if any
    pub fn source_url(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.source_url.as_str())
    }

    /// Whether a stream is active
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Sink counters for the current stream
    pub fn stats(&self) -> TransportStats {
        self.sink.stats()
    }

    /// Stop playback and remove handlers. Idempotent.
    pub async fn dispose(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        log::debug!("Disposing fallback stream {}", active.source_url);

        self.sink.pause();
        active.subscription.dispose();
        active.driver.abort();
        let _ = active.driver.await;
    }
}

impl Drop for FallbackTransport {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.subscription.dispose();
            active.driver.abort();
        }
    }
}

struct FallbackDriver {
    config: Arc<ClientConfig>,
    sink: Arc<dyn AudioSink>,
    events: mpsc::UnboundedSender<FallbackEvent>,
}

impl FallbackDriver {
    async fn run(self, mut sink_events: mpsc::UnboundedReceiver<SinkEvent>) {
        let mut ready = false;
        let mut playing = false;

        let backup = sleep(self.config.readiness_backup);
        tokio::pin!(backup);

        let stall = sleep(self.config.stall_grace);
        tokio::pin!(stall);
        let mut stalled = false;

        loop {
            tokio::select! {
                _ = &mut backup, if !ready => {
                    log::warn!(
                        "No readiness signal after {:?}, starting playback anyway",
                        self.config.readiness_backup
                    );
                    ready = true;
                    self.emit(FallbackEvent::Ready);
                    if !self.start_playback().await {
                        return;
                    }
                    playing = true;
                }
                _ = &mut stall, if stalled => {
                    log::warn!("Stream stalled for {:?}, reporting closed", self.config.stall_grace);
                    self.emit(FallbackEvent::Closed(StreamError::NetworkDisconnected(format!(
                        "no data for {:?}",
                        self.config.stall_grace
                    ))));
                    return;
                }
                event = sink_events.recv() => {
                    let Some(event) = event else {
                        return;
                    };
                    match event {
                        SinkEvent::CanPlay if !ready => {
                            ready = true;
                            self.emit(FallbackEvent::Ready);
                            if !self.start_playback().await {
                                return;
                            }
                            playing = true;
                        }
                        SinkEvent::CanPlay | SinkEvent::Playing | SinkEvent::Progress => {
                            if stalled {
                                stalled = false;
                                log::debug!("Stream recovered from stall");
                                if playing {
                                    self.emit(FallbackEvent::Playing);
                                }
                            }
                        }
                        SinkEvent::Waiting | SinkEvent::Stalled | SinkEvent::Suspended => {
                            if !stalled {
                                stalled = true;
                                stall.as_mut().reset(Instant::now() + self.config.stall_grace);
                                self.emit(FallbackEvent::Buffering);
                            }
                        }
                        SinkEvent::Ended => {
                            self.emit(FallbackEvent::Ended);
                            return;
                        }
                        SinkEvent::Error(SinkError::Network(message)) => {
                            self.emit(FallbackEvent::Error(StreamError::NetworkDisconnected(message)));
                            return;
                        }
                        SinkEvent::Error(SinkError::Decode(message))
                        | SinkEvent::Error(SinkError::Unsupported(message)) => {
                            self.emit(FallbackEvent::Error(StreamError::DecodeUnsupported(message)));
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Start playback with bounded retry; false when a terminal error was emitted
    async fn start_playback(&self) -> bool {
        let attempts = self.config.play_retry_attempts.max(1);

        for attempt in 1..=attempts {
            match self.sink.play().await {
                Ok(()) => {
                    self.emit(FallbackEvent::Playing);
                    return true;
                }
                Err(PlayError::Interrupted(reason)) => {
                    if attempt == attempts {
                        self.emit(FallbackEvent::Error(StreamError::NetworkDisconnected(format!(
                            "playback interrupted {} times: {}",
                            attempts, reason
                        ))));
                        return false;
                    }
                    log::debug!(
                        "Play attempt {}/{} interrupted ({}), retrying",
                        attempt,
                        attempts,
                        reason
                    );
                    sleep(self.config.play_retry_delay).await;
                }
                Err(PlayError::Unsupported(reason)) | Err(PlayError::Decode(reason)) => {
                    self.emit(FallbackEvent::Error(StreamError::DecodeUnsupported(reason)));
                    return false;
                }
            }
        }
        false
    }

    fn emit(&self, event: FallbackEvent) {
        let _ = self.events.send(event);
    }
}
