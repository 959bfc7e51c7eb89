// ABOUTME: Audio sink abstraction shared by both transports
// ABOUTME: Handler registration returns a disposer so teardown never needs a fresh sink object

use crate::transport::peer::RemoteTrack;
use crate::transport::stats::TransportStats;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// What the sink plays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSource {
    /// Continuous byte stream at a URL
    Url(String),
    /// Remote track from the primary transport
    Track(RemoteTrack),
}

/// Media errors reported asynchronously by the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Network fetch failed
    Network(String),
    /// Data could not be decoded
    Decode(String),
    /// Container or codec not supported
    Unsupported(String),
}

/// Events raised by the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Enough data is buffered to start playback
    CanPlay,
    /// Playback started or resumed
    Playing,
    /// New data arrived
    Progress,
    /// Playback is waiting for data
    Waiting,
    /// Data stopped arriving
    Stalled,
    /// Fetching was suspended
    Suspended,
    /// The source ended
    Ended,
    /// The source failed
    Error(SinkError),
}

/// Playback start failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayError {
    /// Start was interrupted (e.g. by a reload); worth retrying
    #[error("play interrupted: {0}")]
    Interrupted(String),
    /// Format cannot be played
    #[error("format unsupported: {0}")]
    Unsupported(String),
    /// Data cannot be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

/// Event handler installed on a sink
pub type SinkHandler = Arc<dyn Fn(SinkEvent) + Send + Sync>;

/// Local audio output shared by both transports
///
/// Only the session coordinator attaches and detaches sources.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Attach a source, replacing any previous one
    fn attach(&self, source: SinkSource);

    /// Stop playback and drop the current source
    fn detach(&self);

    /// Start playback of the attached source
    async fn play(&self) -> Result<(), PlayError>;

    /// Pause playback
    fn pause(&self);

    /// Register an event handler; disposing the subscription removes it
    fn subscribe(&self, handler: SinkHandler) -> SinkSubscription;

    /// Byte/packet counters for the attached source
    fn stats(&self) -> TransportStats;
}

/// Disposer for a registered sink handler
///
/// Disposing is idempotent; dropping the subscription disposes it.
pub struct SinkSubscription {
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl SinkSubscription {
    /// Wrap a disposer
    pub fn new(disposer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disposer: Some(Box::new(disposer)),
        }
    }

    /// Remove the handler now
    pub fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl Drop for SinkSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SinkSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkSubscription")
            .field("active", &self.disposer.is_some())
            .finish()
    }
}

/// Handler registry for sink implementations
#[derive(Clone, Default)]
pub struct SinkHandlers {
    inner: Arc<Mutex<HandlerTable>>,
}

#[derive(Default)]
struct HandlerTable {
    next_id: u64,
    handlers: HashMap<u64, SinkHandler>,
}

impl SinkHandlers {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler
    pub fn add(&self, handler: SinkHandler) -> SinkSubscription {
        let id = {
            let mut table = self.inner.lock();
            let id = table.next_id;
            table.next_id += 1;
            table.handlers.insert(id, handler);
            id
        };
        let weak = Arc::downgrade(&self.inner);
        SinkSubscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().handlers.remove(&id);
            }
        })
    }

    /// Deliver an event to every registered handler
    pub fn emit(&self, event: SinkEvent) {
        // Snapshot so handlers may (un)subscribe re-entrantly
        let handlers: Vec<SinkHandler> = self.inner.lock().handlers.values().cloned().collect();
        for handler in handlers {
            handler(event.clone());
        }
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_disposer_removes_handler() {
        let handlers = SinkHandlers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let mut sub = handlers.add(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        handlers.emit(SinkEvent::CanPlay);
        sub.dispose();
        sub.dispose();
        handlers.emit(SinkEvent::CanPlay);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(handlers.is_empty());
    }

    #[test]
    fn test_drop_disposes() {
        let handlers = SinkHandlers::new();
        {
            let _sub = handlers.add(Arc::new(|_| {}));
            assert_eq!(handlers.len(), 1);
        }
        assert!(handlers.is_empty());
    }
}
