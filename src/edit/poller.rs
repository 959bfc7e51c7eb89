// ABOUTME: Background playback-status poller
// ABOUTME: Refreshes server status on an interval, skipping and discarding results while the operation lock is held

use super::lock::OperationLock;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Server-side playback status as reported by the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    /// Identifier of the item currently on air
    #[serde(default)]
    pub current_item: Option<String>,
    /// Title of the item currently on air
    #[serde(default)]
    pub title: Option<String>,
    /// Position within the current item, in seconds
    #[serde(default)]
    pub position_secs: f64,
    /// Number of listeners connected to the stream
    #[serde(default)]
    pub listeners: u32,
}

/// Source of playback status snapshots
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetch the current status
    async fn fetch_status(&self) -> Result<PlaybackStatus>;
}

/// Periodically pulls [`PlaybackStatus`] unless the operation lock pauses it
pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    lock: Arc<OperationLock>,
    every: Duration,
    latest: watch::Sender<Option<PlaybackStatus>>,
    polls: Arc<AtomicU64>,
}

impl StatusPoller {
    /// Create a poller that fetches from `source` every `every`
    pub fn new(source: Arc<dyn StatusSource>, lock: Arc<OperationLock>, every: Duration) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            source,
            lock,
            every,
            latest,
            polls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Receive every applied status snapshot
    pub fn subscribe(&self) -> watch::Receiver<Option<PlaybackStatus>> {
        self.latest.subscribe()
    }

    /// Number of fetches issued so far
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// One poll: waits out any pause, fetches, and applies the result only if
    /// no pause happened while the fetch was in flight. Returns whether it applied.
    pub async fn poll_once(&self) -> bool {
        self.lock.wait_resumed().await;
        let epoch = self.lock.epoch();

        self.polls.fetch_add(1, Ordering::Relaxed);
        let status = match self.source.fetch_status().await {
            Ok(status) => status,
            Err(e) => {
                log::debug!("Status poll failed: {}", e);
                return false;
            }
        };

        if self.lock.is_paused() || self.lock.epoch() != epoch {
            log::debug!("Discarding status poll that raced a local edit");
            return false;
        }
        self.latest.send_replace(Some(status));
        true
    }

    /// Poll forever on the configured interval
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                self.poll_once().await;
                tokio::time::sleep(self.every).await;
            }
        })
    }
}
