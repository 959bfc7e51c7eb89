// ABOUTME: Reference-counted operation lock
// ABOUTME: Pauses background status polling while any local mutation is in flight, with a self-healing watchdog

use crate::error::StreamError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

#[derive(Debug)]
struct LockState {
    /// Owner tag -> when it was acquired
    holders: HashMap<String, Instant>,
    polling_paused: bool,
    /// Bumped every time polling goes from running to paused
    epoch: u64,
}

/// Gate between local mutations and the background status poller
///
/// Polling is paused iff at least one owner holds the lock. Acquire and
/// release are idempotent per owner tag.
#[derive(Debug)]
pub struct OperationLock {
    state: Mutex<LockState>,
    paused: watch::Sender<bool>,
}

impl OperationLock {
    /// Create an unheld lock
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: Mutex::new(LockState {
                holders: HashMap::new(),
                polling_paused: false,
                epoch: 0,
            }),
            paused,
        }
    }

    /// Add `tag` as a holder; returns false if it already held the lock
    pub fn acquire(&self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        let mut state = self.state.lock();
        if state.holders.contains_key(&tag) {
            return false;
        }
        state.holders.insert(tag.clone(), Instant::now());
        log::debug!("Operation lock acquired by {} ({} holders)", tag, state.holders.len());
        if state.holders.len() == 1 {
            self.set_paused(&mut state, true);
        }
        true
    }

    /// Remove `tag`; releasing an absent tag is a no-op returning false
    pub fn release(&self, tag: &str) -> bool {
        let mut state = self.state.lock();
        if state.holders.remove(tag).is_none() {
            return false;
        }
        log::debug!("Operation lock released by {} ({} holders)", tag, state.holders.len());
        if state.holders.is_empty() {
            self.set_paused(&mut state, false);
        }
        true
    }

    /// Acquire for `tag` and release when the returned guard drops
    pub fn guard(self: &Arc<Self>, tag: impl Into<String>) -> OperationGuard {
        let tag = tag.into();
        self.acquire(tag.clone());
        OperationGuard {
            lock: Arc::clone(self),
            tag,
            released: false,
        }
    }

    /// Whether polling is currently paused
    pub fn is_paused(&self) -> bool {
        self.state.lock().polling_paused
    }

    /// Number of current holders
    pub fn holder_count(&self) -> usize {
        self.state.lock().holders.len()
    }

    /// Whether `tag` currently holds the lock
    pub fn is_held_by(&self, tag: &str) -> bool {
        self.state.lock().holders.contains_key(tag)
    }

    /// Counter bumped on every pause; lets a poller detect a pause that came and went
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Observe pause/resume transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }

    /// Wait until polling is not paused
    pub async fn wait_resumed(&self) {
        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|p| !*p).await;
    }

    /// One watchdog pass: evict holders older than `max_hold` and repair the
    /// paused/holders invariant. Returns the inconsistency that was fixed.
    pub fn check(&self, max_hold: Duration) -> Option<StreamError> {
        let mut state = self.state.lock();
        let now = Instant::now();

        let stale: Vec<String> = state
            .holders
            .iter()
            .filter(|(_, acquired)| now.duration_since(**acquired) > max_hold)
            .map(|(tag, _)| tag.clone())
            .collect();
        for tag in &stale {
            log::warn!("Evicting operation lock holder {} held longer than {:?}", tag, max_hold);
            state.holders.remove(tag);
        }

        let should_pause = !state.holders.is_empty();
        if state.polling_paused == should_pause && stale.is_empty() {
            return None;
        }

        let problem = if !stale.is_empty() {
            format!("{} holder(s) never released: {}", stale.len(), stale.join(", "))
        } else if should_pause {
            format!("{} holder(s) but polling not paused", state.holders.len())
        } else {
            "polling paused with no holders".to_string()
        };
        if state.polling_paused != should_pause {
            self.set_paused(&mut state, should_pause);
        }

        let error = StreamError::LockInconsistent(problem);
        log::warn!("{}", error);
        Some(error)
    }

    /// Run [`OperationLock::check`] every `every`; the task ends when the lock is dropped
    pub fn spawn_watchdog(self: &Arc<Self>, every: Duration, max_hold: Duration) -> JoinHandle<()> {
        let lock: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(lock) = lock.upgrade() else {
                    return;
                };
                lock.check(max_hold);
            }
        })
    }

    fn set_paused(&self, state: &mut LockState, paused: bool) {
        if paused && !state.polling_paused {
            state.epoch += 1;
        }
        state.polling_paused = paused;
        self.paused.send_replace(paused);
        log::debug!("Status polling {}", if paused { "paused" } else { "resumed" });
    }

    #[cfg(test)]
    fn force_paused(&self, paused: bool) {
        let mut state = self.state.lock();
        state.polling_paused = paused;
        self.paused.send_replace(paused);
    }
}

impl Default for OperationLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII holder of an [`OperationLock`] entry
///
/// Releases on drop, so early returns, errors, panics, and dropped futures
/// all give the lock back.
#[derive(Debug)]
pub struct OperationGuard {
    lock: Arc<OperationLock>,
    tag: String,
    released: bool,
}

impl OperationGuard {
    /// Owner tag this guard holds
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Release now instead of at drop
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.lock.release(&self.tag);
        }
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
