// ABOUTME: Keepalive timer with a liveness deadline
// ABOUTME: Emits a ping every interval and expires when inbound traffic stops

use std::time::Duration;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

/// What the heartbeat wants the caller to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a ping now
    Ping,
    /// No inbound traffic within the deadline; treat the link as dead
    Expired,
}

/// Fixed-interval keepalive emitter
///
/// The deadline is `interval * miss_limit` after the last [`Heartbeat::touch`].
/// Driven from a `select!` loop via [`Heartbeat::next`], which is cancel-safe.
#[derive(Debug)]
pub struct Heartbeat {
    ticker: Interval,
    last_inbound: Instant,
    deadline: Duration,
}

impl Heartbeat {
    /// Start a heartbeat; the first ping is due one interval from now
    pub fn new(interval: Duration, miss_limit: u32) -> Self {
        let now = Instant::now();
        let mut ticker = interval_at(now + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker,
            last_inbound: now,
            deadline: interval * miss_limit.max(1),
        }
    }

    /// Record inbound traffic, pushing the liveness deadline out
    pub fn touch(&mut self) {
        self.last_inbound = Instant::now();
    }

    /// Instant at which the link is considered dead
    pub fn expires_at(&self) -> Instant {
        self.last_inbound + self.deadline
    }

    /// Whether the deadline has already passed
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at()
    }

    /// Wait for the next ping or for expiry, whichever comes first
    pub async fn next(&mut self) -> Beat {
        let expires_at = self.expires_at();
        tokio::select! {
            biased;
            _ = sleep_until(expires_at) => Beat::Expired,
            _ = self.ticker.tick() => {
                if self.is_expired() {
                    Beat::Expired
                } else {
                    Beat::Ping
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pings_then_expires_without_traffic() {
        let start = Instant::now();
        let mut heartbeat = Heartbeat::new(Duration::from_secs(5), 3);

        assert_eq!(heartbeat.next().await, Beat::Ping);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(heartbeat.next().await, Beat::Ping);
        assert_eq!(heartbeat.next().await, Beat::Expired);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_extends_deadline() {
        let start = Instant::now();
        let mut heartbeat = Heartbeat::new(Duration::from_secs(1), 2);

        for _ in 0..10 {
            assert_eq!(heartbeat.next().await, Beat::Ping);
            heartbeat.touch();
        }
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert!(!heartbeat.is_expired());

        assert_eq!(heartbeat.next().await, Beat::Ping);
        assert_eq!(heartbeat.next().await, Beat::Expired);
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }
}
