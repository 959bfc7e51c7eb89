// ABOUTME: Transport diagnostics counters
// ABOUTME: Byte and packet counters shared between a transport and its observers

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Payload bytes received
    pub bytes_received: u64,
    /// Packets (or read chunks) received
    pub packets_received: u64,
}

/// Live counters updated by the media path
#[derive(Debug, Default)]
pub struct StreamCounters {
    bytes: AtomicU64,
    packets: AtomicU64,
}

impl StreamCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one received packet of `bytes` length
    #[inline]
    pub fn record(&self, bytes: usize) {
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset to zero
    pub fn reset(&self) {
        self.bytes.store(0, Ordering::Relaxed);
        self.packets.store(0, Ordering::Relaxed);
    }

    /// Snapshot the counters
    pub fn snapshot(&self) -> TransportStats {
        TransportStats {
            bytes_received: self.bytes.load(Ordering::Relaxed),
            packets_received: self.packets.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let counters = StreamCounters::new();
        counters.record(1200);
        counters.record(800);
        assert_eq!(
            counters.snapshot(),
            TransportStats {
                bytes_received: 2000,
                packets_received: 2
            }
        );

        counters.reset();
        assert_eq!(counters.snapshot(), TransportStats::default());
    }
}
