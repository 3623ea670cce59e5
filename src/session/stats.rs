//! Call statistics snapshot: a read-only accessor for observability.
//! No telemetry backend is wired up here — just in-process atomic
//! counters a caller can read.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// Point-in-time snapshot, cheap to clone and log. RTP send health
/// (consecutive errors, circuit breaker) lives on `Playout` itself,
/// which owns the only socket a call sends through; this tracks
/// inbound liveness and the outbound queue depth for observability.
#[derive(Debug, Clone, Copy)]
pub struct CallStatsSnapshot {
    pub packets_received: u64,
    pub playout_queue_depth: usize,
    pub duration_secs: u64,
    pub secs_since_last_received: u64,
}

pub struct CallStats {
    packets_received: AtomicU64,
    started_at: Instant,
    last_received_at: parking_lot::Mutex<Instant>,
}

impl CallStats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            packets_received: AtomicU64::new(0),
            started_at: now,
            last_received_at: parking_lot::Mutex::new(now),
        }
    }

    pub fn record_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        *self.last_received_at.lock() = Instant::now();
    }

    pub fn snapshot(&self, playout_queue_depth: usize) -> CallStatsSnapshot {
        CallStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            playout_queue_depth,
            duration_secs: self.started_at.elapsed().as_secs(),
            secs_since_last_received: self.last_received_at.lock().elapsed().as_secs(),
        }
    }
}

impl Default for CallStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = CallStats::new();
        stats.record_received();
        stats.record_received();
        let snapshot = stats.snapshot(4);
        assert_eq!(snapshot.packets_received, 2);
        assert_eq!(snapshot.playout_queue_depth, 4);
    }
}
