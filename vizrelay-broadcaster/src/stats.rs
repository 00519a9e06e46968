//! Process-wide relay counters
//!
//! Counters only ever grow. They are plain atomics: readers never need a
//! consistent cut across them, so no lock is taken.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RelayStats {
    total_connections: AtomicU64,
    total_messages: AtomicU64,
    total_bytes: AtomicU64,
    frames_dropped: AtomicU64,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            total_messages: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn record_connection(&self) -> u64 {
        self.total_connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count one relayed frame, returning the running message total
    pub fn record_relay(&self, bytes: usize) -> u64 {
        self.total_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.total_messages.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(self.uptime())
    }

    fn snapshot_at(&self, uptime: Duration) -> StatsSnapshot {
        let total_messages = self.total_messages.load(Ordering::Relaxed);
        let total_bytes = self.total_bytes.load(Ordering::Relaxed);
        let secs = uptime.as_secs_f64();

        let (avg_messages_per_sec, avg_kb_per_sec) = if secs > 0.0 {
            (
                total_messages as f64 / secs,
                total_bytes as f64 / secs / 1024.0,
            )
        } else {
            (0.0, 0.0)
        };

        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_messages,
            total_bytes,
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            avg_messages_per_sec,
            avg_kb_per_sec,
            uptime_secs: uptime.as_secs(),
            started_at: self.started_at,
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters with derived rates
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub frames_dropped: u64,
    pub avg_messages_per_sec: f64,
    pub avg_kb_per_sec: f64,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = RelayStats::new();
        assert_eq!(stats.record_connection(), 1);
        assert_eq!(stats.record_connection(), 2);
        assert_eq!(stats.record_relay(100), 1);
        assert_eq!(stats.record_relay(50), 2);
        stats.record_dropped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.total_messages, 2);
        assert_eq!(snapshot.total_bytes, 150);
        assert_eq!(snapshot.frames_dropped, 1);
    }

    #[test]
    fn test_rates_use_uptime() {
        let stats = RelayStats::new();
        for _ in 0..120 {
            stats.record_relay(1024);
        }

        let snapshot = stats.snapshot_at(Duration::from_secs(60));
        assert_eq!(snapshot.uptime_secs, 60);
        assert!((snapshot.avg_messages_per_sec - 2.0).abs() < f64::EPSILON);
        assert!((snapshot.avg_kb_per_sec - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_uptime_has_zero_rates() {
        let stats = RelayStats::new();
        stats.record_relay(10);

        let snapshot = stats.snapshot_at(Duration::ZERO);
        assert_eq!(snapshot.avg_messages_per_sec, 0.0);
        assert_eq!(snapshot.avg_kb_per_sec, 0.0);
    }
}
