// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Live counters for the ingestion pipeline.
///
/// Updated from the event task and the dispatch workers, read from the
/// periodic stats reporter. All counters are monotonic.
#[derive(Debug)]
pub struct BridgeStats {
    /// Messages received from the broker.
    pub messages_received: AtomicU64,
    /// Messages dropped because the dispatch queue was full.
    pub messages_dropped: AtomicU64,
    /// Messages dropped because the payload failed validation.
    pub payload_errors: AtomicU64,
    /// Line entries written successfully.
    pub points_written: AtomicU64,
    /// Line entries lost to write failures.
    pub write_errors: AtomicU64,
    /// Creation time, for uptime calculation.
    created: Instant,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            payload_errors: AtomicU64::new(0),
            points_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_payload_error(&self) {
        self.payload_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_point(&self) {
        self.points_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current counters.
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            payload_errors: self.payload_errors.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone)]
pub struct BridgeStatsSnapshot {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub payload_errors: u64,
    pub points_written: u64,
    pub write_errors: u64,
    pub uptime_secs: u64,
}

impl BridgeStatsSnapshot {
    /// Average receive rate since startup.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.messages_received as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = BridgeStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_dropped();
        stats.record_payload_error();
        stats.record_point();
        stats.record_write_error();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.messages_dropped, 1);
        assert_eq!(snapshot.payload_errors, 1);
        assert_eq!(snapshot.points_written, 1);
        assert_eq!(snapshot.write_errors, 1);
    }

    #[test]
    fn test_fresh_stats_are_zero() {
        let snapshot = BridgeStats::new().snapshot();
        assert_eq!(snapshot.messages_received, 0);
        assert_eq!(snapshot.points_written, 0);
        assert_eq!(snapshot.write_errors, 0);
    }

    #[test]
    fn test_zero_uptime_rate() {
        let snapshot = BridgeStatsSnapshot {
            messages_received: 100,
            messages_dropped: 0,
            payload_errors: 0,
            points_written: 0,
            write_errors: 0,
            uptime_secs: 0,
        };
        assert_eq!(snapshot.messages_per_second(), 0.0);
    }

    #[test]
    fn test_messages_per_second() {
        let snapshot = BridgeStatsSnapshot {
            messages_received: 100,
            messages_dropped: 0,
            payload_errors: 0,
            points_written: 0,
            write_errors: 0,
            uptime_secs: 10,
        };
        assert_eq!(snapshot.messages_per_second(), 10.0);
    }
}
