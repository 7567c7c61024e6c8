// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded dispatch of decoded records to the encoder and sink.
//!
//! A fixed pool of worker tasks pulls jobs from a bounded queue. `submit`
//! never blocks the caller: when the queue is full the message is dropped
//! and counted, so a slow database cannot stall the MQTT event task.

use crate::line_protocol::LineEncoder;
use crate::sink::LineSink;
use crate::stats::BridgeStats;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One unit of work: a validated record plus its receive context.
#[derive(Debug)]
pub struct DispatchJob {
    pub measurement: String,
    pub record: Map<String, Value>,
    pub timestamp_ns: i64,
}

/// Bounded worker pool feeding the sink.
pub struct Dispatcher {
    tx: mpsc::Sender<DispatchJob>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<BridgeStats>,
}

impl Dispatcher {
    /// Spawn `worker_count` workers over a queue holding `queue_depth` jobs.
    pub fn start<S>(
        sink: S,
        encoder: LineEncoder,
        stats: Arc<BridgeStats>,
        queue_depth: usize,
        worker_count: usize,
    ) -> Self
    where
        S: LineSink + Clone + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let sink = sink.clone();
                let encoder = encoder.clone();
                let stats = stats.clone();
                let rx = rx.clone();
                tokio::spawn(worker_loop(sink, encoder, stats, rx))
            })
            .collect();

        Self { tx, workers, stats }
    }

    /// Queue one record for encoding and delivery. Returns immediately.
    pub fn submit(&self, measurement: String, record: Map<String, Value>, timestamp_ns: i64) {
        let job = DispatchJob {
            measurement,
            record,
            timestamp_ns,
        };

        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                self.stats.record_dropped();
                warn!(
                    "Dispatch queue full, dropping message from '{}'",
                    job.measurement
                );
            }
            Err(TrySendError::Closed(job)) => {
                self.stats.record_dropped();
                debug!(
                    "Dispatcher stopped, dropping message from '{}'",
                    job.measurement
                );
            }
        }
    }

    /// Close the queue and wait for queued and in-flight work to finish.
    ///
    /// Returns `false` if the deadline expired with workers still busy.
    pub async fn drain(self, timeout: Duration) -> bool {
        drop(self.tx);

        let deadline = tokio::time::Instant::now() + timeout;
        for worker in self.workers {
            match tokio::time::timeout_at(deadline, worker).await {
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        true
    }
}

async fn worker_loop<S: LineSink>(
    sink: S,
    encoder: LineEncoder,
    stats: Arc<BridgeStats>,
    rx: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
) {
    loop {
        // The lock is held only while waiting for a job, never across a write
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };

        let Some(job) = job else {
            break;
        };

        process_job(&sink, &encoder, &stats, job).await;
    }
}

async fn process_job<S: LineSink>(
    sink: &S,
    encoder: &LineEncoder,
    stats: &BridgeStats,
    job: DispatchJob,
) {
    let entries = encoder.encode(&job.measurement, &job.record, job.timestamp_ns);
    if entries.is_empty() {
        debug!("No encodable fields in message on '{}'", job.measurement);
        return;
    }

    for entry in entries {
        let line = entry.to_line();
        match sink.write_line(&line).await {
            Ok(()) => stats.record_point(),
            Err(e) => {
                stats.record_write_error();
                warn!("Write failed for '{}': {}", line, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkError;
    use serde_json::json;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[derive(Clone)]
    struct SleepySink {
        delay: Duration,
        written: Arc<AtomicUsize>,
    }

    impl LineSink for SleepySink {
        fn write_line(&self, _line: &str) -> impl Future<Output = Result<(), SinkError>> + Send {
            let delay = self.delay;
            let written = self.written.clone();
            async move {
                tokio::time::sleep(delay).await;
                written.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    #[derive(Clone)]
    struct FailingSink;

    impl LineSink for FailingSink {
        fn write_line(&self, _line: &str) -> impl Future<Output = Result<(), SinkError>> + Send {
            async {
                Err(SinkError::Status {
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    body: "boom".to_string(),
                })
            }
        }
    }

    fn record() -> Map<String, Value> {
        match json!({"value": 1}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_submit_returns_before_write_completes() {
        let written = Arc::new(AtomicUsize::new(0));
        let sink = SleepySink {
            delay: Duration::from_millis(100),
            written: written.clone(),
        };
        let stats = Arc::new(BridgeStats::new());
        let dispatcher = Dispatcher::start(sink, LineEncoder::new(true), stats, 16, 2);

        let before = Instant::now();
        dispatcher.submit("sensors/temp1".to_string(), record(), 1);
        assert!(before.elapsed() < Duration::from_millis(50));
        assert_eq!(written.load(Ordering::SeqCst), 0);

        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        assert_eq!(written.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_queue_saturation_drops_and_counts() {
        let written = Arc::new(AtomicUsize::new(0));
        let sink = SleepySink {
            delay: Duration::from_millis(50),
            written: written.clone(),
        };
        let stats = Arc::new(BridgeStats::new());
        let dispatcher = Dispatcher::start(sink, LineEncoder::new(true), stats.clone(), 1, 1);

        // No await between submits: on the test's single-threaded runtime the
        // worker has not run yet, so one job is queued and the rest overflow
        for _ in 0..5 {
            dispatcher.submit("t".to_string(), record(), 1);
        }

        assert_eq!(stats.snapshot().messages_dropped, 4);
        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        assert_eq!(written.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().points_written, 1);
    }

    #[tokio::test]
    async fn test_failing_sink_counts_errors_and_keeps_going() {
        let stats = Arc::new(BridgeStats::new());
        let dispatcher =
            Dispatcher::start(FailingSink, LineEncoder::new(true), stats.clone(), 16, 2);

        for _ in 0..3 {
            dispatcher.submit("t".to_string(), record(), 1);
        }

        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.write_errors, 3);
        assert_eq!(snapshot.points_written, 0);
    }

    #[tokio::test]
    async fn test_drain_timeout() {
        let written = Arc::new(AtomicUsize::new(0));
        let sink = SleepySink {
            delay: Duration::from_secs(30),
            written,
        };
        let stats = Arc::new(BridgeStats::new());
        let dispatcher = Dispatcher::start(sink, LineEncoder::new(true), stats, 4, 1);

        dispatcher.submit("t".to_string(), record(), 1);
        assert!(!dispatcher.drain(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_unencodable_record_produces_no_writes() {
        let written = Arc::new(AtomicUsize::new(0));
        let sink = SleepySink {
            delay: Duration::from_millis(1),
            written: written.clone(),
        };
        let stats = Arc::new(BridgeStats::new());
        let dispatcher = Dispatcher::start(sink, LineEncoder::new(true), stats.clone(), 4, 1);

        let rec = match json!({"flag": true, "nested": {"a": 1}}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        dispatcher.submit("t".to_string(), rec, 1);

        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        assert_eq!(written.load(Ordering::SeqCst), 0);
        assert_eq!(stats.snapshot().points_written, 0);
    }

    #[tokio::test]
    async fn test_multi_field_message_writes_every_entry() {
        let written = Arc::new(AtomicUsize::new(0));
        let sink = SleepySink {
            delay: Duration::from_millis(1),
            written: written.clone(),
        };
        let stats = Arc::new(BridgeStats::new());
        let dispatcher = Dispatcher::start(sink, LineEncoder::new(true), stats.clone(), 8, 2);

        let rec = match json!({"value": 21.5, "unit": "C", "ok": true}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        dispatcher.submit("sensors/temp1".to_string(), rec, 1);

        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        assert_eq!(written.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot().points_written, 2);
    }
}
