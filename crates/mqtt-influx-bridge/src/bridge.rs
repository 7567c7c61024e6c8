// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core bridge implementation.
//!
//! Owns the MQTT connection, re-applies the subscription set on every
//! reconnect, validates payloads on the event task, and hands records to
//! the dispatcher. Runtime failures are logged and counted; only startup
//! problems surface as errors.

use crate::config::{BridgeConfig, ConfigError};
use crate::dispatch::Dispatcher;
use crate::line_protocol::{now_timestamp_ns, LineEncoder};
use crate::sink::{InfluxSink, SinkError};
use crate::stats::{BridgeStats, BridgeStatsSnapshot};
use rumqttc::{
    AsyncClient, ConnAck, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS, SubAck,
    SubscribeFilter, SubscribeReasonCode,
};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Capacity of the client's outgoing request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Pause between reconnect attempts after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Deadline for flushing the DISCONNECT packet on shutdown.
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Bridge already running")]
    AlreadyRunning,
}

/// Payload validation errors.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("top-level JSON value is {0}, expected an object")]
    NotAnObject(&'static str),
}

/// Decode a message payload as a flat JSON object.
pub fn parse_payload(payload: &[u8]) -> Result<Map<String, Value>, PayloadError> {
    let value: Value = serde_json::from_slice(payload)?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PayloadError::NotAnObject(json_type_name(&other))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// MQTT to InfluxDB bridge service.
///
/// Cheaply cloneable; clones share the same state, so a clone handed to a
/// signal task can stop the bridge driven elsewhere.
#[derive(Clone)]
pub struct Bridge {
    config: Arc<BridgeConfig>,
    sink: InfluxSink,
    stats: Arc<BridgeStats>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl Bridge {
    /// Create a new bridge from configuration.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let sink = InfluxSink::new(&config.influx)?;

        Ok(Self {
            config: Arc::new(config),
            sink,
            stats: Arc::new(BridgeStats::new()),
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get the bridge configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Check if the bridge is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Request the bridge to stop. Idempotent and safe from any task; a
    /// request made before `run` is not lost.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the bridge until shutdown.
    ///
    /// Connects to the broker, resubscribes on every CONNACK, and feeds
    /// validated records to the dispatcher. Returns after a shutdown
    /// request once the dispatcher has drained or its deadline expired.
    pub async fn run(&self) -> Result<(), BridgeError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadyRunning);
        }

        info!("Bridge '{}' starting", self.config.name);

        let mqtt = &self.config.mqtt;
        let mut options = MqttOptions::new(mqtt.client_id.clone(), mqtt.host.clone(), mqtt.port);
        options.set_keep_alive(mqtt.keep_alive());
        options.set_clean_session(true);

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let filters = self.subscription_filters();

        let dispatcher = Dispatcher::start(
            self.sink.clone(),
            LineEncoder::new(self.config.influx.escape_names),
            self.stats.clone(),
            self.config.dispatch.queue_depth,
            self.config.dispatch.effective_workers(),
        );

        match self.sink.write_url() {
            Some(url) => info!("Writing points to {}", url),
            None => warn!("No InfluxDB endpoint configured, running dry"),
        }

        let stats_enabled = self.config.stats_interval_secs > 0;
        let mut stats_interval =
            tokio::time::interval(Duration::from_secs(self.config.stats_interval_secs.max(1)));
        // The first tick completes immediately; consume it
        stats_interval.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Shutdown requested, disconnecting from broker");
                    if let Err(e) = client.disconnect().await {
                        debug!("MQTT disconnect request failed: {}", e);
                    }
                    flush_disconnect(&mut event_loop).await;
                    break;
                }
                _ = stats_interval.tick(), if stats_enabled => {
                    self.log_stats();
                }
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        self.on_connect(&client, &filters, &ack).await;
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        self.on_suback(&filters, &ack);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.on_message(&dispatcher, publish);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            "MQTT connection error: {} (retrying in {}s)",
                            e,
                            RECONNECT_DELAY.as_secs()
                        );
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }

        let timeout = self.config.dispatch.shutdown_timeout();
        if dispatcher.drain(timeout).await {
            debug!("Dispatcher drained");
        } else {
            warn!(
                "Dispatcher drain timed out after {}s, abandoning queued writes",
                timeout.as_secs()
            );
        }

        self.running.store(false, Ordering::SeqCst);

        let snapshot = self.stats.snapshot();
        info!(
            "Bridge '{}' stopped: {} messages received, {} points written, {} write errors, {} dropped",
            self.config.name,
            snapshot.messages_received,
            snapshot.points_written,
            snapshot.write_errors,
            snapshot.messages_dropped
        );

        Ok(())
    }

    /// Re-issue the full subscription set. Called on every CONNACK, so a
    /// broker restart recreates the subscriptions even without a session.
    async fn on_connect(&self, client: &AsyncClient, filters: &[SubscribeFilter], ack: &ConnAck) {
        info!(
            "Connected to {}:{} (session present: {})",
            self.config.mqtt.host, self.config.mqtt.port, ack.session_present
        );

        match client.subscribe_many(filters.to_vec()).await {
            Ok(()) => debug!("Subscription request sent for {} filter(s)", filters.len()),
            Err(e) => warn!("Subscribe request failed: {}", e),
        }
    }

    /// Log the broker's per-topic grant results.
    fn on_suback(&self, filters: &[SubscribeFilter], ack: &SubAck) {
        for (i, code) in ack.return_codes.iter().enumerate() {
            let topic = filters.get(i).map(|f| f.path.as_str()).unwrap_or("?");
            match code {
                SubscribeReasonCode::Success(qos) => {
                    info!("Subscribed to '{}' (granted {:?})", topic, qos);
                }
                SubscribeReasonCode::Failure => {
                    warn!("Broker rejected subscription to '{}'", topic);
                }
            }
        }
    }

    /// Validate and hand one message to the dispatcher.
    ///
    /// Runs on the event task: nothing here may wait on the database. The
    /// timestamp is captured before any processing so every entry encoded
    /// from this message carries the receive time.
    fn on_message(&self, dispatcher: &Dispatcher, publish: Publish) {
        let timestamp_ns = now_timestamp_ns();
        self.stats.record_received();

        let record = match parse_payload(&publish.payload) {
            Ok(record) => record,
            Err(e) => {
                self.stats.record_payload_error();
                warn!("Dropping message on '{}': {}", publish.topic, e);
                return;
            }
        };

        debug!(
            "Message on '{}' with {} field(s)",
            publish.topic,
            record.len()
        );
        dispatcher.submit(publish.topic, record, timestamp_ns);
    }

    fn subscription_filters(&self) -> Vec<SubscribeFilter> {
        let qos = qos_from_level(self.config.mqtt.qos);
        self.config
            .mqtt
            .topics
            .iter()
            .map(|t| SubscribeFilter::new(t.clone(), qos))
            .collect()
    }

    fn log_stats(&self) {
        let s = self.stats.snapshot();
        info!(
            "Stats: {} received ({:.1} msg/s), {} points written, {} write errors, {} payload errors, {} dropped",
            s.messages_received,
            s.messages_per_second(),
            s.points_written,
            s.write_errors,
            s.payload_errors,
            s.messages_dropped
        );
    }
}

/// Map a numeric QoS level to the client's enum. Levels above 2 are
/// rejected by configuration validation before this runs.
fn qos_from_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// Keep polling briefly so the DISCONNECT packet reaches the wire before
/// the connection is dropped.
async fn flush_disconnect(event_loop: &mut EventLoop) {
    let flush = async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush)
        .await
        .is_err()
    {
        debug!("DISCONNECT flush timed out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_creation() {
        let bridge = Bridge::new(BridgeConfig::default()).expect("create bridge");
        assert!(!bridge.is_running());
        assert_eq!(bridge.config().mqtt.port, 1883);
        assert_eq!(bridge.stats().messages_received, 0);
    }

    #[test]
    fn test_bridge_rejects_invalid_config() {
        let mut config = BridgeConfig::default();
        config.mqtt.qos = 7;
        assert!(matches!(Bridge::new(config), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_parse_payload_object() {
        let record = parse_payload(br#"{"value": 21.5, "unit": "C"}"#).expect("parse");
        assert_eq!(record.len(), 2);
        assert_eq!(record["unit"], serde_json::json!("C"));
    }

    #[test]
    fn test_parse_payload_invalid_json() {
        let err = parse_payload(b"not json").expect_err("must fail");
        assert!(matches!(err, PayloadError::Json(_)));
    }

    #[test]
    fn test_parse_payload_non_object() {
        let err = parse_payload(b"[1, 2, 3]").expect_err("must fail");
        match err {
            PayloadError::NotAnObject(kind) => assert_eq!(kind, "an array"),
            other => panic!("unexpected error: {}", other),
        }

        assert!(parse_payload(b"42").is_err());
        assert!(parse_payload(b"\"text\"").is_err());
        assert!(parse_payload(b"null").is_err());
    }

    #[test]
    fn test_subscription_filters() {
        let mut config = BridgeConfig::default();
        config.mqtt.topics = vec!["sensors/#".to_string(), "machines/+/state".to_string()];
        config.mqtt.qos = 1;

        let bridge = Bridge::new(config).expect("create bridge");
        let filters = bridge.subscription_filters();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].path, "sensors/#");
        assert!(filters.iter().all(|f| f.qos == QoS::AtLeastOnce));
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_stops_promptly() {
        let mut config = BridgeConfig::default();
        // Dry run, so the sink attempts no network traffic
        config.influx.url = String::new();
        config.dispatch.shutdown_timeout_secs = 1;

        let bridge = Bridge::new(config).expect("create bridge");
        // Requesting shutdown twice is harmless
        bridge.shutdown();
        bridge.shutdown();

        tokio::time::timeout(Duration::from_secs(5), bridge.run())
            .await
            .expect("run must return")
            .expect("run result");
        assert!(!bridge.is_running());
    }

    #[derive(Clone, Default)]
    struct CaptureWriter(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CaptureWriter {
        fn contents(&self) -> String {
            let buf = self.0.lock().expect("capture lock");
            String::from_utf8_lossy(&buf).into_owned()
        }
    }

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("capture lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_lifecycle_logs_carry_bridge_name() {
        let capture = CaptureWriter::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut config = BridgeConfig::default();
        config.name = "plant-floor".to_string();
        config.influx.url = String::new();
        config.dispatch.shutdown_timeout_secs = 1;

        let bridge = Bridge::new(config).expect("create bridge");
        bridge.shutdown();
        tokio::time::timeout(Duration::from_secs(5), bridge.run())
            .await
            .expect("run must return")
            .expect("run result");

        let output = capture.contents();
        assert!(output.contains("Bridge 'plant-floor' starting"));
        assert!(output.contains("Bridge 'plant-floor' stopped"));
    }

    #[tokio::test]
    async fn test_second_run_rejected_while_running() {
        let mut config = BridgeConfig::default();
        config.influx.url = String::new();
        let bridge = Bridge::new(config).expect("create bridge");

        let runner = bridge.clone();
        let task = tokio::spawn(async move { runner.run().await });

        // Give the first run a chance to claim the running flag
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bridge.is_running());
        assert!(matches!(
            bridge.run().await,
            Err(BridgeError::AlreadyRunning)
        ));

        bridge.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("task must finish")
            .expect("join");
        assert!(result.is_ok());
    }
}
