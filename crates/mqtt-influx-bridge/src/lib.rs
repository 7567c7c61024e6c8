// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT to InfluxDB Bridge
//!
//! Subscribes to a set of MQTT topics, interprets each message payload as
//! a flat JSON object, and writes every numeric or string field as a
//! separate InfluxDB point using the v1 line protocol
//! (`measurement field=value timestamp`). The topic becomes the
//! measurement name and the receive time becomes the point timestamp.
//!
//! # Features
//!
//! - **Automatic resubscription**: the full topic set is re-applied on
//!   every reconnect
//! - **Bounded dispatch**: a fixed worker pool behind an explicit queue
//!   depth keeps a slow database from stalling the MQTT session
//! - **Type-directed encoding**: integers, floats, and strings map to
//!   their line protocol forms, with numeric-looking strings coerced
//! - **Fire-and-forget delivery**: write failures are logged and counted,
//!   never retried
//!
//! # Quick Start
//!
//! ```bash
//! # Bridge everything from a local broker into the "mqtt" database
//! mqtt-influx-bridge
//!
//! # Select topics and a database
//! mqtt-influx-bridge --topics "sensors/#" --influx-db telemetry
//!
//! # Using a config file
//! mqtt-influx-bridge --config bridge.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! [mqtt]
//! host = "broker.local"
//! topics = ["sensors/#", "machines/+/state"]
//! qos = 1
//!
//! [influx]
//! url = "http://influx.local:8086"
//! database = "telemetry"
//! ```

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod line_protocol;
pub mod sink;
pub mod stats;

pub use bridge::{Bridge, BridgeError, PayloadError};
pub use config::{BridgeConfig, ConfigError, DispatchConfig, InfluxConfig, MqttConfig};
pub use dispatch::Dispatcher;
pub use line_protocol::{FieldValue, LineEncoder, LineEntry};
pub use sink::{InfluxSink, LineSink, SinkError};
pub use stats::{BridgeStats, BridgeStatsSnapshot};
