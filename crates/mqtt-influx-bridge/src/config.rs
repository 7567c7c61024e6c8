// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Supports both file-based (TOML) and programmatic configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge name (for identification in logs).
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// Statistics reporting interval in seconds (0 disables reporting).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// MQTT connection and subscription settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// InfluxDB write endpoint settings.
    #[serde(default)]
    pub influx: InfluxConfig,

    /// Worker pool and shutdown settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// MQTT connection and subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic filters to subscribe (MQTT wildcards allowed).
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,

    /// Subscription QoS level (0, 1, or 2), applied to every filter.
    #[serde(default)]
    pub qos: u8,

    /// Keep-alive interval in seconds (the client requires at least 5).
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

/// InfluxDB write endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// Base URL of the InfluxDB server. Empty disables writes.
    #[serde(default = "default_influx_url")]
    pub url: String,

    /// Database name. Empty disables writes.
    #[serde(default = "default_influx_database")]
    pub database: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_influx_timeout")]
    pub timeout_secs: u64,

    /// Skip TLS certificate verification (self-signed lab setups only).
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Escape line protocol special characters in measurement and field
    /// names. Disable to reproduce topic names byte for byte.
    #[serde(default = "default_true")]
    pub escape_names: bool,
}

/// Worker pool and shutdown settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum queued messages; beyond this, new messages are dropped.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Worker task count (0 = available parallelism).
    #[serde(default)]
    pub workers: usize,

    /// Drain deadline on shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_bridge_name() -> String {
    "mqtt-influx-bridge".to_string()
}

fn default_stats_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "mqtt-influx-bridge".to_string()
}

fn default_topics() -> Vec<String> {
    vec!["#".to_string()]
}

fn default_keep_alive() -> u64 {
    30
}

fn default_influx_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_influx_database() -> String {
    "mqtt".to_string()
}

fn default_influx_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_queue_depth() -> usize {
    1024
}

fn default_shutdown_timeout() -> u64 {
    5
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            stats_interval_secs: default_stats_interval(),
            log_level: default_log_level(),
            mqtt: MqttConfig::default(),
            influx: InfluxConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            topics: default_topics(),
            qos: 0,
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: default_influx_url(),
            database: default_influx_database(),
            timeout_secs: default_influx_timeout(),
            accept_invalid_certs: false,
            escape_names: true,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            workers: 0,
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.client_id.is_empty() {
            return Err(ConfigError::Invalid("client_id cannot be empty".into()));
        }
        if self.mqtt.topics.is_empty() {
            return Err(ConfigError::Invalid("No topic filters configured".into()));
        }
        if self.mqtt.topics.iter().any(|t| t.is_empty()) {
            return Err(ConfigError::Invalid("Empty topic filter".into()));
        }
        if self.mqtt.qos > 2 {
            return Err(ConfigError::Invalid(format!(
                "QoS must be 0, 1, or 2 (got {})",
                self.mqtt.qos
            )));
        }
        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid(
                "keep_alive_secs must be at least 5".into(),
            ));
        }
        if self.dispatch.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue_depth cannot be 0".into()));
        }
        if self.influx.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs cannot be 0".into()));
        }
        if !self.influx.url.is_empty()
            && !self.influx.url.starts_with("http://")
            && !self.influx.url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "InfluxDB URL must start with http:// or https:// (got '{}')",
                self.influx.url
            )));
        }
        Ok(())
    }
}

impl MqttConfig {
    /// Keep-alive interval as a duration.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl InfluxConfig {
    /// The resolved write URL, or `None` when the endpoint is disabled.
    pub fn write_url(&self) -> Option<String> {
        if self.url.is_empty() || self.database.is_empty() {
            return None;
        }
        Some(format!(
            "{}/write?db={}",
            self.url.trim_end_matches('/'),
            self.database
        ))
    }

    /// Per-request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DispatchConfig {
    /// Effective worker count: the configured value, or the host's
    /// available parallelism when set to 0.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    /// Drain deadline as a duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
