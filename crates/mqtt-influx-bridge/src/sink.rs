// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP delivery of line protocol entries.
//!
//! One POST per entry to `<base>/write?db=<name>`, with the raw line text
//! as the body. Failures are classified and returned to the caller; the
//! sink itself never retries.

use crate::config::InfluxConfig;
use std::future::Future;
use thiserror::Error;
use tracing::trace;

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("write endpoint returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Destination for encoded line protocol entries.
///
/// The explicit `Send` bound on the returned future lets dispatch workers
/// drive any implementation from spawned tasks.
pub trait LineSink {
    /// Deliver one line protocol entry.
    fn write_line(&self, line: &str) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// InfluxDB v1-style write endpoint sink.
///
/// Holds one pooled HTTP client; cloning shares the pool. When no endpoint
/// is configured (empty base URL or database name) every write is a silent
/// no-op, which turns the bridge into a dry run.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: Option<String>,
}

impl InfluxSink {
    /// Build a sink from configuration.
    ///
    /// Certificate verification stays enabled unless the configuration
    /// explicitly opts out.
    pub fn new(config: &InfluxConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            write_url: config.write_url(),
        })
    }

    /// The resolved write URL, if an endpoint is configured.
    pub fn write_url(&self) -> Option<&str> {
        self.write_url.as_deref()
    }
}

impl LineSink for InfluxSink {
    fn write_line(&self, line: &str) -> impl Future<Output = Result<(), SinkError>> + Send {
        let client = self.client.clone();
        let url = self.write_url.clone();
        let body = line.to_owned();

        async move {
            let Some(url) = url else {
                trace!("No write endpoint configured, discarding '{}'", body);
                return Ok(());
            };

            let response = client.post(&url).body(body).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(SinkError::Status { status, body });
            }
            Ok(())
        }
    }
}
