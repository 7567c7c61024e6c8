// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT to InfluxDB bridge CLI.
//!
//! # Usage
//!
//! ```bash
//! # Subscribe to everything on a local broker, write to local InfluxDB
//! mqtt-influx-bridge
//!
//! # Specific topics and database
//! mqtt-influx-bridge --topics "sensors/#,machines/+/state" --influx-db telemetry
//!
//! # Using a configuration file
//! mqtt-influx-bridge --config bridge.toml
//!
//! # Dry run: subscribe and encode, but write nothing
//! mqtt-influx-bridge --influx-url "" --debug
//! ```

use clap::{Parser, Subcommand};
use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use mqtt_influx_bridge::{
    Bridge, BridgeConfig, ConfigError, DispatchConfig, InfluxConfig, MqttConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// MQTT to InfluxDB bridge
#[derive(Parser, Debug)]
#[command(name = "mqtt-influx-bridge")]
#[command(about = "Subscribes to MQTT topics and writes message fields to InfluxDB")]
#[command(version)]
struct Args {
    /// Configuration file path (connection flags are ignored when set)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    /// Topic filters to subscribe (comma-separated, MQTT wildcards allowed)
    #[arg(short, long, value_delimiter = ',', default_value = "#")]
    topics: Vec<String>,

    /// Subscription QoS level (0, 1, or 2)
    #[arg(short, long, default_value = "0")]
    qos: u8,

    /// InfluxDB base URL (empty disables writes)
    #[arg(long, default_value = "http://localhost:8086")]
    influx_url: String,

    /// InfluxDB database name
    #[arg(long, default_value = "mqtt")]
    influx_db: String,

    /// Statistics reporting interval in seconds (0 disables)
    #[arg(long, default_value = "60")]
    stats_interval: u64,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    debug: bool,

    /// Append logs to a rotating file in addition to standard output
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Rotate the log file once it reaches this size in bytes
    #[arg(long, default_value = "1048576")]
    log_max_bytes: usize,

    /// Rotated log files to keep (suffixed .1, .2, ...; 0 keeps none)
    #[arg(long, default_value = "3")]
    log_backup_count: usize,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate an example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "bridge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = Args::parse();

    if let Some(cmd) = args.command.take() {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    // The effective log level lives in the config (file value, overridden
    // by --log-level/--debug), so the config must be built first.
    let config = build_config(&args)?;
    init_logging(&config.log_level, &args);
    let bridge = Bridge::new(config)?;

    println!("MQTT-InfluxDB Bridge v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Broker: {}:{} (qos {})",
        bridge.config().mqtt.host,
        bridge.config().mqtt.port,
        bridge.config().mqtt.qos
    );
    for topic in &bridge.config().mqtt.topics {
        println!("Topic:  {}", topic);
    }
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let bridge_handle = bridge.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, stopping bridge...");
        bridge_handle.shutdown();
    });

    bridge.run().await?;
    Ok(())
}

/// Build the effective configuration: a file when given, flags otherwise.
/// A log level passed on the command line wins over the file's value.
fn build_config(args: &Args) -> Result<BridgeConfig, ConfigError> {
    if let Some(ref config_path) = args.config {
        let mut config = BridgeConfig::from_file(config_path)?;
        if let Some(level) = cli_log_level(args) {
            config.log_level = level;
        }
        return Ok(config);
    }

    let config = BridgeConfig {
        mqtt: MqttConfig {
            host: args.mqtt_host.clone(),
            port: args.mqtt_port,
            topics: args.topics.clone(),
            qos: args.qos,
            ..Default::default()
        },
        influx: InfluxConfig {
            url: args.influx_url.clone(),
            database: args.influx_db.clone(),
            ..Default::default()
        },
        stats_interval_secs: args.stats_interval,
        log_level: cli_log_level(args).unwrap_or_else(|| "info".to_string()),
        ..Default::default()
    };

    config.validate()?;
    Ok(config)
}

/// Log level given explicitly on the command line, if any.
fn cli_log_level(args: &Args) -> Option<String> {
    if args.debug {
        Some("debug".to_string())
    } else {
        args.log_level.clone()
    }
}

/// A size-rotated log file writer: rollover at `max_bytes`, old files kept
/// as `<path>.1`, `<path>.2`, ... up to `backup_count`.
fn rotating_writer(path: &Path, max_bytes: usize, backup_count: usize) -> FileRotate<AppendCount> {
    FileRotate::new(
        path,
        AppendCount::new(backup_count),
        ContentLimit::Bytes(max_bytes),
        Compression::None,
        None,
    )
}

fn init_logging(level: &str, args: &Args) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match &args.log_file {
        Some(path) => {
            let file = rotating_writer(path, args.log_max_bytes, args.log_backup_count);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = BridgeConfig {
        name: "plant-floor-bridge".to_string(),
        mqtt: MqttConfig {
            host: "broker.local".to_string(),
            topics: vec!["sensors/#".to_string(), "machines/+/state".to_string()],
            qos: 1,
            ..Default::default()
        },
        influx: InfluxConfig {
            url: "http://influx.local:8086".to_string(),
            database: "telemetry".to_string(),
            ..Default::default()
        },
        dispatch: DispatchConfig {
            workers: 4,
            ..Default::default()
        },
        ..Default::default()
    };

    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        "# MQTT-InfluxDB Bridge Configuration\n\
         # Generated by mqtt-influx-bridge gen-config\n\n{}",
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match BridgeConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Bridge: {}", config.name);
            println!(
                "Broker: {}:{} (qos {})",
                config.mqtt.host, config.mqtt.port, config.mqtt.qos
            );
            println!("Topics: {}", config.mqtt.topics.join(", "));
            match config.influx.write_url() {
                Some(url) => println!("Writes: {}", url),
                None => println!("Writes: disabled (dry run)"),
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
