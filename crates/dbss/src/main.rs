// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Database State Server CLI
//!
//! Bridges a State Server's object field traffic to a Database Server over
//! the message bus.
//!
//! # Usage
//!
//! ```bash
//! # Run against a real message bus
//! dbss --bus-addr 127.0.0.1:7199 --range 100000:199999 \
//!     --bus-channel 500000 --database-channel 400000 --dc-file game.dc
//!
//! # Using a configuration file
//! dbss --config dbss.toml
//!
//! # Exercise the dispatcher without a real bus, for local testing
//! dbss --mock --range 100000:199999 --dc-file game.dc
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbss::bus::{BusInterface, MockBusInterface, TcpBusInterface};
use dbss::{Config, DbssService};
use dbss_schema::DcSchema;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dbss")]
#[command(about = "Database State Server -- bridges State Server field traffic to a Database Server")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML). Overrides every other flag below.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Owned DOID range, inclusive, as "min:max".
    #[arg(long, value_parser = parse_range, conflicts_with = "config")]
    range: Option<(u32, u32)>,

    /// This DBSS instance's own bus channel.
    #[arg(long, conflicts_with = "config")]
    bus_channel: Option<u64>,

    /// The Database Server's bus channel.
    #[arg(long, conflicts_with = "config")]
    database_channel: Option<u64>,

    /// `.dc` schema file to load (repeatable).
    #[arg(long = "dc-file", conflicts_with = "config")]
    dc_files: Vec<String>,

    /// Message bus address, e.g. "127.0.0.1:7199". Ignored with `--mock`.
    #[arg(long, default_value = "127.0.0.1:7199")]
    bus_addr: String,

    /// Drive the dispatcher against an in-memory bus instead of connecting
    /// to a real message director; useful for smoke-testing a schema.
    #[arg(long)]
    mock: bool,

    /// Statistics reporting interval in seconds (0 to disable).
    #[arg(long, default_value_t = 10)]
    stats_interval: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a `.dc` schema file and report its classes, without starting the service.
    Validate {
        /// `.dc` schema file(s) to check.
        dc_files: Vec<String>,
    },
}

fn parse_range(s: &str) -> Result<(u32, u32), String> {
    let (min, max) = s
        .split_once(':')
        .ok_or_else(|| format!("expected MIN:MAX, got '{s}'"))?;
    let min: u32 = min.parse().map_err(|_| format!("invalid range min '{min}'"))?;
    let max: u32 = max.parse().map_err(|_| format!("invalid range max '{max}'"))?;
    Ok((min, max))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(Commands::Validate { dc_files }) = args.command {
        return cmd_validate(dc_files);
    }

    let config = build_config(&args)?;
    config.validate().context("invalid configuration")?;
    let schema = Arc::new(DcSchema::load_files(&config.dc_file_paths).context("loading dc schema")?);

    tracing::info!(
        range_min = config.range_min,
        range_max = config.range_max,
        bus_channel = config.bus_channel,
        database_channel = config.database_channel,
        classes = schema.classes().len(),
        "dbss starting"
    );

    if args.mock {
        tracing::info!("running against an in-memory bus (--mock)");
        let bus = Arc::new(MockBusInterface::new());
        run(config, schema, bus, args.stats_interval).await
    } else {
        let bus = Arc::new(
            TcpBusInterface::connect(&args.bus_addr)
                .await
                .with_context(|| format!("connecting to message bus at {}", args.bus_addr))?,
        );
        tracing::info!(addr = %args.bus_addr, "connected to message bus");
        run(config, schema, bus, args.stats_interval).await
    }
}

async fn run(
    config: Config,
    schema: Arc<DcSchema>,
    bus: Arc<dyn BusInterface>,
    stats_interval: u64,
) -> Result<()> {
    let service = DbssService::new(&config, schema, bus);
    let handle = service.subscribe(&config)?;

    if stats_interval > 0 {
        let stats_handle = handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval));
            loop {
                ticker.tick().await;
                if !stats_handle.is_running() {
                    break;
                }
                let stats = stats_handle.stats();
                tracing::info!(messages_dispatched = stats.messages_dispatched, "dbss stats");
            }
        });
    }

    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, shutting down");
            shutdown_handle.stop();
        }
    });

    service.run().await
}

fn build_config(args: &Args) -> Result<Config> {
    if let Some(ref path) = args.config {
        return Ok(Config::from_file(path).with_context(|| format!("loading config from {}", path.display()))?);
    }

    let (range_min, range_max) = args
        .range
        .ok_or_else(|| anyhow::anyhow!("missing --range (or use --config)"))?;

    let mut builder = Config::builder()
        .range(range_min, range_max)
        .bus_channel(args.bus_channel.unwrap_or(0))
        .database_channel(args.database_channel.unwrap_or(0))
        .log_level(args.log_level.clone());
    for path in &args.dc_files {
        builder = builder.dc_file(path.clone());
    }
    Ok(builder.build())
}

fn cmd_validate(dc_files: Vec<String>) -> Result<()> {
    let schema = DcSchema::load_files(&dc_files).context("loading dc schema")?;
    let classes: Vec<_> = schema.classes().collect();
    println!("Schema valid: {} class(es)", classes.len());
    for class in &classes {
        println!(
            "  {} (id={}, {} field(s))",
            class.name,
            class.id,
            class.field_order.len()
        );
    }
    Ok(())
}
