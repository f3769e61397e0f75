//! Whiteboard Peer
//!
//! Headless peer for the shared whiteboard. Joins the multicast session,
//! catches up on history, logs every record it applies and leaves cleanly on
//! Ctrl+C. Useful as an always-on history holder for a segment.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use whiteboard_sync::{Session, SessionBuilder};

mod config;
mod console;

use config::{Overrides, PeerConfig};
use console::{ConsoleUi, LogRenderer};

/// Shared whiteboard peer
#[derive(Parser, Debug)]
#[command(name = "whiteboard")]
#[command(about = "Headless peer for a multicast shared whiteboard", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective config to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Multicast group
    #[arg(long)]
    group: Option<Ipv4Addr>,

    /// Interface address used to join the group
    #[arg(long)]
    interface: Option<Ipv4Addr>,

    /// Address advertised to other peers
    #[arg(long)]
    advertise_ip: Option<Ipv4Addr>,

    /// Share this file as an image object once connected
    #[arg(long)]
    share: Option<PathBuf>,

    /// Position of the shared image
    #[arg(long, num_args = 2, value_names = ["X", "Y"], default_values_t = [0, 0])]
    at: Vec<i32>,

    /// Replay the log after catch-up, pausing this many milliseconds per record
    #[arg(long)]
    replay_ms: Option<u64>,

    /// Honour clear requests from other peers
    #[arg(long)]
    accept_clear: bool,

    /// Seconds between status lines (0 = never)
    #[arg(long)]
    status_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            group: self.group,
            interface: self.interface,
            advertise_ip: self.advertise_ip,
            accept_clear: self.accept_clear,
            status_interval_secs: self.status_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => PeerConfig::load(path)?,
        None => PeerConfig::default(),
    };
    config.apply(&args.overrides());

    if let Some(path) = &args.write_config {
        config.save(path)?;
        tracing::info!("Wrote config to {}", path.display());
        return Ok(());
    }

    run(args, config).await
}

async fn run(args: Args, config: PeerConfig) -> Result<()> {
    tracing::info!("Starting whiteboard peer");
    tracing::info!("  Group: {}", config.sync.group_addr());
    tracing::info!("  History port: {}", config.sync.history_port);
    tracing::info!("  Object port: {}", config.sync.object_port);
    tracing::info!("  Accept clear: {}", config.accept_clear);

    let renderer = Arc::new(LogRenderer::default());
    let session = SessionBuilder::new(config.sync.clone(), renderer.clone())
        .ui(Arc::new(ConsoleUi::new(config.accept_clear)))
        .start()
        .await
        .context("starting session")?;

    let report = session.connect().await?;
    match report.source {
        Some(source) => tracing::info!(
            "Caught up {} of {} records from {}",
            report.received,
            report.expected,
            source.id
        ),
        None => tracing::info!("No history available yet ({} peers)", report.peers),
    }

    if let Some(path) = &args.share {
        share_file(&session, path, args.at[0], args.at[1])?;
    }

    if let Some(ms) = args.replay_ms {
        let replayed = session.replay(Duration::from_millis(ms)).await;
        tracing::info!("Replayed {} records", replayed);
    }

    tracing::info!("Peer {} running. Press Ctrl+C to stop.", session.local_id());

    let status = status_loop(&session, &renderer, config.status_interval_secs);
    tokio::select! {
        _ = status => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    tracing::info!("Shutting down...");
    session.shutdown().await;
    tracing::info!("Peer stopped");

    Ok(())
}

fn share_file(session: &Session, path: &Path, x: i32, y: i32) -> Result<()> {
    let blob = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let record = session.share_object(x, y, Bytes::from(blob));
    tracing::info!("Shared {} as {:?}", path.display(), record.action);
    Ok(())
}

/// Periodic status line; never returns when enabled
async fn status_loop(session: &Session, renderer: &LogRenderer, interval_secs: u64) {
    if interval_secs == 0 {
        return std::future::pending().await;
    }
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.tick().await;
    loop {
        interval.tick().await;
        tracing::info!(
            "Status: {} peers, {} history records, {} objects, {} rendered",
            session.peer_count(),
            session.history_len(),
            session.objects().len(),
            renderer.rendered()
        );
    }
}
