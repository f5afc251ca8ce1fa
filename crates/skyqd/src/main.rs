//! skyqd: the skyq target queue daemon.
//!
//! # Usage
//!
//! ```text
//! skyqd run --config skyq.toml --catalog targets.toml --queue-file tonight.queue
//! skyqd simulate --config skyq.toml --catalog targets.toml --queue-file tonight.queue --hours 10
//! skyqd scaffold --latitude 49.9 --longitude 14.8
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use skyq_core::{Ephemeris, Observatory, SkyqConfig};
use skyq_queue::{ExecutorQueue, Station, SystemStation};
use skyqd::{build_queues, forecast, load_queue_file, Daemon, DaemonStation};

#[derive(Parser)]
#[command(name = "skyqd", about = "skyq target queue daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the queues against a simulated executor until Ctrl-C.
    Run {
        /// Daemon configuration.
        #[arg(long, default_value = "skyq.toml")]
        config: PathBuf,

        /// Target catalog.
        #[arg(long)]
        catalog: PathBuf,

        /// Entries to load into the first queue at startup.
        #[arg(long)]
        queue_file: Option<PathBuf>,

        /// Idle tick interval in seconds.
        #[arg(long, default_value = "10")]
        tick_secs: u64,
    },
    /// Print a forecast of the first queue as JSON.
    Simulate {
        #[arg(long, default_value = "skyq.toml")]
        config: PathBuf,

        #[arg(long)]
        catalog: PathBuf,

        #[arg(long)]
        queue_file: PathBuf,

        /// Forecast length; defaults to `simulation.horizon_secs`.
        #[arg(long)]
        hours: Option<f64>,
    },
    /// Write a default configuration.
    Scaffold {
        #[arg(long)]
        latitude: f64,

        #[arg(long)]
        longitude: f64,

        #[arg(long, default_value = "skyq.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,skyqd=debug,skyq=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            catalog,
            queue_file,
            tick_secs,
        } => run(&config, &catalog, queue_file.as_deref(), tick_secs).await,
        Command::Simulate {
            config,
            catalog,
            queue_file,
            hours,
        } => simulate(&config, &catalog, &queue_file, hours),
        Command::Scaffold {
            latitude,
            longitude,
            output,
        } => scaffold(latitude, longitude, &output),
    }
}

fn load(config: &Path, catalog: &Path) -> anyhow::Result<(SkyqConfig, Arc<dyn Observatory>)> {
    let config = SkyqConfig::from_file(config)
        .with_context(|| format!("loading config {}", config.display()))?;
    let ephemeris = Ephemeris::from_file(config.observer.clone(), catalog)
        .with_context(|| format!("loading catalog {}", catalog.display()))?;
    info!(targets = ephemeris.len(), latitude = config.observer.latitude, "observatory ready");
    let observatory: Arc<dyn Observatory> = Arc::new(ephemeris);
    Ok((config, observatory))
}

fn load_into(queue: &mut ExecutorQueue, path: &Path, now: f64) -> anyhow::Result<()> {
    let params = load_queue_file(path)?;
    let report = queue.queue_from_conn(&params, None, true, None, false, now)?;
    if report.failed > 0 {
        warn!(queue = %queue.name(), failed = report.failed, "some queue file entries were rejected");
    }
    info!(queue = %queue.name(), loaded = report.accepted.len(), "queue file loaded");
    Ok(())
}

async fn run(
    config: &Path,
    catalog: &Path,
    queue_file: Option<&Path>,
    tick_secs: u64,
) -> anyhow::Result<()> {
    info!("skyq daemon starting");
    let (config, observatory) = load(config, catalog)?;

    let (station, wakeups) = DaemonStation::new();
    let station: Arc<dyn Station> = Arc::new(station);
    let mut queues = build_queues(&config, observatory.clone(), station.clone());
    if let (Some(path), Some(queue)) = (queue_file, queues.first_mut()) {
        load_into(queue, path, station.now())?;
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let daemon = Daemon::new(queues, observatory);
    let daemon = daemon
        .run(station, Duration::from_secs(tick_secs.max(1)), wakeups, shutdown_rx)
        .await;

    for queue in daemon.queues() {
        info!(
            queue = %queue.name(),
            pending = queue.len(),
            executed = queue.audit().executed().len(),
            removed = queue.audit().removed().len(),
            "final queue state"
        );
    }
    info!("skyq daemon stopped");
    Ok(())
}

fn simulate(config: &Path, catalog: &Path, queue_file: &Path, hours: Option<f64>) -> anyhow::Result<()> {
    let (config, observatory) = load(config, catalog)?;
    let station: Arc<dyn Station> = Arc::new(SystemStation);
    let now = station.now();
    let mut queues = build_queues(&config, observatory, station);
    let queue = queues.first_mut().context("no queue configured")?;
    load_into(queue, queue_file, now)?;
    let plan = forecast(queue, &config, now, hours);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn scaffold(latitude: f64, longitude: f64, output: &Path) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }
    let config = SkyqConfig::scaffold(latitude, longitude);
    std::fs::write(output, config.to_toml_string()?)
        .with_context(|| format!("writing {}", output.display()))?;
    info!(path = %output.display(), "configuration written");
    Ok(())
}
