//! ---
//! gpims_section: "01-core-functionality"
//! gpims_subsection: "binary"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Binary entrypoint for the headless GPIMS simulator."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gpims_common::config::SimulatorConfig;
use gpims_common::logging::init_tracing;
use gpims_core::{
    ClientSettings, EventBus, LogSeverity, SimulatorEvent, TransmissionClient,
    TransmissionScheduler,
};
use gpims_metrics::{new_registry, serve_metrics, TransmissionMetrics};
use gpims_sim::{DeviceSnapshot, SnapshotRequest, TelemetryGenerator};
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

const DEFAULT_CONFIG_CANDIDATE: &str = "configs/gpims-sim.toml";
const PREVIEW_JSON_LIMIT: usize = 500;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "GPIMS battery cycler simulator",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "URL", global = true, help = "Override the collection server base URL")]
    server_url: Option<String>,

    #[arg(long, global = true, help = "Override the simulated device identifier")]
    device_id: Option<String>,

    #[arg(long, global = true, help = "Override the send interval in milliseconds")]
    interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Stream snapshots to the collection server until interrupted")]
    Run,
    #[command(about = "Test the connection to the collection server once")]
    Probe,
    #[command(about = "Write generated snapshots as JSON without sending them")]
    Generate {
        /// Number of consecutive snapshots to generate
        #[arg(long, default_value_t = 5)]
        samples: u64,

        /// Output file path. Use '-' for stdout.
        #[arg(long, default_value = "-")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, source) = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing("gpims-simd", &config.logging)?;
            log_config_source(source.as_deref());
            run_simulator(config).await
        }
        Commands::Probe => {
            init_tracing("gpims-simd", &config.logging)?;
            log_config_source(source.as_deref());
            probe(&config).await
        }
        Commands::Generate { samples, output } => write_snapshots(&config, samples, &output),
    }
}

fn load_config(cli: &Cli) -> Result<(SimulatorConfig, Option<PathBuf>)> {
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG_CANDIDATE));

    let loaded = SimulatorConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    apply_overrides(&mut config, cli);
    config
        .validate()
        .context("configuration invalid after command line overrides")?;
    Ok((config, loaded.source))
}

fn log_config_source(source: Option<&Path>) {
    match source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }
}

fn apply_overrides(config: &mut SimulatorConfig, cli: &Cli) {
    if let Some(url) = &cli.server_url {
        config.transmission.server_url = url.clone();
    }
    if let Some(device_id) = &cli.device_id {
        config.device.id = device_id.clone();
    }
    if let Some(interval_ms) = cli.interval_ms {
        config.transmission.interval = Duration::from_millis(interval_ms);
    }
}

async fn run_simulator(config: SimulatorConfig) -> Result<()> {
    let events = EventBus::default();
    let monitor = tokio::spawn(render_events(events.subscribe()));

    let registry = new_registry();
    let metrics = TransmissionMetrics::new(registry.clone())?;
    let metrics_server = if config.metrics.enabled {
        Some(serve_metrics(registry, config.metrics.listen).await?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let client = Arc::new(
        TransmissionClient::new(ClientSettings::from(&config.transmission), events.clone())?
            .with_metrics(metrics.clone()),
    );
    let generator = Arc::new(TelemetryGenerator::from_config(&config.simulation));
    let mut scheduler = TransmissionScheduler::new(generator, client.clone(), events.clone())
        .with_metrics(metrics);

    let request = SnapshotRequest::from(&config.device);
    info!(
        device_id = %request.device_id,
        channels = request.channels,
        aux_sensors = request.aux_sensors,
        can_signals = request.can_signals,
        lin_signals = request.lin_signals,
        server = %client.base_url(),
        "simulator starting"
    );

    if config.transmission.probe_on_start && !client.test_connection().await {
        warn!("collection server not reachable yet; transmitting anyway");
    }
    scheduler.start(config.transmission.interval, request);

    shutdown_signal().await;
    info!("shutdown signal received; stopping transmission");
    let totals = scheduler.shutdown().await;

    drop(client);
    drop(events);
    if let Err(err) = monitor.await {
        warn!(error = %err, "event monitor terminated abnormally");
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    info!(
        packets_sent = totals.packets_sent,
        successful_packets = totals.successful_packets,
        success_rate = %format_rate(totals.success_rate()),
        "simulator stopped"
    );
    Ok(())
}

async fn probe(config: &SimulatorConfig) -> Result<()> {
    let client = TransmissionClient::new(ClientSettings::from(&config.transmission), EventBus::default())?;
    if client.test_connection().await {
        println!("Connection test successful: {}", client.base_url());
        Ok(())
    } else {
        bail!("connection test against {} failed", client.base_url())
    }
}

/// Operator view of the engine: connectivity, progress, and log lines.
async fn render_events(mut events: broadcast::Receiver<SimulatorEvent>) {
    loop {
        match events.recv().await {
            Ok(SimulatorEvent::Connectivity(change)) => {
                let at = change.timestamp.format("%H:%M:%S");
                if change.connected {
                    info!(%at, "Connected: {}", change.message);
                } else {
                    warn!(%at, "Disconnected: {}", change.message);
                }
            }
            Ok(SimulatorEvent::Cycle(report)) => {
                info!(
                    success = report.success,
                    packets_sent = report.totals.packets_sent,
                    success_rate = %format_rate(report.totals.success_rate()),
                    last_update = %report.completed_at.format("%H:%M:%S"),
                    "transmission status"
                );
                debug!("{}", report.snapshot.preview(PREVIEW_JSON_LIMIT));
            }
            Ok(SimulatorEvent::Log(line)) => match line.severity {
                LogSeverity::Debug => debug!("{}", line.message),
                LogSeverity::Information => info!("{}", line.message),
                LogSeverity::Warning => warn!("{}", line.message),
                LogSeverity::Error => error!("{}", line.message),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event monitor fell behind; events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn format_rate(rate: f64) -> String {
    format!("{rate:.1}%")
}

fn write_snapshots(config: &SimulatorConfig, samples: u64, output: &Path) -> Result<()> {
    if samples == 0 {
        bail!("samples must be greater than zero");
    }
    let generator = TelemetryGenerator::from_config(&config.simulation);
    let request = SnapshotRequest::from(&config.device);
    let snapshots: Vec<DeviceSnapshot> = (0..samples)
        .map(|_| generator.next_snapshot(&request))
        .collect();
    let json = serde_json::to_string_pretty(&snapshots)?;

    if output.as_os_str() == "-" {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{json}")?;
    } else {
        fs::write(output, json)
            .with_context(|| format!("failed to write output file {}", output.display()))?;
        eprintln!(
            "generated {} snapshots for {} -> {}",
            samples,
            request.device_id,
            output.display()
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => {
            warn!(?err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}
