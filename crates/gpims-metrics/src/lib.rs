//! ---
//! gpims_section: "03-persistence-logging"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Metrics collection and export utilities."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub type SharedRegistry = Arc<Registry>;

/// Empty registry shared between the exporter and metric owners.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Text exposition of every family in `registry`.
pub fn render(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metrics")
}

async fn scrape(State(registry): State<SharedRegistry>) -> Response {
    match render(&registry) {
        Ok(body) => ([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            error!(error = %err, "metrics scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Bind `addr` and serve `registry` at `/metrics` until [`MetricsServer::shutdown`].
pub async fn serve_metrics(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to read metrics listener address")?;
    let app = Router::new()
        .route("/metrics", get(scrape))
        .with_state(registry);

    let (stop, mut stopped) = watch::channel(false);
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stopped.changed().await;
            })
            .await
            .context("metrics server failed")
    });
    info!(address = %local_addr, "metrics exporter listening");

    Ok(MetricsServer {
        addr: local_addr,
        stop,
        task,
    })
}

/// Running `/metrics` endpoint.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address; resolves port 0 to the assigned port.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting scrapes and wait for the server task.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.stop.send(true);
        self.task.await.context("metrics server task panicked")?
    }
}

/// Delivery outcome label recorded against `gpims_packets_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    Success,
    Rejected,
    Network,
    Timeout,
    Unexpected,
}

impl PacketOutcome {
    /// Value of the `outcome` label.
    pub fn label(self) -> &'static str {
        match self {
            PacketOutcome::Success => "success",
            PacketOutcome::Rejected => "rejected",
            PacketOutcome::Network => "network",
            PacketOutcome::Timeout => "timeout",
            PacketOutcome::Unexpected => "unexpected",
        }
    }
}

/// Metrics published by the transmission client and scheduler.
#[derive(Clone)]
pub struct TransmissionMetrics {
    registry: SharedRegistry,
    packets_total: IntCounterVec,
    send_latency_seconds: Histogram,
    connected: IntGauge,
    cycles_total: IntCounter,
    cycle_failures_total: IntCounter,
}

impl TransmissionMetrics {
    /// Create the metric families and register them in `registry`.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let packets_total = IntCounterVec::new(
            Opts::new(
                "gpims_packets_total",
                "Telemetry packets posted to the collection server by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(packets_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let send_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "gpims_send_latency_seconds",
                "Round-trip time of telemetry posts, including failures",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(send_latency_seconds.clone()))?;

        let connected = IntGauge::with_opts(Opts::new(
            "gpims_connected",
            "Indicator (0/1) whether the collection server is currently reachable",
        ))?;
        registry.register(Box::new(connected.clone()))?;

        let cycles_total = IntCounter::with_opts(Opts::new(
            "gpims_cycles_total",
            "Generate-and-send cycles started by the scheduler",
        ))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let cycle_failures_total = IntCounter::with_opts(Opts::new(
            "gpims_cycle_failures_total",
            "Cycles that aborted unexpectedly before reporting an outcome",
        ))?;
        registry.register(Box::new(cycle_failures_total.clone()))?;

        Ok(Self {
            registry,
            packets_total,
            send_latency_seconds,
            connected,
            cycles_total,
            cycle_failures_total,
        })
    }

    /// Registry the families are registered in.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Count one post under `outcome` and observe its round-trip time.
    pub fn record_packet(&self, outcome: PacketOutcome, latency: Duration) {
        self.packets_total
            .with_label_values(&[outcome.label()])
            .inc();
        self.send_latency_seconds.observe(latency.as_secs_f64());
    }

    /// Set the reachability gauge to 1 or 0.
    pub fn set_connected(&self, connected: bool) {
        self.connected.set(if connected { 1 } else { 0 });
    }

    /// Count a started cycle.
    pub fn inc_cycle(&self) {
        self.cycles_total.inc();
    }

    /// Count a cycle that aborted before reporting.
    pub fn inc_cycle_failure(&self) {
        self.cycle_failures_total.inc();
    }

    /// Posts recorded under `outcome` so far.
    pub fn packets(&self, outcome: PacketOutcome) -> u64 {
        self.packets_total.with_label_values(&[outcome.label()]).get()
    }

    /// Cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles_total.get()
    }
}

impl std::fmt::Debug for TransmissionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmissionMetrics")
            .field("connected", &self.connected.get())
            .field("cycles_total", &self.cycles_total.get())
            .finish_non_exhaustive()
    }
}

pub use prometheus;
