//! ---
//! gpims_section: "05-networking-external-interfaces"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Periodic generate-and-send scheduler."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gpims_metrics::TransmissionMetrics;
use gpims_sim::{SnapshotRequest, TelemetryGenerator};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::client::SnapshotTransport;
use crate::events::{CycleReport, EventBus, LogSeverity, SimulatorEvent};
use crate::stats::{StatsSnapshot, TransmissionStats};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Source of the device identity and entry counts, read at every fire.
pub trait InputsProvider: Send + Sync + 'static {
    fn current(&self) -> SnapshotRequest;
}

impl InputsProvider for SnapshotRequest {
    fn current(&self) -> SnapshotRequest {
        self.clone()
    }
}

impl InputsProvider for watch::Receiver<SnapshotRequest> {
    fn current(&self) -> SnapshotRequest {
        self.borrow().clone()
    }
}

struct RunningLoop {
    interval: Duration,
    provider: Arc<dyn InputsProvider>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Everything a single cycle needs, cloned into each spawned cycle task.
#[derive(Clone)]
struct CycleContext {
    generator: Arc<TelemetryGenerator>,
    transport: Arc<dyn SnapshotTransport>,
    stats: Arc<TransmissionStats>,
    events: EventBus,
    metrics: Option<TransmissionMetrics>,
}

/// Drives generation and delivery on a fixed cadence.
///
/// Idle until [`start`](Self::start); the first cycle fires immediately and
/// the next one is not scheduled before the previous cycle finished.
pub struct TransmissionScheduler {
    context: CycleContext,
    running: Option<RunningLoop>,
}

impl TransmissionScheduler {
    /// Idle scheduler with zeroed counters.
    pub fn new(
        generator: Arc<TelemetryGenerator>,
        transport: Arc<dyn SnapshotTransport>,
        events: EventBus,
    ) -> Self {
        Self {
            context: CycleContext {
                generator,
                transport,
                stats: Arc::new(TransmissionStats::default()),
                events,
                metrics: None,
            },
            running: None,
        }
    }

    /// Count cycles and cycle failures in `metrics`.
    pub fn with_metrics(mut self, metrics: TransmissionMetrics) -> Self {
        self.context.metrics = Some(metrics);
        self
    }

    /// Whether a loop is active, i.e. started and not stopped since.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Period of the active loop, if any.
    pub fn interval(&self) -> Option<Duration> {
        self.running.as_ref().map(|running| running.interval)
    }

    /// Totals across every loop this scheduler has run.
    pub fn stats(&self) -> StatsSnapshot {
        self.context.stats.snapshot()
    }

    /// Begin periodic transmission. Must be called within a tokio runtime.
    pub fn start(&mut self, interval: Duration, provider: impl InputsProvider) {
        self.start_shared(interval, Arc::new(provider));
    }

    fn start_shared(&mut self, interval: Duration, provider: Arc<dyn InputsProvider>) {
        if let Some(running) = &self.running {
            warn!(
                interval_ms = running.interval.as_millis() as u64,
                "transmission already running; start ignored"
            );
            return;
        }

        let period = interval.max(MIN_PERIOD);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            self.context.clone(),
            period,
            provider.clone(),
            shutdown_rx,
        ));

        let message = format!("Started transmission with {}ms interval", period.as_millis());
        debug!(interval_ms = period.as_millis() as u64, "{message}");
        self.context.events.log(LogSeverity::Information, message);

        self.running = Some(RunningLoop {
            interval: period,
            provider,
            shutdown,
            task,
        });
    }

    /// Prevent further cycles. A cycle already in flight still completes and
    /// reports. Calling this while idle does nothing.
    pub fn stop(&mut self) {
        self.halt();
    }

    /// Restart the cadence with a new period, keeping the current inputs.
    pub fn change_interval(&mut self, interval: Duration) {
        match self.halt() {
            Some(running) => self.start_shared(interval, running.provider),
            None => debug!("interval change requested while idle; ignored"),
        }
    }

    /// Stop and wait for the last loop, including its in-flight cycle.
    ///
    /// Returns the final counters, which include that last cycle.
    pub async fn shutdown(mut self) -> StatsSnapshot {
        if let Some(running) = self.halt() {
            if let Err(err) = running.task.await {
                error!(error = %err, "transmission loop terminated abnormally");
            }
        }
        self.stats()
    }

    fn halt(&mut self) -> Option<RunningLoop> {
        let running = self.running.take()?;
        let _ = running.shutdown.send(true);
        debug!("Transmission stopped");
        self.context.events.log(LogSeverity::Information, "Transmission stopped");
        Some(running)
    }
}

impl std::fmt::Debug for TransmissionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmissionScheduler")
            .field("interval", &self.interval())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

async fn run_loop(
    context: CycleContext,
    period: Duration,
    provider: Arc<dyn InputsProvider>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let request = provider.current();
        let cycle = tokio::spawn(context.clone().run_cycle(request));
        if let Err(err) = cycle.await {
            context.report_failure(err);
        }
    }
    debug!("transmission loop exited");
}

impl CycleContext {
    async fn run_cycle(self, request: SnapshotRequest) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_cycle();
        }
        let snapshot = Arc::new(self.generator.next_snapshot(&request));
        let success = self.transport.send(&snapshot).await;
        let totals = self.stats.record(success);

        debug!(
            device_id = %snapshot.device_id,
            success,
            packets_sent = totals.packets_sent,
            successful_packets = totals.successful_packets,
            "transmission cycle completed"
        );
        self.events.publish(SimulatorEvent::Cycle(CycleReport {
            success,
            totals,
            snapshot,
            completed_at: Utc::now(),
        }));
    }

    fn report_failure(&self, err: JoinError) {
        let message = format!("Transmission error: {}", failure_reason(err));
        error!("{message}");
        if let Some(metrics) = &self.metrics {
            metrics.inc_cycle_failure();
        }
        self.events.log(LogSeverity::Error, message);
    }
}

fn failure_reason(err: JoinError) -> String {
    if err.is_cancelled() {
        return "cycle cancelled".to_owned();
    }
    let payload = err.into_panic();
    if let Some(reason) = payload.downcast_ref::<&str>() {
        (*reason).to_owned()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "cycle panicked".to_owned()
    }
}
