//! ---
//! gpims_section: "05-networking-external-interfaces"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Outbound events consumed by the presentation layer."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gpims_sim::DeviceSnapshot;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::stats::StatsSnapshot;

const DEFAULT_CAPACITY: usize = 256;

/// Reachability edge of the collection server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityEvent {
    pub connected: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ConnectivityEvent {
    /// Event stamped with the current time.
    pub fn new(connected: bool, message: impl Into<String>) -> Self {
        Self {
            connected,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of one generate-and-send cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub success: bool,
    pub totals: StatsSnapshot,
    pub snapshot: Arc<DeviceSnapshot>,
    pub completed_at: DateTime<Utc>,
}

/// Level of a [`LogLine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogSeverity {
    Debug,
    Information,
    Warning,
    Error,
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogSeverity::Debug => "Debug",
            LogSeverity::Information => "Information",
            LogSeverity::Warning => "Warning",
            LogSeverity::Error => "Error",
        };
        f.write_str(label)
    }
}

/// Free-text line intended for an operator-facing log view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub severity: LogSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything the engine reports to observers.
#[derive(Debug, Clone)]
pub enum SimulatorEvent {
    Connectivity(ConnectivityEvent),
    Cycle(CycleReport),
    Log(LogLine),
}

/// Fan-out channel from the engine to any number of observers.
///
/// Publishing never blocks and never fails; with no subscribers events are
/// dropped, and slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SimulatorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Bus buffering up to `capacity` events per subscriber (at least one).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SimulatorEvent> {
        self.sender.subscribe()
    }

    /// Send `event` to every current subscriber.
    pub fn publish(&self, event: SimulatorEvent) {
        if self.sender.send(event).is_err() {
            trace!("event dropped; no subscribers");
        }
    }

    /// Publish a [`SimulatorEvent::Log`] line stamped with the current time.
    pub fn log(&self, severity: LogSeverity, message: impl Into<String>) {
        self.publish(SimulatorEvent::Log(LogLine {
            severity,
            message: message.into(),
            timestamp: Utc::now(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.log(LogSeverity::Warning, "Transmission stopped");

        for receiver in [&mut first, &mut second] {
            match receiver.recv().await.unwrap() {
                SimulatorEvent::Log(line) => {
                    assert_eq!(line.severity, LogSeverity::Warning);
                    assert_eq!(line.message, "Transmission stopped");
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::new(0);
        bus.publish(SimulatorEvent::Connectivity(ConnectivityEvent::new(
            true,
            "Connected to server",
        )));
    }

    #[test]
    fn severity_labels_match_log_view() {
        assert_eq!(LogSeverity::Information.to_string(), "Information");
        assert_eq!(LogSeverity::Error.to_string(), "Error");
    }
}
