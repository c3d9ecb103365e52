//! ---
//! gpims_section: "05-networking-external-interfaces"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "HTTP transmission client for the collection server."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use gpims_common::config::TransmissionConfig;
use gpims_metrics::{PacketOutcome, TransmissionMetrics};
use gpims_sim::DeviceSnapshot;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, error, warn};

use crate::events::{ConnectivityEvent, EventBus, SimulatorEvent};

pub const DATA_PATH: &str = "/api/Device/data";
pub const DEVICES_PATH: &str = "/api/Device/devices";

/// Connection parameters for [`TransmissionClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl ClientSettings {
    /// Settings with the standard 5 second timeout and client identification.
    pub fn new(server_url: impl Into<String>) -> Self {
        let defaults = TransmissionConfig::default();
        Self {
            server_url: server_url.into(),
            request_timeout: defaults.request_timeout,
            user_agent: defaults.user_agent,
        }
    }

    /// Replace the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl From<&TransmissionConfig> for ClientSettings {
    fn from(config: &TransmissionConfig) -> Self {
        Self {
            server_url: config.server_base().to_owned(),
            request_timeout: config.request_timeout,
            user_agent: config.user_agent.clone(),
        }
    }
}

/// Failure classes of a single request. Never escapes [`TransmissionClient::send`].
#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    #[error("server rejected request with status {status}")]
    Rejected { status: StatusCode },
    #[error("connection to collection server failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("request exceeded the {0:?} timeout")]
    Timeout(Duration),
    #[error("unexpected transmission failure: {0}")]
    Unexpected(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TransmitError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TransmitError::Timeout(timeout)
        } else if err.is_connect() || err.is_request() {
            TransmitError::Network(err)
        } else {
            TransmitError::Unexpected(Box::new(err))
        }
    }

    /// Metrics label for this failure class.
    pub fn outcome(&self) -> PacketOutcome {
        match self {
            TransmitError::Rejected { .. } => PacketOutcome::Rejected,
            TransmitError::Network(_) => PacketOutcome::Network,
            TransmitError::Timeout(_) => PacketOutcome::Timeout,
            TransmitError::Unexpected(_) => PacketOutcome::Unexpected,
        }
    }

    /// Reason reported when a data post flips connectivity to down.
    pub fn send_message(&self) -> String {
        match self {
            TransmitError::Rejected { status } => format!("Server error: {}", status.as_u16()),
            TransmitError::Network(_) => "Connection failed".to_owned(),
            TransmitError::Timeout(_) => "Connection timeout".to_owned(),
            TransmitError::Unexpected(_) => "Unexpected error".to_owned(),
        }
    }

    /// Reason reported when a probe flips connectivity to down.
    pub fn probe_message(&self) -> String {
        match self {
            TransmitError::Rejected { status } => {
                format!("Connection test failed: {}", status.as_u16())
            }
            _ => "Connection test failed".to_owned(),
        }
    }
}

/// Destination for generated snapshots.
#[async_trait]
pub trait SnapshotTransport: Send + Sync + 'static {
    /// Deliver one snapshot; `true` when the server accepted it.
    async fn send(&self, snapshot: &DeviceSnapshot) -> bool;
}

/// Posts snapshots to `{server}/api/Device/data` and tracks reachability.
///
/// Connectivity is tri-state until the first request completes; after that a
/// [`ConnectivityEvent`] is published only when the state flips.
#[derive(Debug)]
pub struct TransmissionClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    connected: Mutex<Option<bool>>,
    events: EventBus,
    metrics: Option<TransmissionMetrics>,
}

impl TransmissionClient {
    /// Build the HTTP client; connectivity starts unknown.
    pub fn new(settings: ClientSettings, events: EventBus) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(settings.user_agent.as_str())
            .build()
            .context("failed to build reqwest client")?;
        let base_url = settings.server_url.trim().trim_end_matches('/').to_owned();
        debug!(server = %base_url, timeout = ?settings.request_timeout, "transmission client created");
        Ok(Self {
            http,
            base_url,
            request_timeout: settings.request_timeout,
            connected: Mutex::new(None),
            events,
            metrics: None,
        })
    }

    /// Record packet outcomes, latency and connectivity in `metrics`.
    pub fn with_metrics(mut self, metrics: TransmissionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Server URL without trailing slashes.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Last observed reachability; `None` before the first completed request.
    pub fn is_connected(&self) -> Option<bool> {
        *self.connected.lock()
    }

    /// Post a snapshot, absorbing every failure into a `false` outcome.
    pub async fn send(&self, snapshot: &DeviceSnapshot) -> bool {
        let started = Instant::now();
        let result = self.deliver(snapshot).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                self.record_packet(PacketOutcome::Success, elapsed);
                debug!(device_id = %snapshot.device_id, elapsed_ms = elapsed.as_millis() as u64, "snapshot delivered");
                self.note_connectivity(true, || "Connected to server".to_owned());
                true
            }
            Err(err) => {
                self.record_packet(err.outcome(), elapsed);
                log_failure("failed to send device data", &err);
                self.note_connectivity(false, || err.send_message());
                false
            }
        }
    }

    /// Liveness probe against `{server}/api/Device/devices`.
    pub async fn test_connection(&self) -> bool {
        match self.probe().await {
            Ok(()) => {
                self.note_connectivity(true, || "Connection test successful".to_owned());
                true
            }
            Err(err) => {
                log_failure("connection test failed", &err);
                self.note_connectivity(false, || err.probe_message());
                false
            }
        }
    }

    /// Post a snapshot and classify the result without touching connectivity.
    pub async fn deliver(&self, snapshot: &DeviceSnapshot) -> Result<(), TransmitError> {
        let body =
            serde_json::to_vec(snapshot).map_err(|err| TransmitError::Unexpected(Box::new(err)))?;
        let response = self
            .http
            .post(self.url(DATA_PATH))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| TransmitError::from_reqwest(err, self.request_timeout))?;
        check_status(response.status())
    }

    /// Issue the liveness probe and classify the result without touching connectivity.
    pub async fn probe(&self) -> Result<(), TransmitError> {
        let response = self
            .http
            .get(self.url(DEVICES_PATH))
            .send()
            .await
            .map_err(|err| TransmitError::from_reqwest(err, self.request_timeout))?;
        check_status(response.status())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn record_packet(&self, outcome: PacketOutcome, elapsed: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.record_packet(outcome, elapsed);
        }
    }

    fn note_connectivity(&self, connected: bool, message: impl FnOnce() -> String) {
        {
            let mut state = self.connected.lock();
            if *state == Some(connected) {
                return;
            }
            *state = Some(connected);
        }

        let event = ConnectivityEvent::new(connected, message());
        debug!(server = %self.base_url, connected, message = %event.message, "connectivity changed");
        if let Some(metrics) = &self.metrics {
            metrics.set_connected(connected);
        }
        self.events.publish(SimulatorEvent::Connectivity(event));
    }
}

#[async_trait]
impl SnapshotTransport for TransmissionClient {
    async fn send(&self, snapshot: &DeviceSnapshot) -> bool {
        TransmissionClient::send(self, snapshot).await
    }
}

fn check_status(status: StatusCode) -> Result<(), TransmitError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransmitError::Rejected { status })
    }
}

fn log_failure(context: &str, err: &TransmitError) {
    match err {
        TransmitError::Rejected { status } => warn!(
            status = status.as_u16(),
            reason = status.canonical_reason().unwrap_or("unknown"),
            "{context}"
        ),
        TransmitError::Timeout(timeout) => error!(timeout = ?timeout, "{context}: request timed out"),
        other => error!(error = %other, "{context}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_trimmed() {
        let client = TransmissionClient::new(
            ClientSettings::new(" http://collector.local:5000/// "),
            EventBus::default(),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://collector.local:5000");
        assert_eq!(client.url(DATA_PATH), "http://collector.local:5000/api/Device/data");
        assert_eq!(client.is_connected(), None);
    }

    #[test]
    fn settings_follow_transmission_config() {
        let config = TransmissionConfig {
            server_url: "https://gpims.example/".into(),
            request_timeout: Duration::from_secs(9),
            ..TransmissionConfig::default()
        };
        let settings = ClientSettings::from(&config);
        assert_eq!(settings.server_url, "https://gpims.example");
        assert_eq!(settings.request_timeout, Duration::from_secs(9));
        assert_eq!(settings.user_agent, "GPIMSClient/1.0");
        assert_eq!(ClientSettings::new("x").request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn failure_messages_match_outcome() {
        let rejected = TransmitError::Rejected {
            status: StatusCode::INTERNAL_SERVER_ERROR,
        };
        assert_eq!(rejected.outcome(), PacketOutcome::Rejected);
        assert_eq!(rejected.send_message(), "Server error: 500");
        assert_eq!(rejected.probe_message(), "Connection test failed: 500");

        let timeout = TransmitError::Timeout(Duration::from_secs(5));
        assert_eq!(timeout.outcome(), PacketOutcome::Timeout);
        assert_eq!(timeout.send_message(), "Connection timeout");
        assert_eq!(timeout.probe_message(), "Connection test failed");

        let unexpected = TransmitError::Unexpected("boom".into());
        assert_eq!(unexpected.send_message(), "Unexpected error");
    }

    #[test]
    fn only_transitions_publish_events() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let client = TransmissionClient::new(ClientSettings::new("http://127.0.0.1:1"), bus).unwrap();

        client.note_connectivity(true, || "Connected to server".to_owned());
        client.note_connectivity(true, || unreachable!("repeat must not format"));
        client.note_connectivity(false, || "Connection failed".to_owned());
        client.note_connectivity(false, || unreachable!("repeat must not format"));

        let mut seen = Vec::new();
        while let Ok(SimulatorEvent::Connectivity(event)) = events.try_recv() {
            seen.push((event.connected, event.message));
        }
        assert_eq!(
            seen,
            vec![
                (true, "Connected to server".to_owned()),
                (false, "Connection failed".to_owned()),
            ]
        );
        assert_eq!(client.is_connected(), Some(false));
    }
}
