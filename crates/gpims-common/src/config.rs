//! ---
//! gpims_section: "01-core-functionality"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Shared primitives and utilities for the simulator runtime."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

/// Upper bounds mirroring the slider ranges of the operator console.
pub const MAX_CHANNELS: u32 = 128;
pub const MAX_AUX_SENSORS: u32 = 64;
pub const MAX_BUS_SIGNALS: u32 = 64;
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);
pub const MAX_INTERVAL: Duration = Duration::from_millis(60_000);

fn default_device_id() -> String {
    "GPIMS-SIM-001".to_owned()
}

fn default_channels() -> u32 {
    8
}

fn default_aux_sensors() -> u32 {
    4
}

fn default_bus_signals() -> u32 {
    2
}

fn default_server_url() -> String {
    "http://localhost:5000".to_owned()
}

fn default_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_user_agent() -> String {
    "GPIMSClient/1.0".to_owned()
}

fn default_probe_on_start() -> bool {
    true
}

fn default_transition_probability() -> f64 {
    0.01
}

fn default_alarm_probability() -> f64 {
    0.1
}

fn default_max_steps_per_cycle() -> u32 {
    10
}

fn default_tick() -> Duration {
    Duration::from_secs(1)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9899))
}

/// Primary configuration object for the simulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub transmission: TransmissionConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where a [`SimulatorConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedSimulatorConfig {
    pub config: SimulatorConfig,
    /// `None` when no file was found and built-in defaults apply.
    pub source: Option<PathBuf>,
}

impl SimulatorConfig {
    pub const ENV_CONFIG_PATH: &'static str = "GPIMS_CONFIG";

    /// [`Self::load_with_source`] without the path that was used.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Self::load_with_source(candidates).map(|loaded| loaded.config)
    }

    /// Resolve and load the effective configuration.
    ///
    /// A non-empty `GPIMS_CONFIG` must name a readable file. Otherwise the first
    /// existing candidate wins, and with none present the defaults apply.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedSimulatorConfig> {
        let from_env = std::env::var_os(Self::ENV_CONFIG_PATH)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let source = from_env.or_else(|| {
            candidates
                .iter()
                .map(|candidate| candidate.as_ref())
                .find(|path| path.is_file())
                .map(Path::to_path_buf)
        });

        let config = match &source {
            Some(path) => Self::read(path)?,
            None => {
                debug!("no configuration file found; using defaults");
                let defaults = Self::default();
                defaults.validate()?;
                defaults
            }
        };
        Ok(LoadedSimulatorConfig { config, source })
    }

    fn read(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "reading configuration");
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?;
        raw.parse::<Self>()
            .with_context(|| format!("invalid configuration in {}", path.display()))
    }

    /// Check every section against its documented bounds.
    pub fn validate(&self) -> Result<()> {
        self.device.validate()?;
        self.transmission.validate()?;
        self.simulation.validate()
    }
}

impl std::str::FromStr for SimulatorConfig {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let config: SimulatorConfig = toml::from_str(raw).context("malformed TOML configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Identity and shape of the simulated cycler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub id: String,
    #[serde(default = "default_channels")]
    pub channels: u32,
    #[serde(default = "default_aux_sensors")]
    pub aux_sensors: u32,
    #[serde(default = "default_bus_signals")]
    pub can_signals: u32,
    #[serde(default = "default_bus_signals")]
    pub lin_signals: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            channels: default_channels(),
            aux_sensors: default_aux_sensors(),
            can_signals: default_bus_signals(),
            lin_signals: default_bus_signals(),
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(anyhow!("device id must not be empty"));
        }
        check_count("channels", self.channels, MAX_CHANNELS)?;
        check_count("aux_sensors", self.aux_sensors, MAX_AUX_SENSORS)?;
        check_count("can_signals", self.can_signals, MAX_BUS_SIGNALS)?;
        check_count("lin_signals", self.lin_signals, MAX_BUS_SIGNALS)?;
        Ok(())
    }
}

fn check_count(field: &str, value: u32, max: u32) -> Result<()> {
    if value > max {
        return Err(anyhow!("device.{} must be at most {} (got {})", field, max, value));
    }
    Ok(())
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(rename = "interval_ms", default = "default_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
    #[serde(rename = "request_timeout_secs", default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Probe the server before the first transmission cycle.
    #[serde(default = "default_probe_on_start")]
    pub probe_on_start: bool,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            interval: default_interval(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            probe_on_start: default_probe_on_start(),
        }
    }
}

impl TransmissionConfig {
    /// Server base with surrounding whitespace and trailing slashes removed.
    pub fn server_base(&self) -> &str {
        self.server_url.trim().trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<()> {
        let base = self.server_base();
        if base.is_empty() {
            return Err(anyhow!("transmission.server_url must not be empty"));
        }
        let parsed = Url::parse(base)
            .with_context(|| format!("transmission.server_url '{}' is not a valid URL", base))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "transmission.server_url must use http or https (got '{}')",
                parsed.scheme()
            ));
        }
        if self.interval < MIN_INTERVAL || self.interval > MAX_INTERVAL {
            return Err(anyhow!(
                "transmission.interval_ms must be within {}..={} (got {})",
                MIN_INTERVAL.as_millis(),
                MAX_INTERVAL.as_millis(),
                self.interval.as_millis()
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("transmission.request_timeout_secs must be positive"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fixed RNG seed for reproducible runs; entropy-seeded when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_transition_probability")]
    pub transition_probability: f64,
    #[serde(default = "default_alarm_probability")]
    pub alarm_probability: f64,
    #[serde(default = "default_max_steps_per_cycle")]
    pub max_steps_per_cycle: u32,
    #[serde(rename = "tick_secs", default = "default_tick")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub tick: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            transition_probability: default_transition_probability(),
            alarm_probability: default_alarm_probability(),
            max_steps_per_cycle: default_max_steps_per_cycle(),
            tick: default_tick(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("transition_probability", self.transition_probability),
            ("alarm_probability", self.alarm_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!(
                    "simulation.{} must lie within [0, 1] (got {})",
                    field,
                    value
                ));
            }
        }
        if self.max_steps_per_cycle == 0 {
            return Err(anyhow!("simulation.max_steps_per_cycle must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}
