//! ---
//! gpims_section: "11-simulation"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Telemetry payload types exchanged with the collection server."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use strum::{Display, VariantArray};

use crate::timespan::TimeSpan;

/// One complete telemetry payload for a device at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceSnapshot {
    pub channels: Vec<ChannelReading>,
    pub aux_data: Vec<AuxReading>,
    /// CAN-like bus signals.
    #[serde(rename = "CANData")]
    pub can_data: Vec<BusSignal>,
    /// LIN-like bus signals.
    #[serde(rename = "LINData")]
    pub lin_data: Vec<BusSignal>,
    pub alarm_data: Vec<AlarmEvent>,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
}

impl DeviceSnapshot {
    /// Snapshot with no entries, to be filled by the generator.
    pub fn empty(device_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            channels: Vec::new(),
            aux_data: Vec::new(),
            can_data: Vec::new(),
            lin_data: Vec::new(),
            alarm_data: Vec::new(),
            timestamp,
            device_id: device_id.into(),
        }
    }

    /// Human-readable summary followed by pretty JSON cut at `json_limit` characters.
    pub fn preview(&self, json_limit: usize) -> String {
        let mut summary = String::new();
        let _ = writeln!(summary, "Device: {}", self.device_id);
        let _ = writeln!(summary, "Timestamp: {}", self.timestamp.format("%H:%M:%S%.3f"));
        let _ = writeln!(summary, "Channels: {}", self.channels.len());
        let _ = writeln!(summary, "Aux Data: {}", self.aux_data.len());
        let _ = writeln!(summary, "CAN Data: {}", self.can_data.len());
        let _ = writeln!(summary, "LIN Data: {}", self.lin_data.len());
        summary.push('\n');

        if let Some(sample) = self.channels.first() {
            summary.push_str("Sample Channel Data:\n");
            let _ = writeln!(
                summary,
                "  Ch{}: {}, V={:.3}, I={:.3}",
                sample.channel_number, sample.status, sample.voltage, sample.current
            );
            summary.push('\n');
        }

        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                summary.push_str("JSON Data:\n");
                if json.chars().count() > json_limit {
                    summary.extend(json.chars().take(json_limit));
                    summary.push_str("...");
                } else {
                    summary.push_str(&json);
                }
            }
            Err(err) => {
                let _ = write!(summary, "Error formatting data: {err}");
            }
        }
        summary
    }
}

/// Electrical and schedule state of one channel at snapshot time.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelReading {
    pub channel_number: u32,
    pub status: ChannelStatus,
    pub mode: ChannelMode,
    pub cycle_no: u32,
    pub step_no: u32,
    pub cycler_loop: u32,
    pub voltage: f64,
    pub current: f64,
    pub capacity: f64,
    pub power: f64,
    pub chamber_temperature: f64,
    #[serde_as(as = "TimeSpan")]
    pub step_time: Duration,
    #[serde_as(as = "TimeSpan")]
    pub total_time: Duration,
    pub test_name: String,
    pub schedule: String,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    VariantArray,
)]
pub enum ChannelStatus {
    #[default]
    Idle,
    Rest,
    Discharge,
    Charge,
    Pause,
    Finish,
}

impl ChannelStatus {
    /// True while capacity is being filled or drawn.
    pub fn is_active(self) -> bool {
        matches!(self, ChannelStatus::Charge | ChannelStatus::Discharge)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    VariantArray,
)]
pub enum ChannelMode {
    #[default]
    Rest,
    #[serde(rename = "ChargeCC")]
    #[strum(serialize = "ChargeCC")]
    ChargeCc,
    #[serde(rename = "ChargeCCCV")]
    #[strum(serialize = "ChargeCCCV")]
    ChargeCccv,
    #[serde(rename = "ChargeCP")]
    #[strum(serialize = "ChargeCP")]
    ChargeCp,
    #[serde(rename = "ChargeCPCV")]
    #[strum(serialize = "ChargeCPCV")]
    ChargeCpcv,
    #[serde(rename = "DischargeCC")]
    #[strum(serialize = "DischargeCC")]
    DischargeCc,
    #[serde(rename = "DischargeCCCV")]
    #[strum(serialize = "DischargeCCCV")]
    DischargeCccv,
    #[serde(rename = "DischargeCP")]
    #[strum(serialize = "DischargeCP")]
    DischargeCp,
    #[serde(rename = "DischargeCPCV")]
    #[strum(serialize = "DischargeCPCV")]
    DischargeCpcv,
}

/// Auxiliary sensor sample. Limits are advisory and never enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuxReading {
    pub sensor_id: u32,
    pub sensor_name: String,
    pub value: f64,
    pub safe_upper_limit: f64,
    pub safe_lower_limit: f64,
}

/// Named value reported by a battery management unit over a vehicle bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BusSignal {
    pub name: String,
    pub value: f64,
    pub bms_id: u32,
    pub max: f64,
    pub min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlarmEvent {
    pub name: String,
    pub id: u32,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub severity: AlarmSeverity,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    VariantArray,
)]
pub enum AlarmSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlarmSeverity {
    /// Fixed alarm text for this severity.
    pub fn description(self) -> &'static str {
        match self {
            AlarmSeverity::Critical => "Critical system failure detected",
            AlarmSeverity::Error => "Error condition requires attention",
            AlarmSeverity::Warning => "Warning: Parameter out of normal range",
            AlarmSeverity::Info => "Information: System status update",
        }
    }
}
