//! ---
//! gpims_section: "11-simulation"
//! gpims_subsection: "01-bootstrap"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Simulation module exports and shared types."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
//! Battery cycler telemetry simulation.
//!
//! [`TelemetryGenerator`] owns one [`ChannelSimulationState`] per channel and
//! advances them one tick per snapshot. Auxiliary sensors, bus signals, and
//! alarms are drawn fresh on every call.

pub mod generator;
pub mod model;
pub mod state;
pub mod timespan;

pub use generator::{GeneratorSettings, SnapshotRequest, TelemetryGenerator};
pub use model::{
    AlarmEvent, AlarmSeverity, AuxReading, BusSignal, ChannelMode, ChannelReading, ChannelStatus,
    DeviceSnapshot,
};
pub use state::ChannelSimulationState;
