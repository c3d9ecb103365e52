//! ---
//! gpims_section: "05-networking-external-interfaces"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Transmission engine module exports."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
//! Generate-and-send engine of the GPIMS simulator.
//!
//! The [`TransmissionScheduler`] drives [`gpims_sim::TelemetryGenerator`] and a
//! [`SnapshotTransport`] (normally the HTTP [`TransmissionClient`]) on a fixed
//! cadence. Everything a presentation layer needs is published on the
//! [`EventBus`]; nothing in this crate touches caller-owned state.

pub mod client;
pub mod events;
pub mod scheduler;
pub mod stats;

pub use client::{ClientSettings, SnapshotTransport, TransmissionClient, TransmitError};
pub use events::{
    ConnectivityEvent, CycleReport, EventBus, LogLine, LogSeverity, SimulatorEvent,
};
pub use scheduler::{InputsProvider, TransmissionScheduler};
pub use stats::{StatsSnapshot, TransmissionStats};
