//! ---
//! gpims_section: "01-core-functionality"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Shared primitives and utilities for the simulator runtime."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
//! Shared primitives for the GPIMS simulator workspace.
//! This crate exposes configuration loading and logging setup consumed
//! by the simulation, transmission, and binary crates.

pub mod config;
pub mod logging;

pub use config::{
    DeviceConfig, LoadedSimulatorConfig, LoggingConfig, MetricsConfig, SimulationConfig,
    SimulatorConfig, TransmissionConfig,
};
pub use logging::{init_tracing, LogFormat};
