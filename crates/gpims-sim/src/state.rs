//! ---
//! gpims_section: "11-simulation"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Per-channel simulation state carried across ticks."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
use std::time::Duration;

use serde::Serialize;

use crate::model::{ChannelMode, ChannelStatus};

/// Memory of one channel between generator ticks.
///
/// Only [`crate::TelemetryGenerator`] mutates these; callers receive copies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelSimulationState {
    pub status: ChannelStatus,
    pub mode: ChannelMode,
    pub cycle_no: u32,
    pub step_no: u32,
    pub cycler_loop: u32,
    pub accumulated_capacity: f64,
    pub step_time: Duration,
    pub total_time: Duration,
}

impl Default for ChannelSimulationState {
    fn default() -> Self {
        Self {
            status: ChannelStatus::Idle,
            mode: ChannelMode::Rest,
            cycle_no: 1,
            step_no: 1,
            cycler_loop: 0,
            accumulated_capacity: 0.0,
            step_time: Duration::ZERO,
            total_time: Duration::ZERO,
        }
    }
}
