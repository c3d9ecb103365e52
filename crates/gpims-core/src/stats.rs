//! ---
//! gpims_section: "05-networking-external-interfaces"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Cumulative delivery statistics."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
use parking_lot::Mutex;
use serde::Serialize;

/// Point-in-time copy of the delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub successful_packets: u64,
}

impl StatsSnapshot {
    /// Percentage of packets accepted by the server; `0.0` before the first send.
    pub fn success_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.successful_packets as f64 * 100.0 / self.packets_sent as f64
    }
}

/// Counters owned by the scheduler and shared with its cycle tasks.
#[derive(Debug, Default)]
pub struct TransmissionStats {
    inner: Mutex<StatsSnapshot>,
}

impl TransmissionStats {
    /// Count one finished send and return the updated totals atomically.
    pub fn record(&self, success: bool) -> StatsSnapshot {
        let mut inner = self.inner.lock();
        inner.packets_sent += 1;
        if success {
            inner.successful_packets += 1;
        }
        *inner
    }

    /// Current totals.
    pub fn snapshot(&self) -> StatsSnapshot {
        *self.inner.lock()
    }
}
