//! ---
//! gpims_section: "11-simulation"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Stateful telemetry generator for simulated cycler channels."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use gpims_common::config::{DeviceConfig, SimulationConfig};
use parking_lot::Mutex;
use rand::prelude::*;
use strum::VariantArray;
use tracing::trace;

use crate::model::{
    AlarmEvent, AlarmSeverity, AuxReading, BusSignal, ChannelMode, ChannelReading, ChannelStatus,
    DeviceSnapshot,
};
use crate::state::ChannelSimulationState;

const TEST_NAMES: [&str; 5] = [
    "Capacity Test",
    "Life Cycle",
    "Performance",
    "Stability",
    "Rate Test",
];
const SCHEDULES: [&str; 5] = ["Standard", "Fast Charge", "Slow Discharge", "Custom", "OCV"];
const AUX_SENSOR_NAMES: [&str; 5] = ["Temperature", "Humidity", "Pressure", "Voltage", "Current"];
const CAN_SIGNAL_NAMES: [&str; 5] = [
    "BMS_Voltage",
    "BMS_Current",
    "BMS_Temperature",
    "Cell_Voltage",
    "SOC",
];
const LIN_SIGNAL_NAMES: [&str; 4] = ["Motor_Speed", "Battery_Temp", "System_Status", "Error_Code"];

const AUX_RANGE: (f64, f64) = (20.0, 80.0);
const AUX_SAFE_LIMITS: (f64, f64) = (15.0, 75.0);
const CAN_RANGE: (f64, f64) = (0.0, 100.0);
const LIN_RANGE: (f64, f64) = (0.0, 50.0);
const CAPACITY_STEP_MAX: f64 = 0.01;

/// Tunables for the stochastic parts of the simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorSettings {
    /// Chance per channel per tick of jumping to a random status/mode.
    pub transition_probability: f64,
    /// Chance per snapshot of carrying one alarm.
    pub alarm_probability: f64,
    /// Step number beyond which the cycle counter rolls over.
    pub max_steps_per_cycle: u32,
    /// Simulated time added to the elapsed counters on every tick.
    pub tick: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            transition_probability: 0.01,
            alarm_probability: 0.1,
            max_steps_per_cycle: 10,
            tick: Duration::from_secs(1),
        }
    }
}

impl From<&SimulationConfig> for GeneratorSettings {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            transition_probability: config.transition_probability.clamp(0.0, 1.0),
            alarm_probability: config.alarm_probability.clamp(0.0, 1.0),
            max_steps_per_cycle: config.max_steps_per_cycle.max(1),
            tick: config.tick,
        }
    }
}

/// Device identity and entry counts for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotRequest {
    pub device_id: String,
    pub channels: u32,
    pub aux_sensors: u32,
    pub can_signals: u32,
    pub lin_signals: u32,
}

impl SnapshotRequest {
    pub fn new(
        device_id: impl Into<String>,
        channels: u32,
        aux_sensors: u32,
        can_signals: u32,
        lin_signals: u32,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            channels,
            aux_sensors,
            can_signals,
            lin_signals,
        }
    }
}

impl From<&DeviceConfig> for SnapshotRequest {
    fn from(device: &DeviceConfig) -> Self {
        Self::new(
            device.id.trim(),
            device.channels,
            device.aux_sensors,
            device.can_signals,
            device.lin_signals,
        )
    }
}

#[derive(Debug)]
struct GeneratorInner {
    rng: StdRng,
    channels: BTreeMap<u32, ChannelSimulationState>,
}

/// Produces internally consistent, time-evolving telemetry for a device.
///
/// The channel map and random source sit behind one lock, so overlapping
/// callers each observe a whole snapshot's worth of per-channel updates.
#[derive(Debug)]
pub struct TelemetryGenerator {
    settings: GeneratorSettings,
    inner: Mutex<GeneratorInner>,
}

impl TelemetryGenerator {
    /// Generator seeded from operating system entropy.
    pub fn new(settings: GeneratorSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Generator with a reproducible random stream.
    pub fn with_seed(settings: GeneratorSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    /// Generator using the configured tunables, seeded when a seed is set.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let settings = GeneratorSettings::from(config);
        match config.seed {
            Some(seed) => Self::with_seed(settings, seed),
            None => Self::new(settings),
        }
    }

    fn with_rng(settings: GeneratorSettings, rng: StdRng) -> Self {
        Self {
            settings,
            inner: Mutex::new(GeneratorInner {
                rng,
                channels: BTreeMap::new(),
            }),
        }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Advance every requested channel by one tick and build a snapshot.
    ///
    /// Zero counts are valid and yield empty lists.
    pub fn next_snapshot(&self, request: &SnapshotRequest) -> DeviceSnapshot {
        let mut guard = self.inner.lock();
        let GeneratorInner { rng, channels } = &mut *guard;
        let now = Utc::now();
        let mut snapshot = DeviceSnapshot::empty(request.device_id.clone(), now);

        snapshot.channels.reserve(request.channels as usize);
        for channel_number in 1..=request.channels {
            let state = channels.entry(channel_number).or_default();
            advance_channel(state, &self.settings, rng);
            snapshot
                .channels
                .push(derive_reading(channel_number, state, rng));
        }

        snapshot.aux_data = (1..=request.aux_sensors)
            .map(|sensor_id| aux_reading(sensor_id, rng))
            .collect();
        snapshot.can_data = (1..=request.can_signals)
            .map(|bms_id| bus_signal(bms_id, &CAN_SIGNAL_NAMES, CAN_RANGE, rng))
            .collect();
        snapshot.lin_data = (1..=request.lin_signals)
            .map(|bms_id| bus_signal(bms_id, &LIN_SIGNAL_NAMES, LIN_RANGE, rng))
            .collect();

        if rng.gen_bool(self.settings.alarm_probability) {
            snapshot.alarm_data.push(alarm(rng));
        }

        trace!(
            device_id = %request.device_id,
            channels = snapshot.channels.len(),
            alarms = snapshot.alarm_data.len(),
            "snapshot generated"
        );
        snapshot
    }

    /// Copy of the state tracked for `channel_number`, if it has been generated.
    pub fn channel_state(&self, channel_number: u32) -> Option<ChannelSimulationState> {
        self.inner.lock().channels.get(&channel_number).copied()
    }

    /// Number of channels that have state, including ones no longer requested.
    pub fn tracked_channels(&self) -> usize {
        self.inner.lock().channels.len()
    }
}

fn advance_channel(state: &mut ChannelSimulationState, settings: &GeneratorSettings, rng: &mut StdRng) {
    state.step_time = state.step_time.saturating_add(settings.tick);
    state.total_time = state.total_time.saturating_add(settings.tick);

    if state.status.is_active() {
        state.accumulated_capacity += rng.gen_range(0.0..CAPACITY_STEP_MAX);
    }

    if rng.gen_bool(settings.transition_probability) {
        state.status = pick_variant(ChannelStatus::VARIANTS, rng);
        state.mode = pick_variant(ChannelMode::VARIANTS, rng);
        state.step_no += 1;
        state.step_time = Duration::ZERO;
        if state.step_no > settings.max_steps_per_cycle {
            state.cycle_no += 1;
            state.step_no = 1;
        }
    }
}

fn derive_reading(
    channel_number: u32,
    state: &ChannelSimulationState,
    rng: &mut StdRng,
) -> ChannelReading {
    let (voltage, current) = match state.status {
        ChannelStatus::Charge => (rng.gen_range(3.2..4.2), rng.gen_range(0.5..5.0)),
        ChannelStatus::Discharge => (rng.gen_range(2.8..3.8), rng.gen_range(-5.0..-0.5)),
        ChannelStatus::Rest => (rng.gen_range(3.4..3.8), rng.gen_range(-0.01..0.01)),
        ChannelStatus::Idle => (0.0, 0.0),
        ChannelStatus::Pause | ChannelStatus::Finish => {
            (rng.gen_range(3.6..3.8), rng.gen_range(-0.05..0.05))
        }
    };
    let voltage = round_to(voltage, 3);
    let current = round_to(current, 3);

    ChannelReading {
        channel_number,
        status: state.status,
        mode: state.mode,
        cycle_no: state.cycle_no,
        step_no: state.step_no,
        cycler_loop: state.cycler_loop,
        voltage,
        current,
        capacity: round_to(state.accumulated_capacity, 2),
        power: round_to(voltage * current.abs(), 2),
        chamber_temperature: round_to(rng.gen_range(20.0..30.0), 1),
        step_time: state.step_time,
        total_time: state.total_time,
        test_name: pick_label(&TEST_NAMES, rng).to_owned(),
        schedule: pick_label(&SCHEDULES, rng).to_owned(),
    }
}

fn aux_reading(sensor_id: u32, rng: &mut StdRng) -> AuxReading {
    AuxReading {
        sensor_id,
        sensor_name: format!("{}_{}", pick_label(&AUX_SENSOR_NAMES, rng), sensor_id),
        value: round_to(rng.gen_range(AUX_RANGE.0..AUX_RANGE.1), 2),
        safe_upper_limit: AUX_SAFE_LIMITS.1,
        safe_lower_limit: AUX_SAFE_LIMITS.0,
    }
}

fn bus_signal(bms_id: u32, names: &[&str], range: (f64, f64), rng: &mut StdRng) -> BusSignal {
    BusSignal {
        name: format!("{}_{}", pick_label(names, rng), bms_id),
        value: round_to(rng.gen_range(range.0..range.1), 2),
        bms_id,
        max: range.1,
        min: range.0,
    }
}

fn alarm(rng: &mut StdRng) -> AlarmEvent {
    let severity = pick_variant(AlarmSeverity::VARIANTS, rng);
    AlarmEvent {
        name: format!("ALARM_{}", rng.gen_range(100..999)),
        id: rng.gen_range(1000..9999),
        description: severity.description().to_owned(),
        timestamp: Utc::now(),
        severity,
    }
}

fn pick_variant<T: Copy>(variants: &[T], rng: &mut StdRng) -> T {
    variants[rng.gen_range(0..variants.len())]
}

fn pick_label<'a>(labels: &[&'a str], rng: &mut StdRng) -> &'a str {
    labels.choose(rng).copied().unwrap_or_default()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_settings() -> GeneratorSettings {
        GeneratorSettings {
            transition_probability: 0.0,
            alarm_probability: 0.0,
            ..GeneratorSettings::default()
        }
    }

    fn force_status(generator: &TelemetryGenerator, channel: u32, status: ChannelStatus) {
        let mut inner = generator.inner.lock();
        inner.channels.entry(channel).or_default().status = status;
    }

    #[test]
    fn repeated_calls_keep_shape_and_numbering() {
        let generator = TelemetryGenerator::with_seed(GeneratorSettings::default(), 7);
        let request = SnapshotRequest::new("dev1", 2, 1, 1, 1);
        for _ in 0..2 {
            let snapshot = generator.next_snapshot(&request);
            assert_eq!(snapshot.device_id, "dev1");
            assert_eq!(snapshot.channels.len(), 2);
            assert_eq!(snapshot.aux_data.len(), 1);
            assert_eq!(snapshot.can_data.len(), 1);
            assert_eq!(snapshot.lin_data.len(), 1);
            let numbers: Vec<u32> = snapshot.channels.iter().map(|c| c.channel_number).collect();
            assert_eq!(numbers, vec![1, 2]);
        }
    }

    #[test]
    fn channel_count_matches_request() {
        let generator = TelemetryGenerator::with_seed(GeneratorSettings::default(), 11);
        for n in [0u32, 1, 5, 32] {
            let snapshot = generator.next_snapshot(&SnapshotRequest::new("dev", n, 0, 0, 0));
            let numbers: Vec<u32> = snapshot.channels.iter().map(|c| c.channel_number).collect();
            assert_eq!(numbers, (1..=n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn zero_counts_produce_empty_lists() {
        let generator = TelemetryGenerator::with_seed(quiet_settings(), 1);
        let snapshot = generator.next_snapshot(&SnapshotRequest::new("dev", 0, 0, 0, 0));
        assert!(snapshot.channels.is_empty());
        assert!(snapshot.aux_data.is_empty());
        assert!(snapshot.can_data.is_empty());
        assert!(snapshot.lin_data.is_empty());
        assert!(snapshot.alarm_data.is_empty());
        assert_eq!(generator.tracked_channels(), 0);
    }

    #[test]
    fn power_is_rounded_product_of_voltage_and_current() {
        let settings = GeneratorSettings {
            transition_probability: 0.3,
            ..GeneratorSettings::default()
        };
        let generator = TelemetryGenerator::with_seed(settings, 99);
        let request = SnapshotRequest::new("dev", 16, 0, 0, 0);
        for _ in 0..200 {
            for reading in generator.next_snapshot(&request).channels {
                let expected = round_to(reading.voltage * reading.current.abs(), 2);
                assert_eq!(reading.power, expected, "channel {}", reading.channel_number);
            }
        }
    }

    #[test]
    fn at_most_one_alarm_per_snapshot() {
        let settings = GeneratorSettings {
            alarm_probability: 0.5,
            ..GeneratorSettings::default()
        };
        let generator = TelemetryGenerator::with_seed(settings, 3);
        let request = SnapshotRequest::new("dev", 1, 0, 0, 0);
        let mut with_alarm = 0;
        for _ in 0..500 {
            let snapshot = generator.next_snapshot(&request);
            assert!(snapshot.alarm_data.len() <= 1);
            with_alarm += snapshot.alarm_data.len();
        }
        assert!(with_alarm > 0);
    }

    #[test]
    fn alarm_fields_follow_severity() {
        let settings = GeneratorSettings {
            alarm_probability: 1.0,
            ..GeneratorSettings::default()
        };
        let generator = TelemetryGenerator::with_seed(settings, 5);
        for _ in 0..50 {
            let snapshot = generator.next_snapshot(&SnapshotRequest::new("dev", 0, 0, 0, 0));
            let alarm = &snapshot.alarm_data[0];
            assert_eq!(alarm.description, alarm.severity.description());
            assert!((1000..9999).contains(&alarm.id));
            assert!(alarm.name.starts_with("ALARM_"));
        }
    }

    #[test]
    fn capacity_accumulates_only_while_active() {
        let generator = TelemetryGenerator::with_seed(quiet_settings(), 21);
        let request = SnapshotRequest::new("dev", 2, 0, 0, 0);
        generator.next_snapshot(&request);
        force_status(&generator, 1, ChannelStatus::Charge);
        force_status(&generator, 2, ChannelStatus::Rest);

        let mut previous = (0.0, 0.0);
        for _ in 0..300 {
            let snapshot = generator.next_snapshot(&request);
            let charging = &snapshot.channels[0];
            let resting = &snapshot.channels[1];
            assert_eq!(charging.status, ChannelStatus::Charge);
            assert!(charging.capacity >= previous.0);
            assert_eq!(resting.capacity, previous.1);
            previous = (charging.capacity, resting.capacity);
        }
        assert!(previous.0 > 0.0);

        let state = generator.channel_state(1).expect("state tracked");
        assert!(state.accumulated_capacity > 0.0);
    }

    #[test]
    fn discharge_also_accumulates_capacity() {
        let generator = TelemetryGenerator::with_seed(quiet_settings(), 8);
        let request = SnapshotRequest::new("dev", 1, 0, 0, 0);
        generator.next_snapshot(&request);
        force_status(&generator, 1, ChannelStatus::Discharge);
        let before = generator.channel_state(1).unwrap().accumulated_capacity;
        for _ in 0..100 {
            generator.next_snapshot(&request);
        }
        assert!(generator.channel_state(1).unwrap().accumulated_capacity > before);
    }

    #[test]
    fn readings_stay_in_status_ranges() {
        let generator = TelemetryGenerator::with_seed(quiet_settings(), 13);
        let request = SnapshotRequest::new("dev", 6, 0, 0, 0);
        generator.next_snapshot(&request);
        let statuses = ChannelStatus::VARIANTS;
        for (index, status) in statuses.iter().enumerate() {
            force_status(&generator, index as u32 + 1, *status);
        }
        for _ in 0..100 {
            for reading in generator.next_snapshot(&request).channels {
                let (v, i) = (reading.voltage, reading.current);
                match reading.status {
                    ChannelStatus::Charge => {
                        assert!((3.2..=4.2).contains(&v) && (0.5..=5.0).contains(&i))
                    }
                    ChannelStatus::Discharge => {
                        assert!((2.8..=3.8).contains(&v) && (-5.0..=-0.5).contains(&i))
                    }
                    ChannelStatus::Rest => {
                        assert!((3.4..=3.8).contains(&v) && i.abs() <= 0.01)
                    }
                    ChannelStatus::Idle => {
                        assert_eq!((v, i, reading.power), (0.0, 0.0, 0.0))
                    }
                    ChannelStatus::Pause | ChannelStatus::Finish => {
                        assert!((3.6..=3.8).contains(&v) && i.abs() <= 0.05)
                    }
                }
                assert!((20.0..=30.0).contains(&reading.chamber_temperature));
                assert!(TEST_NAMES.contains(&reading.test_name.as_str()));
                assert!(SCHEDULES.contains(&reading.schedule.as_str()));
            }
        }
    }

    #[test]
    fn elapsed_counters_follow_tick() {
        let settings = GeneratorSettings {
            tick: Duration::from_secs(2),
            ..quiet_settings()
        };
        let generator = TelemetryGenerator::with_seed(settings, 4);
        let request = SnapshotRequest::new("dev", 1, 0, 0, 0);
        let mut last = None;
        for _ in 0..3 {
            last = generator.next_snapshot(&request).channels.into_iter().next();
        }
        let reading = last.expect("one channel");
        assert_eq!(reading.total_time, Duration::from_secs(6));
        assert_eq!(reading.step_time, Duration::from_secs(6));
        assert_eq!(reading.status, ChannelStatus::Idle);
        assert_eq!((reading.cycle_no, reading.step_no), (1, 1));
    }

    #[test]
    fn sub_second_ticks_accumulate() {
        let settings = GeneratorSettings {
            tick: Duration::from_millis(500),
            ..quiet_settings()
        };
        let generator = TelemetryGenerator::with_seed(settings, 6);
        let request = SnapshotRequest::new("dev", 1, 0, 0, 0);
        for _ in 0..3 {
            generator.next_snapshot(&request);
        }
        let reading = &generator.next_snapshot(&request).channels[0];
        assert_eq!(reading.total_time, Duration::from_secs(2));
        assert_eq!(reading.step_time, Duration::from_secs(2));

        let reading = &generator.next_snapshot(&request).channels[0];
        assert_eq!(reading.total_time, Duration::from_millis(2_500));
        let state = generator.channel_state(1).expect("state tracked");
        assert_eq!(state.total_time, Duration::from_millis(2_500));
    }

    #[test]
    fn steps_roll_over_into_new_cycle() {
        let settings = GeneratorSettings {
            transition_probability: 1.0,
            ..quiet_settings()
        };
        let generator = TelemetryGenerator::with_seed(settings, 17);
        let request = SnapshotRequest::new("dev", 1, 0, 0, 0);
        for expected_step in 2..=10 {
            let reading = &generator.next_snapshot(&request).channels[0];
            assert_eq!(reading.step_no, expected_step);
            assert_eq!(reading.cycle_no, 1);
            assert_eq!(reading.step_time, Duration::ZERO);
        }
        let reading = &generator.next_snapshot(&request).channels[0];
        assert_eq!((reading.cycle_no, reading.step_no), (2, 1));
        assert_eq!(reading.total_time, Duration::from_secs(10));
    }

    #[test]
    fn aux_and_bus_entries_use_static_bounds() {
        let generator = TelemetryGenerator::with_seed(quiet_settings(), 31);
        let snapshot = generator.next_snapshot(&SnapshotRequest::new("dev", 0, 3, 2, 2));
        for (index, aux) in snapshot.aux_data.iter().enumerate() {
            assert_eq!(aux.sensor_id, index as u32 + 1);
            assert!(aux.sensor_name.ends_with(&format!("_{}", aux.sensor_id)));
            assert!((20.0..=80.0).contains(&aux.value));
            assert_eq!((aux.safe_lower_limit, aux.safe_upper_limit), (15.0, 75.0));
        }
        for signal in &snapshot.can_data {
            assert!((0.0..=100.0).contains(&signal.value));
            assert_eq!((signal.min, signal.max), (0.0, 100.0));
        }
        for signal in &snapshot.lin_data {
            assert!((0.0..=50.0).contains(&signal.value));
            assert_eq!((signal.min, signal.max), (0.0, 50.0));
        }
        assert_eq!(snapshot.lin_data[1].bms_id, 2);
    }

    #[test]
    fn seeded_generators_agree() {
        let a = TelemetryGenerator::with_seed(GeneratorSettings::default(), 1234);
        let b = TelemetryGenerator::with_seed(GeneratorSettings::default(), 1234);
        let request = SnapshotRequest::new("dev", 4, 2, 2, 2);
        for _ in 0..10 {
            let left = a.next_snapshot(&request);
            let right = b.next_snapshot(&request);
            assert_eq!(left.channels, right.channels);
            assert_eq!(left.aux_data, right.aux_data);
            assert_eq!(left.can_data, right.can_data);
            assert_eq!(left.alarm_data.len(), right.alarm_data.len());
        }
    }

    #[test]
    fn settings_follow_configuration() {
        let config = SimulationConfig {
            seed: Some(9),
            transition_probability: 0.25,
            alarm_probability: 0.0,
            max_steps_per_cycle: 3,
            tick: Duration::from_secs(5),
        };
        let generator = TelemetryGenerator::from_config(&config);
        assert_eq!(generator.settings().max_steps_per_cycle, 3);
        assert_eq!(generator.settings().tick, Duration::from_secs(5));
        assert_eq!(
            SnapshotRequest::from(&DeviceConfig::default()).device_id,
            "GPIMS-SIM-001"
        );
    }
}
