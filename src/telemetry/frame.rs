//! Telemetry frame and envelope.
//!
//! A frame has the same flat shape on every tick. Values that do not apply (device
//! missing, detector disabled) are zero, never absent; boolean flags are `0`/`1`.

use crate::config::MonitorConfig;
use crate::device::NormalizedSample;
use crate::monitor::{DetectorOutcome, DetectorSnapshot};
use serde::Serialize;
use std::time::Duration;

pub const SCHEMA_VERSION: u32 = 1;

/// One tick, as published to subscribers.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct TelemetryFrame {
    pub sequence: u64,
    pub generated_at_unix_ms: i64,
    pub uptime_ms: u64,

    pub joystick_id: u32,
    pub controller_connected: u8,
    pub controller_disconnected: u8,
    pub controller_reconnected: u8,

    pub axis_max: u32,
    pub axis_normalization: u8,
    pub raw_data: u8,
    pub poll_interval_ms: u64,
    pub monitor_clutch: u8,
    pub monitor_gas: u8,
    pub gas_deadzone_in: u8,
    pub gas_deadzone_out: u8,
    pub brake_deadzone_in: u8,
    pub brake_deadzone_out: u8,
    pub clutch_deadzone_in: u8,
    pub clutch_deadzone_out: u8,
    pub clutch_margin_percent: u8,
    pub clutch_repeat: u32,
    pub gas_window_s: u64,
    pub gas_cooldown_s: u64,
    pub gas_timeout_s: u64,
    pub gas_min_usage_percent: u8,

    pub gas_raw: u32,
    pub gas_value: u32,
    pub gas_physical_pct: u8,
    pub gas_logical_pct: u8,
    pub brake_raw: u32,
    pub brake_value: u32,
    pub brake_physical_pct: u8,
    pub brake_logical_pct: u8,
    pub clutch_raw: u32,
    pub clutch_value: u32,
    pub clutch_physical_pct: u8,
    pub clutch_logical_pct: u8,

    pub clutch_repeat_count: u32,
    pub clutch_alert: u8,
    pub clutch_alerts_total: u64,
    pub gas_racing: u8,
    pub gas_peak_in_window: u8,
    pub gas_alert: u8,
    pub gas_percent_reached: u8,
    pub gas_alerts_total: u64,
    pub gas_estimate_pct: u8,
    pub gas_deadzone_adjusted: u8,

    /// Poll-to-publish time of the previous tick.
    pub work_time_ms: f64,
    /// Time between the starts of the previous and the current tick.
    pub full_loop_time_ms: f64,
    pub missed_ticks: u64,
}

/// Loop timing reported with a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LoopTiming {
    pub work_time: Duration,
    pub full_loop_time: Duration,
    pub missed_ticks: u64,
}

/// Connection state of the device on this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Connected,
    Disconnected,
    /// First successful poll after a disconnect.
    Reconnected,
}

/// Everything a frame is assembled from.
pub struct FrameInputs<'a> {
    pub config: &'a MonitorConfig,
    pub axis_max: u32,
    pub sequence: u64,
    pub generated_at_unix_ms: i64,
    pub uptime: Duration,
    pub joystick_id: u32,
    pub link: LinkState,
    /// Absent while the device is disconnected.
    pub sample: Option<&'a NormalizedSample>,
    pub outcome: &'a DetectorOutcome,
    pub detectors: &'a DetectorSnapshot,
    pub timing: LoopTiming,
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

fn millis(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1000.0
}

/// Builds one frame. Pure; missing inputs become zeros.
pub fn assemble(inputs: &FrameInputs<'_>) -> TelemetryFrame {
    let config = inputs.config;
    let sample = inputs.sample.copied();
    let gas = sample.map(|s| s.gas).unwrap_or_default();
    let brake = sample.map(|s| s.brake).unwrap_or_default();
    let clutch = sample.map(|s| s.clutch).unwrap_or_default();
    let detectors = inputs.detectors;

    TelemetryFrame {
        sequence: inputs.sequence,
        generated_at_unix_ms: inputs.generated_at_unix_ms,
        uptime_ms: inputs.uptime.as_millis() as u64,

        joystick_id: inputs.joystick_id,
        controller_connected: flag(inputs.link != LinkState::Disconnected),
        controller_disconnected: flag(inputs.link == LinkState::Disconnected),
        controller_reconnected: flag(inputs.link == LinkState::Reconnected),

        axis_max: inputs.axis_max,
        axis_normalization: flag(config.device.axis_normalization),
        raw_data: flag(config.device.raw_data),
        poll_interval_ms: config.poll_interval_ms,
        monitor_clutch: flag(config.monitor_clutch),
        monitor_gas: flag(config.monitor_gas),
        gas_deadzone_in: config.pedals.gas.deadzone_in,
        gas_deadzone_out: detectors.gas_deadzone_out,
        brake_deadzone_in: config.pedals.brake.deadzone_in,
        brake_deadzone_out: config.pedals.brake.deadzone_out,
        clutch_deadzone_in: config.pedals.clutch.deadzone_in,
        clutch_deadzone_out: config.pedals.clutch.deadzone_out,
        clutch_margin_percent: config.clutch.margin_percent,
        clutch_repeat: config.clutch.repeat,
        gas_window_s: config.gas.window_s,
        gas_cooldown_s: config.gas.cooldown_s,
        gas_timeout_s: config.gas.timeout_s,
        gas_min_usage_percent: config.gas.min_usage_percent,

        gas_raw: gas.raw,
        gas_value: gas.value,
        gas_physical_pct: gas.physical_percent,
        gas_logical_pct: gas.logical_percent,
        brake_raw: brake.raw,
        brake_value: brake.value,
        brake_physical_pct: brake.physical_percent,
        brake_logical_pct: brake.logical_percent,
        clutch_raw: clutch.raw,
        clutch_value: clutch.value,
        clutch_physical_pct: clutch.physical_percent,
        clutch_logical_pct: clutch.logical_percent,

        clutch_repeat_count: detectors.clutch_repeat_count,
        clutch_alert: flag(inputs.outcome.clutch_alert.is_some()),
        clutch_alerts_total: detectors.clutch_alerts_total,
        gas_racing: flag(detectors.gas_racing),
        gas_peak_in_window: detectors.gas_peak_in_window,
        gas_alert: flag(inputs.outcome.gas.alert.is_some()),
        gas_percent_reached: inputs
            .outcome
            .gas
            .alert
            .map_or(detectors.gas_percent_reached, |a| a.percent_reached),
        gas_alerts_total: detectors.gas_alerts_total,
        gas_estimate_pct: detectors.gas_estimate,
        gas_deadzone_adjusted: flag(detectors.gas_deadzone_out != config.pedals.gas.deadzone_out),

        work_time_ms: millis(inputs.timing.work_time),
        full_loop_time_ms: millis(inputs.timing.full_loop_time),
        missed_ticks: inputs.timing.missed_ticks,
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeInfo {
    pub batch_id: u64,
    pub generated_at_unix_ms: i64,
    pub frames_in_batch: usize,
}

/// Wire envelope shared by the pull and push endpoints.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FrameEnvelope<'a> {
    pub schema_version: u32,
    pub bridge_info: BridgeInfo,
    pub frames: &'a [&'a TelemetryFrame],
}

impl<'a> FrameEnvelope<'a> {
    pub fn new(batch_id: u64, generated_at_unix_ms: i64, frames: &'a [&'a TelemetryFrame]) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            bridge_info: BridgeInfo {
                batch_id,
                generated_at_unix_ms,
                frames_in_batch: frames.len(),
            },
            frames,
        }
    }
}
