//! Axis normalization into the pedal travel space.
//!
//! All detectors work on values where `0` is a released pedal and `axis_max` a fully
//! pressed one. Hardware like the ClubSport V2 reports the opposite in raw mode, so by
//! default the raw value is mirrored around `axis_max`.

use crate::config::{AxisDeadzone, MonitorConfig};
use crate::device::poller::RawSample;
use std::time::Instant;

/// Axis range in raw (high-resolution) reporting mode.
pub const RAW_AXIS_MAX: u32 = 1023;
/// Axis range in default reporting mode.
pub const DEFAULT_AXIS_MAX: u32 = 65535;

pub fn axis_max(raw_data: bool) -> u32 {
    if raw_data {
        RAW_AXIS_MAX
    } else {
        DEFAULT_AXIS_MAX
    }
}

/// Maps a raw reading into `0..=axis_max`, mirroring it when `invert` is set.
#[inline]
pub fn normalize(raw: u32, axis_max: u32, invert: bool) -> u32 {
    let raw = raw.min(axis_max);
    if invert {
        axis_max - raw
    } else {
        raw
    }
}

/// `percent` of `axis_max` in axis units, floored.
#[inline]
pub fn scaled(axis_max: u32, percent: u8) -> u32 {
    ((u64::from(axis_max) * u64::from(percent)) / 100) as u32
}

/// Travel as a share of the full axis, floored.
#[inline]
pub fn physical_percent(value: u32, axis_max: u32) -> u8 {
    if axis_max == 0 {
        return 0;
    }
    ((u64::from(value.min(axis_max)) * 100) / u64::from(axis_max)) as u8
}

/// Deadzone-mapped travel: 0 inside the idle band, 100 inside the full band, linear
/// in between. A degenerate band (`hi <= lo`) always yields 0.
#[inline]
pub fn logical_percent(value: u32, lo: u32, hi: u32) -> u8 {
    if hi <= lo || value <= lo {
        return 0;
    }
    if value >= hi {
        return 100;
    }
    ((u64::from(value - lo) * 100) / u64::from(hi - lo)) as u8
}

/// Idle (`lo`) and full (`hi`) thresholds of one axis, in axis units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AxisThresholds {
    pub lo: u32,
    pub hi: u32,
}

impl AxisThresholds {
    pub fn from_deadzone(axis_max: u32, deadzone: AxisDeadzone) -> Self {
        Self {
            lo: scaled(axis_max, deadzone.deadzone_in),
            hi: scaled(axis_max, deadzone.deadzone_out),
        }
    }
}

/// One axis after normalization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AxisReading {
    pub raw: u32,
    pub value: u32,
    pub physical_percent: u8,
    pub logical_percent: u8,
    /// `value <= lo`.
    pub idle: bool,
    /// `value >= hi`.
    pub full: bool,
}

impl AxisReading {
    /// Inside the idle band.
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Inside the full band.
    pub fn is_full(&self) -> bool {
        self.full
    }
}

/// All pedal axes of one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormalizedSample {
    pub gas: AxisReading,
    pub brake: AxisReading,
    pub clutch: AxisReading,
    pub at: Instant,
}

/// Per-run normalizer. `axis_max` is fixed for the run; only the gas full threshold
/// may move when deadzone auto-adjust lowers it.
#[derive(Clone, Debug)]
pub struct AxisNormalizer {
    axis_max: u32,
    invert: bool,
    gas: AxisThresholds,
    brake: AxisThresholds,
    clutch: AxisThresholds,
}

impl AxisNormalizer {
    pub fn new(axis_max: u32, invert: bool, gas: AxisDeadzone, brake: AxisDeadzone, clutch: AxisDeadzone) -> Self {
        Self {
            axis_max,
            invert,
            gas: AxisThresholds::from_deadzone(axis_max, gas),
            brake: AxisThresholds::from_deadzone(axis_max, brake),
            clutch: AxisThresholds::from_deadzone(axis_max, clutch),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            axis_max(config.device.raw_data),
            config.device.axis_normalization,
            config.pedals.gas,
            config.pedals.brake,
            config.pedals.clutch,
        )
    }

    pub fn axis_max(&self) -> u32 {
        self.axis_max
    }

    pub fn gas_thresholds(&self) -> AxisThresholds {
        self.gas
    }

    pub fn set_gas_deadzone_out(&mut self, percent: u8) {
        self.gas.hi = scaled(self.axis_max, percent);
    }

    pub fn read(&self, raw: u32, thresholds: AxisThresholds) -> AxisReading {
        let value = normalize(raw, self.axis_max, self.invert);
        AxisReading {
            raw,
            value,
            physical_percent: physical_percent(value, self.axis_max),
            logical_percent: logical_percent(value, thresholds.lo, thresholds.hi),
            idle: value <= thresholds.lo,
            full: value >= thresholds.hi,
        }
    }

    pub fn apply(&self, sample: &RawSample) -> NormalizedSample {
        NormalizedSample {
            gas: self.read(sample.gas, self.gas),
            brake: self.read(sample.brake, self.brake),
            clutch: self.read(sample.clutch, self.clutch),
            at: sample.at,
        }
    }
}
