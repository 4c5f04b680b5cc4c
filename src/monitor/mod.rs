//! Signal-quality detectors.
//!
//! - [`clutch`]: stuck/noisy clutch readings while off the gas.
//! - [`gas`]: racing/idle tracking and drift alerts when full travel is never reached.
//! - [`estimator`]: optional gas deadzone-out estimation and auto-adjust.
//!
//! [`PedalMonitors`] runs whichever detectors are enabled, in a fixed order, once per
//! successful poll. Detectors only return events; turning them into phrases is the
//! caller's job.

pub mod clutch;
pub mod estimator;
pub mod gas;

pub use clutch::{ClutchAlert, ClutchNoiseDetector, ClutchState};
pub use estimator::{DeadzoneEstimator, EstimateUpdate};
pub use gas::{GasDriftAlert, GasDriftDetector, GasDriftSettings, GasState, GasTransition, GasUpdate};

use crate::config::MonitorConfig;
use crate::device::{AxisNormalizer, NormalizedSample};
use std::time::{Duration, Instant};
use tracing::info;

/// Everything the detectors produced on one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DetectorOutcome {
    pub clutch_alert: Option<ClutchAlert>,
    pub gas: GasUpdate,
    pub estimate: EstimateUpdate,
}

/// Snapshot of detector state for the telemetry frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DetectorSnapshot {
    pub clutch_repeat_count: u32,
    pub clutch_alerts_total: u64,
    pub gas_racing: bool,
    pub gas_peak_in_window: u8,
    pub gas_percent_reached: u8,
    pub gas_alerts_total: u64,
    pub gas_deadzone_out: u8,
    pub gas_estimate: u8,
}

pub struct PedalMonitors {
    clutch: Option<ClutchNoiseDetector>,
    gas: Option<GasDriftDetector>,
    estimator: Option<DeadzoneEstimator>,
    configured_deadzone_out: u8,
    /// Gas deadzone-out currently applied to the normalizer.
    effective_deadzone_out: u8,
}

impl PedalMonitors {
    pub fn from_config(config: &MonitorConfig, axis_max: u32, now: Instant) -> Self {
        let clutch = config.monitor_clutch.then(|| {
            ClutchNoiseDetector::new(axis_max, config.clutch.margin_percent, config.clutch.repeat)
        });
        let gas = config
            .monitor_gas
            .then(|| GasDriftDetector::new(GasDriftSettings::from_config(config), now));
        let estimator = (config.monitor_gas && config.gas.estimate_deadzone_out).then(|| {
            DeadzoneEstimator::new(
                Duration::from_secs(config.gas.cooldown_s),
                config.gas.min_usage_percent,
                config.gas.auto_adjust_minimum,
                now,
            )
        });

        info!(
            "Monitors: clutch={} gas={} estimator={}",
            clutch.is_some(),
            gas.is_some(),
            estimator.is_some()
        );

        Self {
            clutch,
            gas,
            estimator,
            configured_deadzone_out: config.pedals.gas.deadzone_out,
            effective_deadzone_out: config.pedals.gas.deadzone_out,
        }
    }

    /// Runs the enabled detectors on one sample. An auto-adjusted deadzone-out is
    /// applied to the normalizer before returning, so it takes effect on the next tick.
    pub fn evaluate(&mut self, sample: &NormalizedSample, normalizer: &mut AxisNormalizer) -> DetectorOutcome {
        let mut outcome = DetectorOutcome::default();
        let now = sample.at;

        if let Some(clutch) = self.clutch.as_mut() {
            outcome.clutch_alert = clutch.update(sample.clutch.value, sample.gas.is_idle());
        }

        let Some(gas) = self.gas.as_mut() else {
            return outcome;
        };
        outcome.gas = gas.update(now, &sample.gas);

        let Some(estimator) = self.estimator.as_mut() else {
            return outcome;
        };
        if outcome.gas.transition.is_some() {
            estimator.restart_window(now);
        }
        if gas.is_racing() {
            outcome.estimate = estimator.update(
                now,
                sample.gas.physical_percent,
                !sample.gas.is_idle(),
                self.effective_deadzone_out,
            );
            if let Some(adjusted) = outcome.estimate.adjusted_deadzone_out {
                self.effective_deadzone_out = adjusted;
                normalizer.set_gas_deadzone_out(adjusted);
            }
        }

        outcome
    }

    /// Clears all detector state after a reconnect and restores the configured
    /// deadzone-out.
    pub fn reset(&mut self, now: Instant, normalizer: &mut AxisNormalizer) {
        if let Some(clutch) = self.clutch.as_mut() {
            clutch.reset();
        }
        if let Some(gas) = self.gas.as_mut() {
            gas.reset(now);
        }
        if let Some(estimator) = self.estimator.as_mut() {
            estimator.reset(now);
        }
        self.effective_deadzone_out = self.configured_deadzone_out;
        normalizer.set_gas_deadzone_out(self.configured_deadzone_out);
    }

    pub fn snapshot(&self) -> DetectorSnapshot {
        DetectorSnapshot {
            clutch_repeat_count: self.clutch.as_ref().map_or(0, |c| c.state().count()),
            clutch_alerts_total: self.clutch.as_ref().map_or(0, |c| c.total_alerts()),
            gas_racing: self.gas.as_ref().is_some_and(|g| g.is_racing()),
            gas_peak_in_window: self.gas.as_ref().map_or(0, |g| g.peak()),
            gas_percent_reached: self.gas.as_ref().map_or(0, |g| g.last_percent_reached()),
            gas_alerts_total: self.gas.as_ref().map_or(0, |g| g.total_alerts()),
            gas_deadzone_out: self.effective_deadzone_out,
            gas_estimate: self.estimator.as_ref().map_or(0, |e| e.best_estimate()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::normalize::RAW_AXIS_MAX;
    use crate::device::RawSample;

    fn config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.device.joystick_id = Some(0);
        config.device.raw_data = true;
        config.device.axis_normalization = false;
        config.monitor_clutch = true;
        config.monitor_gas = true;
        config.gas.estimate_deadzone_out = true;
        config.gas.auto_adjust_minimum = Some(80);
        config
    }

    fn sample(normalizer: &AxisNormalizer, gas: u32, clutch: u32, at: Instant) -> NormalizedSample {
        normalizer.apply(&RawSample {
            joystick_id: 0,
            gas,
            brake: 0,
            clutch,
            at,
        })
    }

    #[test]
    fn disabled_monitors_produce_nothing() {
        let mut config = config();
        config.monitor_clutch = false;
        config.monitor_gas = false;
        config.gas.estimate_deadzone_out = false;
        config.gas.auto_adjust_minimum = None;
        let t0 = Instant::now();
        let mut normalizer = AxisNormalizer::from_config(&config);
        let mut monitors = PedalMonitors::from_config(&config, RAW_AXIS_MAX, t0);

        for s in 0..10 {
            let at = t0 + Duration::from_secs(s);
            let outcome = monitors.evaluate(&sample(&normalizer, 0, 30, at), &mut normalizer);
            assert_eq!(outcome, DetectorOutcome::default());
        }
        assert_eq!(monitors.snapshot().gas_deadzone_out, 93);
    }

    #[test]
    fn clutch_gate_uses_gas_idle_band() {
        let config = config();
        let t0 = Instant::now();
        let mut normalizer = AxisNormalizer::from_config(&config);
        let mut monitors = PedalMonitors::from_config(&config, RAW_AXIS_MAX, t0);

        // Gas at 40 is inside the 51-unit idle band.
        let alerts = (0..4)
            .filter_map(|s| {
                let at = t0 + Duration::from_millis(s * 100);
                monitors
                    .evaluate(&sample(&normalizer, 40, 30, at), &mut normalizer)
                    .clutch_alert
            })
            .count();
        assert_eq!(alerts, 1);
    }

    #[test]
    fn gas_just_above_idle_band_closes_clutch_gate() {
        let config = config();
        let t0 = Instant::now();
        let mut normalizer = AxisNormalizer::from_config(&config);
        let mut monitors = PedalMonitors::from_config(&config, RAW_AXIS_MAX, t0);

        // 59 floors to logical 0 but is past the 51-unit idle band.
        let alerts = (0..8)
            .filter_map(|s| {
                let at = t0 + Duration::from_millis(s * 100);
                monitors
                    .evaluate(&sample(&normalizer, 59, 30, at), &mut normalizer)
                    .clutch_alert
            })
            .count();
        assert_eq!(alerts, 0);
    }

    #[test]
    fn gas_held_at_ninety_percent_travel_alerts_after_one_window() {
        let mut config = config();
        config.gas.estimate_deadzone_out = false;
        config.gas.auto_adjust_minimum = None;
        let t0 = Instant::now();
        let mut normalizer = AxisNormalizer::from_config(&config);
        let mut monitors = PedalMonitors::from_config(&config, RAW_AXIS_MAX, t0);

        // 921 raw is 90% physical and logical 96, short of the 951-unit full band.
        let alerts: Vec<(u64, u8)> = (0..120)
            .filter_map(|s| {
                let at = t0 + Duration::from_secs(s);
                monitors
                    .evaluate(&sample(&normalizer, 921, 0, at), &mut normalizer)
                    .gas
                    .alert
                    .map(|a| (s, a.percent_reached))
            })
            .collect();
        assert_eq!(alerts, vec![(30, 90), (90, 90)]);
    }

    #[test]
    fn auto_adjust_feeds_normalizer_then_reset_restores() {
        let config = config();
        let t0 = Instant::now();
        let mut normalizer = AxisNormalizer::from_config(&config);
        let mut monitors = PedalMonitors::from_config(&config, RAW_AXIS_MAX, t0);

        // 870 raw is 85% physical, below the 93% full-throttle threshold.
        let mut adjusted = None;
        for s in 0..=60 {
            let at = t0 + Duration::from_secs(s);
            let outcome = monitors.evaluate(&sample(&normalizer, 870, 0, at), &mut normalizer);
            adjusted = adjusted.or(outcome.estimate.adjusted_deadzone_out);
        }
        assert_eq!(adjusted, Some(85));
        assert_eq!(monitors.snapshot().gas_deadzone_out, 85);
        assert_eq!(normalizer.gas_thresholds().hi, 869);
        assert_eq!(monitors.snapshot().gas_estimate, 85);

        monitors.reset(t0 + Duration::from_secs(61), &mut normalizer);
        let snapshot = monitors.snapshot();
        assert_eq!(snapshot.gas_deadzone_out, 93);
        assert_eq!(snapshot.gas_estimate, 100);
        assert!(!snapshot.gas_racing);
        assert_eq!(normalizer.gas_thresholds().hi, 951);
    }
}
