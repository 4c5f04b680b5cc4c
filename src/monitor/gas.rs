//! Gas drift detection.
//!
//! A gas pedal whose sensor drifts stops reaching full travel. While the driver is
//! racing, the detector watches for full-throttle events; when a whole window passes
//! without one although the pedal was clearly used, it reports the deepest press seen.
//! Long idle periods (menus, pause screens) drop back to `Idle` without alerting.
//!
//! Full throttle is the reading's full band (`value >= hi`), so a lowered deadzone-out
//! takes effect through the normalizer alone. Peaks and alerts are in physical percent.

use crate::device::AxisReading;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasDriftSettings {
    pub window: Duration,
    pub cooldown: Duration,
    pub timeout: Duration,
    pub min_usage: u8,
}

impl GasDriftSettings {
    pub fn from_config(config: &crate::config::MonitorConfig) -> Self {
        Self {
            window: Duration::from_secs(config.gas.window_s),
            cooldown: Duration::from_secs(config.gas.cooldown_s),
            timeout: Duration::from_secs(config.gas.timeout_s),
            min_usage: config.gas.min_usage_percent,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasState {
    Idle,
    Racing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasTransition {
    /// Activity resumed; a fresh window starts on this tick.
    Started,
    /// Idle for longer than the timeout.
    Paused,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasDriftAlert {
    /// Deepest press of the window, physical percent.
    pub percent_reached: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GasUpdate {
    pub alert: Option<GasDriftAlert>,
    pub transition: Option<GasTransition>,
}

#[derive(Clone, Debug)]
pub struct GasDriftDetector {
    settings: GasDriftSettings,
    state: GasState,
    window_start: Instant,
    last_activity: Instant,
    last_alert: Option<Instant>,
    peak: u8,
    last_percent_reached: u8,
    total_alerts: u64,
}

impl GasDriftDetector {
    pub fn new(settings: GasDriftSettings, now: Instant) -> Self {
        debug!("Gas detector: {:?}", settings);
        Self {
            settings,
            state: GasState::Idle,
            window_start: now,
            last_activity: now,
            last_alert: None,
            peak: 0,
            last_percent_reached: 0,
            total_alerts: 0,
        }
    }

    pub fn state(&self) -> GasState {
        self.state
    }

    pub fn is_racing(&self) -> bool {
        self.state == GasState::Racing
    }

    pub fn peak(&self) -> u8 {
        self.peak
    }

    /// Peak reported by the most recent alert, 0 before the first one.
    pub fn last_percent_reached(&self) -> u8 {
        self.last_percent_reached
    }

    pub fn total_alerts(&self) -> u64 {
        self.total_alerts
    }

    /// Evaluates one tick of the gas axis.
    pub fn update(&mut self, now: Instant, gas: &AxisReading) -> GasUpdate {
        let mut update = GasUpdate::default();

        if gas.logical_percent > self.settings.min_usage {
            if self.state == GasState::Idle {
                self.state = GasState::Racing;
                self.window_start = now;
                self.peak = 0;
                update.transition = Some(GasTransition::Started);
                debug!("Gas: activity resumed");
            }
            self.last_activity = now;
        } else if self.state == GasState::Racing
            && now.saturating_duration_since(self.last_activity) > self.settings.timeout
        {
            self.state = GasState::Idle;
            self.peak = 0;
            update.transition = Some(GasTransition::Paused);
            debug!("Gas: auto-pause after {:?} idle", self.settings.timeout);
        }

        if self.state != GasState::Racing {
            return update;
        }

        self.peak = self.peak.max(gas.physical_percent);

        if gas.is_full() {
            self.peak = 0;
            self.window_start = now;
            return update;
        }

        if now.saturating_duration_since(self.window_start) >= self.settings.window {
            let cooled_down = self
                .last_alert
                .map_or(true, |at| now.saturating_duration_since(at) >= self.settings.cooldown);

            if self.peak > self.settings.min_usage && cooled_down {
                debug!("Gas drift: peak {}% in window", self.peak);
                self.last_alert = Some(now);
                self.last_percent_reached = self.peak;
                self.total_alerts += 1;
                update.alert = Some(GasDriftAlert {
                    percent_reached: self.peak,
                });
            }

            self.window_start = now;
            self.peak = 0;
        }

        update
    }

    /// Back to `Idle` with a fresh window; alert totals are kept.
    pub fn reset(&mut self, now: Instant) {
        self.state = GasState::Idle;
        self.window_start = now;
        self.last_activity = now;
        self.last_alert = None;
        self.peak = 0;
    }
}
