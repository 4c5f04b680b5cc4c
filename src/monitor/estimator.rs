//! Gas deadzone-out estimation.
//!
//! Over windows of one cooldown period, the estimator records how deep the gas pedal
//! physically travels. A window whose peak is a meaningful press but lower than every
//! earlier one becomes the new best estimate of where "full throttle" really is. The
//! estimate only ever goes down for one device attachment.

use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EstimateUpdate {
    /// New best estimate to announce.
    pub announce: Option<u8>,
    /// Effective gas deadzone-out after auto-adjust.
    pub adjusted_deadzone_out: Option<u8>,
}

#[derive(Clone, Debug)]
pub struct DeadzoneEstimator {
    window: Duration,
    min_usage: u8,
    auto_adjust_minimum: Option<u8>,
    best: u8,
    last_announced: u8,
    last_announce_at: Option<Instant>,
    window_start: Instant,
    peak: u8,
}

impl DeadzoneEstimator {
    pub fn new(window: Duration, min_usage: u8, auto_adjust_minimum: Option<u8>, now: Instant) -> Self {
        Self {
            window,
            min_usage,
            auto_adjust_minimum,
            best: 100,
            last_announced: 100,
            last_announce_at: None,
            window_start: now,
            peak: 0,
        }
    }

    pub fn best_estimate(&self) -> u8 {
        self.best
    }

    pub fn restart_window(&mut self, now: Instant) {
        self.window_start = now;
        self.peak = 0;
    }

    /// Evaluates one racing tick. `physical_percent` only counts while the pedal is
    /// outside its idle band.
    pub fn update(
        &mut self,
        now: Instant,
        physical_percent: u8,
        above_idle: bool,
        current_deadzone_out: u8,
    ) -> EstimateUpdate {
        let mut update = EstimateUpdate::default();

        if above_idle {
            self.peak = self.peak.max(physical_percent);
        }

        if now.saturating_duration_since(self.window_start) < self.window {
            return update;
        }

        let candidate = self.peak;
        if candidate >= self.min_usage && candidate < self.best {
            self.best = candidate;
            debug!("Deadzone estimate lowered to {}", candidate);

            let quiet_period_over = self
                .last_announce_at
                .map_or(true, |at| now.saturating_duration_since(at) >= self.window);
            if self.best < self.last_announced && quiet_period_over {
                self.last_announced = self.best;
                self.last_announce_at = Some(now);
                update.announce = Some(self.best);
            }

            if let Some(minimum) = self.auto_adjust_minimum {
                if self.best < current_deadzone_out && self.best >= minimum {
                    info!(
                        "Gas deadzone-out adjusted to {} (min={})",
                        self.best, minimum
                    );
                    update.adjusted_deadzone_out = Some(self.best);
                }
            }
        }

        self.restart_window(now);
        update
    }

    /// Starts over as if the device had just been attached.
    pub fn reset(&mut self, now: Instant) {
        self.best = 100;
        self.last_announced = 100;
        self.last_announce_at = None;
        self.restart_window(now);
    }
}
