//! Clutch noise detection.
//!
//! A worn clutch potentiometer reports small non-zero values while the pedal rests.
//! Such a reading barely moves from sample to sample, whereas a real press moves a lot.
//! The detector counts consecutive "stuck" samples while the driver is off the gas and
//! fires once when the count reaches `repeat`.

use crate::device::normalize::scaled;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClutchState {
    Idle,
    Accumulating(u32),
}

impl ClutchState {
    pub fn count(&self) -> u32 {
        match self {
            ClutchState::Idle => 0,
            ClutchState::Accumulating(count) => *count,
        }
    }
}

/// Emitted once each time the stuck count reaches the configured repeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClutchAlert {
    pub value: u32,
}

#[derive(Clone, Debug)]
pub struct ClutchNoiseDetector {
    axis_margin: u32,
    repeat: u32,
    previous: u32,
    state: ClutchState,
    total_alerts: u64,
}

impl ClutchNoiseDetector {
    pub fn new(axis_max: u32, margin_percent: u8, repeat: u32) -> Self {
        let axis_margin = scaled(axis_max, margin_percent);
        debug!(
            "Clutch detector: margin={} axis units, repeat={}",
            axis_margin, repeat
        );
        Self {
            axis_margin,
            repeat,
            previous: 0,
            state: ClutchState::Idle,
            total_alerts: 0,
        }
    }

    pub fn axis_margin(&self) -> u32 {
        self.axis_margin
    }

    pub fn state(&self) -> ClutchState {
        self.state
    }

    pub fn total_alerts(&self) -> u64 {
        self.total_alerts
    }

    /// Evaluates one tick. `gas_idle` is true when the gas reading is inside its idle
    /// band.
    pub fn update(&mut self, clutch_value: u32, gas_idle: bool) -> Option<ClutchAlert> {
        let previous = std::mem::replace(&mut self.previous, clutch_value);

        if !gas_idle || clutch_value == 0 {
            self.state = ClutchState::Idle;
            return None;
        }

        let closure = clutch_value.abs_diff(previous);
        if closure > self.axis_margin {
            self.state = ClutchState::Idle;
            return None;
        }

        let count = self.state.count() + 1;
        if count >= self.repeat {
            self.state = ClutchState::Idle;
            self.total_alerts += 1;
            debug!("Clutch noise: value={} closure={}", clutch_value, closure);
            return Some(ClutchAlert {
                value: clutch_value,
            });
        }

        self.state = ClutchState::Accumulating(count);
        None
    }

    /// Forgets the accumulated count and the previous sample. Alert totals are kept.
    pub fn reset(&mut self) {
        self.previous = 0;
        self.state = ClutchState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::normalize::RAW_AXIS_MAX;

    fn detector() -> ClutchNoiseDetector {
        ClutchNoiseDetector::new(RAW_AXIS_MAX, 5, 4)
    }

    #[test]
    fn margin_is_five_percent_of_raw_range() {
        assert_eq!(detector().axis_margin(), 51);
    }

    #[test]
    fn four_stuck_samples_fire_exactly_once() {
        let mut d = detector();
        let alerts: Vec<_> = [40, 45, 50, 55, 60]
            .into_iter()
            .map(|v| d.update(v, true))
            .collect();
        assert_eq!(alerts[0], None);
        assert_eq!(alerts[1], None);
        assert_eq!(alerts[2], None);
        assert_eq!(alerts[3], Some(ClutchAlert { value: 55 }));
        assert_eq!(alerts[4], None);
        assert_eq!(d.state(), ClutchState::Accumulating(1));
        assert_eq!(d.total_alerts(), 1);
    }

    #[test]
    fn first_sample_from_zero_counts_only_when_within_margin() {
        // From a fresh detector previous is 0, so 200 is a large jump.
        let mut d = detector();
        assert_eq!(d.update(200, true), None);
        assert_eq!(d.state(), ClutchState::Idle);

        let mut d = detector();
        assert_eq!(d.update(40, true), None);
        assert_eq!(d.state(), ClutchState::Accumulating(1));
    }

    #[test]
    fn large_movement_resets_count() {
        let mut d = detector();
        for v in [40, 45, 50] {
            d.update(v, true);
        }
        assert_eq!(d.state(), ClutchState::Accumulating(3));
        assert_eq!(d.update(400, true), None);
        assert_eq!(d.state(), ClutchState::Idle);
    }

    #[test]
    fn gas_pressed_closes_the_gate_but_tracks_previous() {
        let mut d = detector();
        d.update(40, true);
        d.update(42, true);
        assert_eq!(d.update(600, false), None);
        assert_eq!(d.state(), ClutchState::Idle);

        // previous is now 600, so 610 counts as stuck.
        assert_eq!(d.update(610, true), None);
        assert_eq!(d.state(), ClutchState::Accumulating(1));
    }

    #[test]
    fn released_clutch_never_counts() {
        let mut d = detector();
        for _ in 0..10 {
            assert_eq!(d.update(0, true), None);
        }
        assert_eq!(d.state(), ClutchState::Idle);
    }

    #[test]
    fn repeat_of_one_fires_every_stuck_sample() {
        let mut d = ClutchNoiseDetector::new(RAW_AXIS_MAX, 5, 1);
        assert!(d.update(10, true).is_some());
        assert!(d.update(12, true).is_some());
    }
}
