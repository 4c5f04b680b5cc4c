//! Drift-corrected tick schedule.
//!
//! Deadlines advance by whole intervals from the start instant, so a slow tick shifts
//! only itself and the following tick keeps the original phase. A tick that starts one
//! or more whole intervals late skips the deadlines it overran and counts them.

use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct TickClock {
    interval: Duration,
    next: Instant,
    missed: u64,
}

impl TickClock {
    /// The first deadline is `start` itself.
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            next: start,
            missed: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Total deadlines skipped so far.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn next_deadline(&self) -> Instant {
        self.next
    }

    /// Time left until the next deadline, zero when it has passed.
    pub fn until_next(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }

    /// Marks the start of a tick at `now` and schedules the next deadline. Returns the
    /// number of deadlines skipped because this tick started late.
    pub fn start_tick(&mut self, now: Instant) -> u64 {
        let late = now.saturating_duration_since(self.next);
        let skipped = if self.interval.is_zero() || late < self.interval {
            0
        } else {
            (late.as_nanos() / self.interval.as_nanos()) as u64
        };

        let steps = u32::try_from(skipped.saturating_add(1)).unwrap_or(u32::MAX);
        self.next += self.interval.saturating_mul(steps);
        self.missed += skipped;
        skipped
    }
}
