//! One tick: poll → normalize → detect → assemble → distribute.
//!
//! [`TickProcessor`] owns every piece of per-tick state and is only ever touched by
//! the tick thread, so detector updates happen strictly in tick order.

use crate::alerts::{AlertEvent, AlertSink};
use crate::config::MonitorConfig;
use crate::device::{AxisNormalizer, DevicePoller, NormalizedSample};
use crate::monitor::{DetectorOutcome, PedalMonitors};
use crate::pipeline::clock::TickClock;
use crate::telemetry::{assemble, FrameDistributor, FrameInputs, LinkState, LoopTiming, TelemetryFrame};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest uninterrupted sleep, so cancellation is noticed quickly.
const SLEEP_SLICE: Duration = Duration::from_millis(50);
const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub ticks: u64,
    pub poll_failures: u64,
    pub reconnects: u64,
    pub clutch_alerts: u64,
    pub gas_alerts: u64,
    pub missed_ticks: u64,
}

pub struct TickProcessor {
    config: MonitorConfig,
    // Declared before the poller: subscribers are closed before the device is released.
    distributor: FrameDistributor,
    poller: DevicePoller,
    normalizer: AxisNormalizer,
    monitors: PedalMonitors,
    alerts: AlertSink,
    sequence: u64,
    started: Instant,
    disconnected: bool,
    joystick_id: u32,
    summary: TickSummary,
}

impl TickProcessor {
    pub fn new(
        config: MonitorConfig,
        poller: DevicePoller,
        distributor: FrameDistributor,
        alerts: AlertSink,
        now: Instant,
    ) -> Self {
        let normalizer = AxisNormalizer::from_config(&config);
        let monitors = PedalMonitors::from_config(&config, normalizer.axis_max(), now);
        let joystick_id = poller.active_id().or(config.device.joystick_id).unwrap_or(0);
        Self {
            config,
            distributor,
            poller,
            normalizer,
            monitors,
            alerts,
            sequence: 0,
            started: now,
            disconnected: false,
            joystick_id,
            summary: TickSummary::default(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn summary(&self) -> TickSummary {
        self.summary
    }

    /// Polls the device, resolving the disconnect latch. Returns the link state of
    /// this tick and the sample when the poll succeeded.
    fn poll(&mut self, now: Instant) -> (LinkState, Option<NormalizedSample>) {
        match self.poller.poll(now) {
            Ok(raw) => {
                let link = if self.disconnected {
                    self.disconnected = false;
                    self.summary.reconnects += 1;
                    info!("Controller reconnected at ID {}", raw.joystick_id);
                    self.monitors.reset(now, &mut self.normalizer);
                    self.alerts.alert(&AlertEvent::ControllerReconnected);
                    LinkState::Reconnected
                } else {
                    LinkState::Connected
                };
                self.joystick_id = raw.joystick_id;
                (link, Some(self.normalizer.apply(&raw)))
            }
            Err(e) => {
                self.summary.poll_failures += 1;
                if !self.disconnected {
                    self.disconnected = true;
                    warn!("{}", e);
                    self.alerts.alert(&AlertEvent::ControllerDisconnected);
                } else {
                    debug!("{}", e);
                }
                (LinkState::Disconnected, None)
            }
        }
    }

    fn dispatch_alerts(&mut self, outcome: &DetectorOutcome) {
        if outcome.clutch_alert.is_some() {
            self.summary.clutch_alerts += 1;
            self.alerts.alert(&AlertEvent::ClutchNoise);
        }
        if let Some(alert) = outcome.gas.alert {
            self.summary.gas_alerts += 1;
            info!("Gas drift: peak {}% in window", alert.percent_reached);
            self.alerts.alert(&AlertEvent::GasDrift {
                percent_reached: alert.percent_reached,
            });
        }
        if let Some(percent) = outcome.estimate.announce {
            info!("Suggested gas deadzone-out: {}", percent);
            self.alerts.alert(&AlertEvent::DeadzoneEstimate { percent });
        }
    }

    fn log_sample(&self, sample: &NormalizedSample) {
        if self.config.debug_raw {
            debug!(
                "#{} gas={} ({}%, raw {}) brake={} ({}%, raw {}) clutch={} ({}%, raw {})",
                self.sequence,
                sample.gas.value,
                sample.gas.logical_percent,
                sample.gas.raw,
                sample.brake.value,
                sample.brake.logical_percent,
                sample.brake.raw,
                sample.clutch.value,
                sample.clutch.logical_percent,
                sample.clutch.raw
            );
        } else {
            debug!(
                "#{} gas={} ({}%) brake={} ({}%) clutch={} ({}%)",
                self.sequence,
                sample.gas.value,
                sample.gas.logical_percent,
                sample.brake.value,
                sample.brake.logical_percent,
                sample.clutch.value,
                sample.clutch.logical_percent
            );
        }
    }

    /// Runs one tick and returns the frame it published. Never fails: device and
    /// distribution problems are reported in the frame and the log.
    pub fn tick(&mut self, now: Instant, timing: LoopTiming) -> Arc<TelemetryFrame> {
        self.sequence += 1;
        self.summary.ticks += 1;
        self.summary.missed_ticks = timing.missed_ticks;

        let (link, sample) = self.poll(now);
        let outcome = match sample.as_ref() {
            Some(sample) => self.monitors.evaluate(sample, &mut self.normalizer),
            None => DetectorOutcome::default(),
        };
        self.dispatch_alerts(&outcome);

        if self.config.verbose {
            if let Some(sample) = sample.as_ref() {
                self.log_sample(sample);
            }
        }

        let detectors = self.monitors.snapshot();
        let frame = Arc::new(assemble(&FrameInputs {
            config: &self.config,
            axis_max: self.normalizer.axis_max(),
            sequence: self.sequence,
            generated_at_unix_ms: chrono::Utc::now().timestamp_millis(),
            uptime: now.saturating_duration_since(self.started),
            joystick_id: self.joystick_id,
            link,
            sample: sample.as_ref(),
            outcome: &outcome,
            detectors: &detectors,
            timing,
        }));

        if let Err(e) = self.distributor.publish(frame.clone()) {
            error!("Distribution skipped for frame {}: {}", frame.sequence, e);
        }
        frame
    }

    fn log_stats(&self, elapsed: Duration, ticks_in_period: u64) {
        let stats = self.distributor.stats();
        info!(
            "Tick stats: {} ticks in {} seconds, {} missed, {} poll failures, {} subscriber(s)",
            ticks_in_period,
            elapsed.as_secs(),
            self.summary.missed_ticks,
            self.summary.poll_failures,
            self.distributor.subscriber_count()
        );
        info!(
            "Distribution: {} encoded, {} delivered, {} skipped, {} dropped; alerts {} queued, {} dropped",
            stats.encoded,
            stats.delivered,
            stats.skipped,
            stats.dropped,
            self.alerts.enqueued(),
            self.alerts.dropped()
        );
    }

    /// Closes all subscribers, then releases the device. Safe to call twice.
    pub fn shutdown(&mut self) {
        info!("Stopping tick processor after {} ticks", self.sequence);
        self.distributor.close_all();
        self.poller.release();
    }
}

/// Sleeps until `deadline` in short slices. Returns false when cancelled.
fn sleep_until(deadline: Instant, cancel: &CancellationToken) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return true;
        }
        std::thread::sleep(left.min(SLEEP_SLICE));
    }
}

/// Runs ticks on the calling thread until cancelled or `iterations` ticks have run
/// (0 = no limit). Reaching the limit cancels the token so the rest of the process
/// shuts down as well.
pub fn run_tick_loop(
    mut processor: TickProcessor,
    interval: Duration,
    iterations: u64,
    cancel: CancellationToken,
) -> TickSummary {
    info!("Starting tick loop with {:?} interval", interval);
    let mut clock = TickClock::new(interval, Instant::now());
    let mut last_start: Option<Instant> = None;
    let mut last_work = Duration::ZERO;
    let mut last_stats = Instant::now();
    let mut ticks_in_period = 0u64;

    while sleep_until(clock.next_deadline(), &cancel) {
        let start = Instant::now();
        clock.start_tick(start);

        let timing = LoopTiming {
            work_time: last_work,
            full_loop_time: last_start.map_or(Duration::ZERO, |prev| start.saturating_duration_since(prev)),
            missed_ticks: clock.missed(),
        };
        processor.tick(start, timing);
        last_work = start.elapsed();
        last_start = Some(start);
        ticks_in_period += 1;

        if iterations != 0 && processor.sequence() >= iterations {
            info!("Reached {} iterations", iterations);
            cancel.cancel();
            break;
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            processor.log_stats(last_stats.elapsed(), ticks_in_period);
            ticks_in_period = 0;
            last_stats = Instant::now();
        }
    }

    processor.shutdown();
    processor.summary()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AxisSource;
    use crate::device::joystick::{DeviceCaps, DriverError, JoyInfoEx, JoystickApi};
    use crate::device::poller::AxisMap;
    use crate::device::DeviceSelector;
    use crate::telemetry::{FrameEncoder, FrameEnvelope, JsonFrameEncoder, DistributorError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Gas on Y, brake on X, clutch on R; `None` fails the read.
    struct Scripted(Arc<Mutex<VecDeque<Option<(u32, u32, u32)>>>>);

    impl JoystickApi for Scripted {
        fn device_count(&self) -> u32 {
            1
        }

        fn device_caps(&self, _id: u32) -> Result<DeviceCaps, DriverError> {
            Err(DriverError::Unsupported)
        }

        fn read_position(&mut self, _id: u32, info: &mut JoyInfoEx) -> Result<(), DriverError> {
            match self.0.lock().unwrap().pop_front().flatten() {
                Some((gas, brake, clutch)) => {
                    info.y_pos = gas;
                    info.x_pos = brake;
                    info.r_pos = clutch;
                    Ok(())
                }
                None => Err(DriverError::Code(167)),
            }
        }
    }

    struct CountingEncoder(Arc<AtomicUsize>);

    impl FrameEncoder for CountingEncoder {
        fn encode(&mut self, envelope: &FrameEnvelope<'_>) -> Result<String, DistributorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            JsonFrameEncoder.encode(envelope)
        }
    }

    fn config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.device.joystick_id = Some(0);
        config.device.raw_data = true;
        config.monitor_clutch = true;
        config.monitor_gas = true;
        config
    }

    fn processor(
        reads: Vec<Option<(u32, u32, u32)>>,
        encodes: Arc<AtomicUsize>,
    ) -> (TickProcessor, crate::telemetry::DistributorHandle) {
        let config = config();
        let poller = DevicePoller::new(
            Box::new(Scripted(Arc::new(Mutex::new(reads.into())))),
            DeviceSelector::Id(0),
            AxisMap {
                gas: AxisSource::Y,
                brake: AxisSource::X,
                clutch: AxisSource::R,
            },
            true,
            Duration::from_secs(1),
        );
        let (distributor, handle) = FrameDistributor::new(Box::new(CountingEncoder(encodes)), 4);
        let processor = TickProcessor::new(config, poller, distributor, AlertSink::disabled(), Instant::now());
        (processor, handle)
    }

    fn run(processor: &mut TickProcessor, ticks: usize) -> Vec<Arc<TelemetryFrame>> {
        let t0 = Instant::now();
        (0..ticks)
            .map(|i| processor.tick(t0 + Duration::from_secs(i as u64), LoopTiming::default()))
            .collect()
    }

    #[test]
    fn sequence_increases_by_one_per_tick() {
        let reads = vec![Some((1023, 1023, 1023)); 5];
        let (mut processor, _handle) = processor(reads, Arc::default());
        let frames = run(&mut processor, 5);
        let sequences: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn no_subscribers_means_no_encoding_but_pull_slot_follows() {
        let encodes = Arc::new(AtomicUsize::new(0));
        let (mut processor, handle) = processor(vec![Some((1023, 1023, 1023)); 3], encodes.clone());
        run(&mut processor, 3);
        assert_eq!(encodes.load(Ordering::SeqCst), 0);
        assert_eq!(handle.latest().map(|f| f.sequence), Some(3));
    }

    #[test]
    fn disconnect_latches_and_reconnect_is_reported_once() {
        let reads = vec![
            Some((1023, 1023, 1023)),
            None,
            None,
            None,
            Some((1023, 1023, 1023)),
            Some((1023, 1023, 1023)),
        ];
        let (mut processor, _handle) = processor(reads, Arc::default());
        let frames = run(&mut processor, 6);

        let disconnected: Vec<u8> = frames.iter().map(|f| f.controller_disconnected).collect();
        let reconnected: Vec<u8> = frames.iter().map(|f| f.controller_reconnected).collect();
        assert_eq!(disconnected, vec![0, 1, 1, 1, 0, 0]);
        assert_eq!(reconnected, vec![0, 0, 0, 0, 1, 0]);
        assert_eq!(frames[2].gas_value, 0);
        assert_eq!(processor.summary().reconnects, 1);
        assert_eq!(processor.summary().poll_failures, 3);
    }

    #[test]
    fn detectors_run_only_on_successful_polls() {
        // Inverted raw 1000 on the clutch is 23 units: stuck and non-zero. Gas raw 1023
        // is 0 after inversion, so the clutch gate is open.
        let reads = vec![
            Some((1023, 1023, 1000)),
            Some((1023, 1023, 1000)),
            None,
            Some((1023, 1023, 1000)),
            Some((1023, 1023, 1000)),
            Some((1023, 1023, 1000)),
        ];
        let (mut processor, _handle) = processor(reads, Arc::default());
        let frames = run(&mut processor, 6);

        // Without the reset on reconnect the fourth good poll would alert.
        let alerts: Vec<u8> = frames.iter().map(|f| f.clutch_alert).collect();
        assert_eq!(alerts, vec![0, 0, 0, 0, 0, 0]);
        assert_eq!(frames[1].clutch_repeat_count, 2);
        assert_eq!(frames[5].clutch_repeat_count, 3);
    }

    #[test]
    fn iterations_limit_stops_loop_and_cancels() {
        let (processor, handle) = processor(vec![Some((1023, 1023, 1023)); 10], Arc::default());
        let cancel = CancellationToken::new();
        let summary = run_tick_loop(processor, Duration::from_millis(1), 3, cancel.clone());

        assert_eq!(summary.ticks, 3);
        assert!(cancel.is_cancelled());
        assert_eq!(handle.latest().map(|f| f.sequence), Some(3));
        assert!(handle.subscribe().is_err());
    }

    #[test]
    fn cancelled_loop_runs_no_ticks() {
        let (processor, _handle) = processor(Vec::new(), Arc::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = run_tick_loop(processor, Duration::from_millis(1), 0, cancel);
        assert_eq!(summary.ticks, 0);
    }
}
