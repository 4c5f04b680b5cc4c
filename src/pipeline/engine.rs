//! Tick engine lifecycle.
//!
//! `Configured → Running → Stopped`, enforced at compile time with statum. The engine
//! owns the tick thread and the speech thread; network tasks talk to it only through
//! the [`DistributorHandle`] and the shared [`CancellationToken`].

use crate::alerts::{AlertSink, Speaker, SpeechWorker};
use crate::config::{ConfigError, MonitorConfig};
use crate::device::{AxisMap, DevicePoller, DeviceSelector, JoystickApi};
use crate::pipeline::tick_loop::{run_tick_loop, TickProcessor, TickSummary};
use crate::pipeline::MonitorError;
use crate::telemetry::{DistributorHandle, FrameDistributor, JsonFrameEncoder};
use statum::{machine, state};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[state]
#[derive(Debug, Clone)]
pub enum EngineState {
    Configured, // Device, detectors and distributor built
    Running,    // Tick thread alive
    Stopped,    // Threads joined, device released
}

#[machine]
pub struct TickEngine<S: EngineState> {
    interval: Duration,
    iterations: u64,
    cancel: CancellationToken,
    handle: DistributorHandle,
    processor: Option<TickProcessor>,
    speech: Option<SpeechWorker>,
    thread: Option<JoinHandle<TickSummary>>,
    summary: Option<TickSummary>,
}

impl<S: EngineState> TickEngine<S> {
    pub fn distributor(&self) -> DistributorHandle {
        self.handle.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl TickEngine<Configured> {
    /// Builds the whole pipeline from a validated configuration.
    pub fn create(
        config: MonitorConfig,
        api: Box<dyn JoystickApi>,
        speaker: Box<dyn Speaker>,
        cancel: CancellationToken,
    ) -> Result<Self, MonitorError> {
        info!("Creating tick engine");

        let selector = DeviceSelector::from_config(&config.device)
            .ok_or_else(|| ConfigError::Invalid("no device selected".into()))?;
        let poller = DevicePoller::new(
            api,
            selector,
            AxisMap::from_config(&config.device),
            config.device.raw_data,
            Duration::from_millis(config.device.reconnect_backoff_ms),
        );

        let (distributor, handle) = FrameDistributor::new(
            Box::new(JsonFrameEncoder),
            config.telemetry.backlog_frame_multiple,
        );

        let (alerts, speech) = if config.alerts.enabled {
            let (sink, worker) = SpeechWorker::spawn(speaker, config.alerts.queue_capacity)?;
            (sink, Some(worker))
        } else {
            debug!("Alerts disabled");
            (AlertSink::disabled(), None)
        };

        let interval = Duration::from_millis(config.poll_interval_ms);
        let iterations = config.iterations;
        let processor = TickProcessor::new(config, poller, distributor, alerts, Instant::now());

        Ok(Self::new(
            interval,
            iterations,
            cancel,
            handle,
            Some(processor),
            speech,
            None, // thread
            None, // summary
        ))
    }

    /// Moves the processor onto its own named thread.
    pub fn start(mut self) -> Result<TickEngine<Running>, MonitorError> {
        let processor = self.processor.take().ok_or(MonitorError::AlreadyStarted)?;
        let interval = self.interval;
        let iterations = self.iterations;
        let cancel = self.cancel.clone();

        let thread = std::thread::Builder::new()
            .name("tick-loop".into())
            .spawn(move || run_tick_loop(processor, interval, iterations, cancel))
            .map_err(MonitorError::Thread)?;
        info!("Tick thread started");

        self.thread = Some(thread);
        Ok(self.transition())
    }
}

impl TickEngine<Running> {
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stops ticking, which closes subscribers and releases the device, then joins
    /// the speech thread. Blocks; call from a blocking context.
    pub fn shutdown(mut self) -> Result<TickEngine<Stopped>, MonitorError> {
        info!("Shutting down tick engine");
        self.cancel.cancel();

        let joined = match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| {
                error!("Tick thread panicked");
                MonitorError::Panicked
            }),
            None => Ok(TickSummary::default()),
        };

        if let Some(speech) = self.speech.take() {
            speech.join();
        }

        let summary = joined?;
        info!(
            "Tick engine stopped: {} ticks, {} reconnects, {} clutch alerts, {} gas alerts",
            summary.ticks, summary.reconnects, summary.clutch_alerts, summary.gas_alerts
        );
        self.summary = Some(summary);
        Ok(self.transition())
    }
}

impl TickEngine<Stopped> {
    pub fn summary(&self) -> TickSummary {
        self.summary.unwrap_or_default()
    }
}
