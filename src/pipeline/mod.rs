//! Tick pipeline: poll, normalize, detect, publish, alert.

pub mod clock;
pub mod engine;
pub mod tick_loop;

pub use clock::TickClock;
pub use engine::{Configured, EngineState, Running, Stopped, TickEngine};
pub use tick_loop::{run_tick_loop, TickProcessor, TickSummary};

use crate::alerts::AlertError;
use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    #[error("Failed to spawn tick thread: {0}")]
    Thread(#[source] std::io::Error),

    #[error("Tick loop already started")]
    AlreadyStarted,

    #[error("Tick thread panicked")]
    Panicked,
}
