//! Spoken alerts.
//!
//! The tick loop turns detector events into [`AlertEvent`]s and hands their phrases
//! to an [`AlertSink`]. A [`SpeechWorker`] thread drains the sink into a [`Speaker`],
//! so a slow text-to-speech backend never delays a tick.

mod sink;
mod speaker;

pub use sink::{AlertSink, SpeechWorker};
pub use speaker::{speaker_from_command, CommandSpeaker, LogSpeaker, Speaker};

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Failed to start speech thread: {0}")]
    Thread(#[source] std::io::Error),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertEvent {
    ClutchNoise,
    GasDrift { percent_reached: u8 },
    DeadzoneEstimate { percent: u8 },
    ControllerDisconnected,
    ControllerReconnected,
}

impl AlertEvent {
    pub fn phrase(&self) -> String {
        match self {
            AlertEvent::ClutchNoise => "Clutch noise.".to_string(),
            AlertEvent::GasDrift { percent_reached } => format!("Gas {percent_reached} percent."),
            AlertEvent::DeadzoneEstimate { percent } => format!("New deadzone estimation: {percent}"),
            AlertEvent::ControllerDisconnected => "Controller disconnected.".to_string(),
            AlertEvent::ControllerReconnected => "Controller found. Resuming monitoring.".to_string(),
        }
    }
}
