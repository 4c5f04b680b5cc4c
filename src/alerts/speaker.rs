use std::process::Command;
use tracing::{debug, info};

use super::AlertError;

/// Speech backend. Runs on the speech thread and may block for a whole utterance.
pub trait Speaker: Send {
    fn speak(&mut self, phrase: &str) -> Result<(), AlertError>;
}

/// Writes phrases to the log only.
#[derive(Debug, Default)]
pub struct LogSpeaker;

impl Speaker for LogSpeaker {
    fn speak(&mut self, phrase: &str) -> Result<(), AlertError> {
        info!("[alert] {}", phrase);
        Ok(())
    }
}

/// Runs an external program with the phrase appended as its last argument, e.g.
/// `["powershell.exe", "-File", "say.ps1"]` or `["espeak"]`.
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
}

impl CommandSpeaker {
    /// `None` for an empty command line.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&mut self, phrase: &str) -> Result<(), AlertError> {
        info!("[alert] {}", phrase);
        debug!("Running {} {:?} {:?}", self.program, self.args, phrase);
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(phrase)
            .status()
            .map_err(|source| AlertError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(AlertError::Failed {
                program: self.program.clone(),
                status: status.to_string(),
            })
        }
    }
}

/// Speaker for the configured command, falling back to the log.
pub fn speaker_from_command(command: &[String]) -> Box<dyn Speaker> {
    match CommandSpeaker::from_command(command) {
        Some(speaker) => Box::new(speaker),
        None => Box::new(LogSpeaker),
    }
}
