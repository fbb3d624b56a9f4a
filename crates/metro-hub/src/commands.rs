//! Client command handling
//!
//! Turns inbound text frames into provider writes. Nothing is ever sent back
//! to the client: the next broadcast is the acknowledgement.

use std::fmt;
use std::sync::Arc;

use metro_clock::TempoClockProvider;

use crate::protocol::{ClientCommand, ParseError, parse_command};

/// Why a message did not change the clock
#[derive(Debug, Clone, PartialEq)]
pub enum IgnoreReason {
    /// Not a well-formed command
    Malformed(ParseError),
    /// `set_tempo` outside 20..=300 BPM or not a number
    InvalidTempo(String),
    /// The provider refused or failed the write
    ProviderRejected(String),
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed message: {e}"),
            Self::InvalidTempo(reason) => write!(f, "invalid tempo: {reason}"),
            Self::ProviderRejected(reason) => write!(f, "provider rejected write: {reason}"),
        }
    }
}

/// Result of handling one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The provider accepted the write
    Applied(ClientCommand),
    /// Dropped; the clock is unchanged
    Ignored(IgnoreReason),
}

impl CommandOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Applies client commands to the shared clock
pub struct CommandHandler {
    provider: Arc<dyn TempoClockProvider>,
}

impl CommandHandler {
    pub fn new(provider: Arc<dyn TempoClockProvider>) -> Self {
        Self { provider }
    }

    /// Parse and apply one text frame.
    pub fn handle_text(&self, text: &str) -> CommandOutcome {
        match parse_command(text) {
            Ok(command) => self.apply(command),
            Err(e) => {
                log::debug!("[Cmd] Dropping message: {}", e);
                CommandOutcome::Ignored(IgnoreReason::Malformed(e))
            }
        }
    }

    /// Apply an already parsed command.
    pub fn apply(&self, command: ClientCommand) -> CommandOutcome {
        let result = match &command {
            ClientCommand::Start => self.provider.set_is_playing(true),
            ClientCommand::Stop => self.provider.set_is_playing(false),
            ClientCommand::SetTempo { bpm } => match bpm.resolve() {
                Ok(bpm) => self.provider.set_bpm(bpm),
                Err(e) => {
                    log::debug!("[Cmd] Ignoring set_tempo: {}", e);
                    return CommandOutcome::Ignored(IgnoreReason::InvalidTempo(e.to_string()));
                }
            },
        };

        match result {
            Ok(()) => {
                log::info!("[Cmd] Applied {}", describe(&command));
                CommandOutcome::Applied(command)
            }
            Err(e) => {
                log::warn!(
                    "[Cmd] {} clock rejected {}: {}",
                    self.provider.name(),
                    command.name(),
                    e
                );
                CommandOutcome::Ignored(IgnoreReason::ProviderRejected(e.to_string()))
            }
        }
    }
}

fn describe(command: &ClientCommand) -> String {
    match command {
        ClientCommand::SetTempo { bpm } => match bpm.resolve() {
            Ok(bpm) => format!("set_tempo {bpm:.2}"),
            Err(_) => command.name().to_string(),
        },
        other => other.name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metro_clock::ManualClock;
    use metro_core::Quantum;

    fn handler() -> (Arc<ManualClock>, CommandHandler) {
        let clock = Arc::new(ManualClock::new(Quantum::FOUR));
        let handler = CommandHandler::new(clock.clone());
        (clock, handler)
    }

    #[test]
    fn test_start_and_stop() {
        let (clock, handler) = handler();

        assert!(handler.handle_text(r#"{"type":"start"}"#).is_applied());
        assert!(clock.is_playing().unwrap());

        assert!(handler.handle_text(r#"{"type":"stop"}"#).is_applied());
        assert!(!clock.is_playing().unwrap());
    }

    #[test]
    fn test_set_tempo_applied() {
        let (clock, handler) = handler();

        assert!(handler.handle_text(r#"{"type":"set_tempo","bpm":140}"#).is_applied());
        assert_eq!(clock.bpm().unwrap(), 140.0);

        assert!(handler.handle_text(r#"{"type":"set_tempo","bpm":"98.5"}"#).is_applied());
        assert_eq!(clock.bpm().unwrap(), 98.5);
    }

    #[test]
    fn test_set_tempo_boundaries() {
        let (clock, handler) = handler();

        for bpm in ["19.9", "300.1"] {
            let outcome = handler.handle_text(&format!(r#"{{"type":"set_tempo","bpm":{bpm}}}"#));
            assert!(matches!(outcome, CommandOutcome::Ignored(IgnoreReason::InvalidTempo(_))));
            assert_eq!(clock.bpm().unwrap(), 120.0);
        }

        assert!(handler.handle_text(r#"{"type":"set_tempo","bpm":20}"#).is_applied());
        assert_eq!(clock.bpm().unwrap(), 20.0);
        assert!(handler.handle_text(r#"{"type":"set_tempo","bpm":300}"#).is_applied());
        assert_eq!(clock.bpm().unwrap(), 300.0);
    }

    #[test]
    fn test_malformed_messages_ignored() {
        let (clock, handler) = handler();

        for text in [
            "",
            "{",
            r#"{"type":"rewind"}"#,
            r#"{"type":"set_tempo"}"#,
            r#"{"type":"set_tempo","bpm":"fast"}"#,
            r#"["start"]"#,
        ] {
            let outcome = handler.handle_text(text);
            assert!(!outcome.is_applied(), "{text:?} should be ignored");
        }

        assert_eq!(clock.bpm().unwrap(), 120.0);
        assert!(!clock.is_playing().unwrap());
    }

    #[test]
    fn test_provider_failure_is_reported_not_raised() {
        let (clock, handler) = handler();
        clock.set_unavailable(true);

        let outcome = handler.handle_text(r#"{"type":"start"}"#);
        assert!(matches!(
            outcome,
            CommandOutcome::Ignored(IgnoreReason::ProviderRejected(_))
        ));
    }
}
