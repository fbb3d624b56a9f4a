//! Client wire protocol
//!
//! Inbound (client -> server) JSON objects, tagged by `type`:
//!
//! ```text
//! { "type": "start" }
//! { "type": "stop" }
//! { "type": "set_tempo", "bpm": 140 }      // number
//! { "type": "set_tempo", "bpm": "98.5" }   // or numeric string
//! ```
//!
//! Outbound messages are serialized [`metro_core::StateSnapshot`]s.

use metro_core::{MetroResult, parse_tempo, validate_tempo};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message types the server understands
const KNOWN_TYPES: [&str; 3] = ["start", "stop", "set_tempo"];

/// Tempo as sent by a client: JSON number or numeric string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TempoValue {
    Number(f64),
    Text(String),
}

impl TempoValue {
    /// Parse and range-check the requested tempo.
    pub fn resolve(&self) -> MetroResult<f64> {
        match self {
            Self::Number(bpm) => validate_tempo(*bpm),
            Self::Text(text) => parse_tempo(text),
        }
    }
}

/// Transport command sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start the shared transport
    Start,

    /// Stop the shared transport
    Stop,

    /// Change the shared tempo
    SetTempo {
        /// Requested tempo in BPM
        bpm: TempoValue,
    },
}

impl ClientCommand {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::SetTempo { .. } => "set_tempo",
        }
    }
}

/// Why an inbound message could not be turned into a command
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("message has no string `type` field")]
    MissingType,

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("bad payload for '{kind}': {reason}")]
    BadPayload { kind: String, reason: String },
}

/// Parse one inbound text frame.
pub fn parse_command(text: &str) -> Result<ClientCommand, ParseError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingType)?
        .to_string();

    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(ParseError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| ParseError::BadPayload {
        kind,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_stop() {
        assert_eq!(parse_command(r#"{"type":"start"}"#).unwrap(), ClientCommand::Start);
        assert_eq!(parse_command(r#"{"type":"stop"}"#).unwrap(), ClientCommand::Stop);
    }

    #[test]
    fn test_parse_extra_fields_tolerated() {
        let cmd = parse_command(r#"{"type":"start","client":"pad-2"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Start);
    }

    #[test]
    fn test_parse_set_tempo_number_and_string() {
        let cmd = parse_command(r#"{"type":"set_tempo","bpm":140}"#).unwrap();
        assert_eq!(cmd, ClientCommand::SetTempo { bpm: TempoValue::Number(140.0) });

        let cmd = parse_command(r#"{"type":"set_tempo","bpm":"98.5"}"#).unwrap();
        match cmd {
            ClientCommand::SetTempo { bpm } => assert_eq!(bpm.resolve().unwrap(), 98.5),
            other => panic!("Expected SetTempo, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_command("not json"), Err(ParseError::InvalidJson(_))));
        assert_eq!(parse_command(r#"{"bpm":120}"#), Err(ParseError::MissingType));
        assert_eq!(parse_command(r#"{"type":7}"#), Err(ParseError::MissingType));
        assert_eq!(
            parse_command(r#"{"type":"rewind"}"#),
            Err(ParseError::UnknownType("rewind".into()))
        );
        assert!(matches!(
            parse_command(r#"{"type":"set_tempo"}"#),
            Err(ParseError::BadPayload { .. })
        ));
        assert!(matches!(
            parse_command(r#"{"type":"set_tempo","bpm":null}"#),
            Err(ParseError::BadPayload { .. })
        ));
    }

    #[test]
    fn test_tempo_value_resolve() {
        assert!(TempoValue::Number(19.9).resolve().is_err());
        assert!(TempoValue::Number(300.1).resolve().is_err());
        assert_eq!(TempoValue::Number(20.0).resolve().unwrap(), 20.0);
        assert_eq!(TempoValue::Text("300".into()).resolve().unwrap(), 300.0);
        assert!(TempoValue::Text("allegro".into()).resolve().is_err());
    }

    #[test]
    fn test_command_names() {
        assert_eq!(ClientCommand::Start.name(), "start");
        assert_eq!(
            ClientCommand::SetTempo { bpm: TempoValue::Number(1.0) }.name(),
            "set_tempo"
        );
    }
}
