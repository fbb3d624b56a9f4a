//! Transport state snapshot pushed to every client

use serde::{Deserialize, Serialize};

use crate::position::{Quantum, calculate_position};
use crate::tempo::round_bpm;
use crate::MetroResult;

/// Diagnostic block appended when debug payloads are enabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDebug {
    /// Unrounded provider tempo
    pub tempo: f64,
    /// Raw beat counter as read from the provider
    pub raw_beat: f64,
    /// Peers in the clock session
    pub num_peers: u64,
}

/// One immutable, fully computed transport state record.
///
/// Built from a single provider read; every client connected at that moment
/// receives the same serialized bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    position: String,
    bpm: u32,
    is_downbeat: bool,
    transport_running: bool,
    timestamp: f64,
    phase: f64,
    quantum: Quantum,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    debug: Option<SnapshotDebug>,
}

impl StateSnapshot {
    /// Build a snapshot from one provider read.
    pub fn new(raw_beat: f64, quantum: Quantum, bpm: f64, is_playing: bool, timestamp: f64) -> Self {
        let position = calculate_position(raw_beat, quantum);

        Self {
            position: position.to_string(),
            bpm: round_bpm(bpm),
            is_downbeat: position.is_downbeat(),
            transport_running: is_playing,
            timestamp,
            phase: position.phase,
            quantum,
            debug: None,
        }
    }

    /// Attach the diagnostic block.
    pub fn with_debug(mut self, debug: SnapshotDebug) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn is_downbeat(&self) -> bool {
        self.is_downbeat
    }

    pub fn transport_running(&self) -> bool {
        self.transport_running
    }

    /// Wall-clock seconds since the Unix epoch at sample time
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn quantum(&self) -> Quantum {
        self.quantum
    }

    pub fn debug(&self) -> Option<&SnapshotDebug> {
        self.debug.as_ref()
    }

    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> MetroResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn timestamp_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
