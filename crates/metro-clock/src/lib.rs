//! # metro-clock: Tempo clock providers
//!
//! Everything Metrolink knows about where the beat is comes from a
//! [`TempoClockProvider`]:
//!
//! - [`InternalClock`]: free-running software clock (default)
//! - [`ManualClock`]: hand-driven clock for tests and demos
//! - `MidiClockFollower`: external MIDI clock master (feature `midi`)
//! - `LinkClock`: Ableton Link session (feature `link`)

pub mod internal;
#[cfg(feature = "link")]
pub mod link;
pub mod manual;
pub mod midi;
pub mod provider;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use metro_core::Quantum;
use serde::{Deserialize, Serialize};

pub use internal::InternalClock;
#[cfg(feature = "link")]
pub use link::LinkClock;
pub use manual::ManualClock;
#[cfg(feature = "midi")]
pub use midi::MidiClockFollower;
pub use midi::MidiClockState;
pub use provider::*;

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER SELECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Which clock backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Internal,
    Midi,
    Link,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Midi => "midi",
            Self::Link => "link",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "internal" => Ok(Self::Internal),
            "midi" => Ok(Self::Midi),
            "link" => Ok(Self::Link),
            other => Err(format!(
                "unknown clock provider '{other}' (expected internal, midi or link)"
            )),
        }
    }
}

/// Everything needed to open a provider
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub kind: ProviderKind,
    pub quantum: Quantum,
    pub initial_bpm: f64,
    /// Substring of the MIDI port name to follow
    pub midi_port: String,
}

/// Open the configured clock backend.
pub fn open_provider(options: &ProviderOptions) -> ProviderResult<Arc<dyn TempoClockProvider>> {
    match options.kind {
        ProviderKind::Internal => Ok(Arc::new(InternalClock::new(
            options.initial_bpm,
            options.quantum,
        ))),
        ProviderKind::Midi => open_midi(options),
        ProviderKind::Link => open_link(options),
    }
}

#[cfg(feature = "midi")]
fn open_midi(options: &ProviderOptions) -> ProviderResult<Arc<dyn TempoClockProvider>> {
    Ok(Arc::new(MidiClockFollower::open(&options.midi_port, options.quantum)?))
}

#[cfg(not(feature = "midi"))]
fn open_midi(_options: &ProviderOptions) -> ProviderResult<Arc<dyn TempoClockProvider>> {
    Err(ProviderError::Init(
        "MIDI clock support not compiled in (enable the `midi` feature)".into(),
    ))
}

#[cfg(feature = "link")]
fn open_link(options: &ProviderOptions) -> ProviderResult<Arc<dyn TempoClockProvider>> {
    Ok(Arc::new(LinkClock::enable(options.initial_bpm, options.quantum)?))
}

#[cfg(not(feature = "link"))]
fn open_link(_options: &ProviderOptions) -> ProviderResult<Arc<dyn TempoClockProvider>> {
    Err(ProviderError::Init(
        "Ableton Link support not compiled in (enable the `link` feature)".into(),
    ))
}
