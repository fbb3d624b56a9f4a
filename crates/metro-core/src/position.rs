//! Musical position from a raw beat counter
//!
//! A clock provider reports a continuously increasing, real-valued beat
//! counter. This module folds it into a bar/beat/phase position for a given
//! quantum (beats per bar):
//!
//! ```text
//! raw beat   0.0   1.0   2.0   3.0   4.0   5.0 ...   7.25      8.0
//! position   1.1   1.2   1.3   1.4   2.1   2.2 ...   2.4       3.1
//! phase      0.0   0.0   0.0   0.0   0.0   0.0 ...   0.25      0.0
//! ```

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::{MetroError, MetroResult};

// ═══════════════════════════════════════════════════════════════════════════════
// QUANTUM
// ═══════════════════════════════════════════════════════════════════════════════

/// Beats per bar. Zero is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantum(NonZeroU32);

impl Quantum {
    /// Common time: four beats per bar
    pub const FOUR: Self = Self(NonZeroU32::MIN.saturating_add(3));

    /// Validate a beats-per-bar value.
    pub fn new(beats: u32) -> MetroResult<Self> {
        NonZeroU32::new(beats)
            .map(Self)
            .ok_or(MetroError::InvalidQuantum(beats))
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0.get() as f64
    }
}

impl Default for Quantum {
    fn default() -> Self {
        Self::FOUR
    }
}

impl TryFrom<u32> for Quantum {
    type Error = MetroError;

    fn try_from(beats: u32) -> Result<Self, Self::Error> {
        Self::new(beats)
    }
}

impl From<Quantum> for u32 {
    fn from(quantum: Quantum) -> Self {
        quantum.get()
    }
}

impl fmt::Display for Quantum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MUSICAL POSITION
// ═══════════════════════════════════════════════════════════════════════════════

/// Bar/beat/phase position (bar and beat are 1-indexed)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MusicalPosition {
    /// Bar number, starting at 1
    pub bar: u64,
    /// Beat within the bar, in `[1, quantum]`
    pub beat_in_bar: u32,
    /// Fractional progress through the current beat, in `[0, 1)`
    pub phase: f64,
}

impl MusicalPosition {
    /// First beat of a bar
    #[inline]
    pub fn is_downbeat(&self) -> bool {
        self.beat_in_bar == 1
    }
}

/// Wire format: "bar.beat" (e.g. "3.1")
impl fmt::Display for MusicalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.bar, self.beat_in_bar)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALCULATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Map a raw beat counter onto a bar/beat/phase position.
///
/// Negative and non-finite beats are treated as beat zero; a provider may
/// report slightly negative values right after a session is joined.
pub fn calculate_position(raw_beat: f64, quantum: Quantum) -> MusicalPosition {
    let raw_beat = if raw_beat.is_finite() { raw_beat.max(0.0) } else { 0.0 };

    let whole = raw_beat.floor();
    let phase = raw_beat - whole;

    // Bar and beat both derive from the integral beat so they can never
    // disagree near a bar line.
    let whole_beats = whole as u64;
    let q = quantum.get() as u64;

    MusicalPosition {
        bar: whole_beats / q + 1,
        beat_in_bar: (whole_beats % q) as u32 + 1,
        phase: if phase < 1.0 { phase } else { 0.0 },
    }
}
