//! Tempo limits and validation
//!
//! Every tempo that reaches a clock provider goes through this module:
//! - Client `set_tempo` requests (silently ignored when out of range)
//! - Configured start tempo (rejected at startup when out of range)
//! - MIDI clock estimates (discarded when out of range)

use crate::{MetroError, MetroResult};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum accepted tempo (inclusive)
pub const MIN_TEMPO: f64 = 20.0;

/// Maximum accepted tempo (inclusive)
pub const MAX_TEMPO: f64 = 300.0;

/// Tempo used when nothing else is configured
pub const DEFAULT_TEMPO: f64 = 120.0;

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// True if `bpm` lies in `[MIN_TEMPO, MAX_TEMPO]`.
///
/// NaN and infinities are never in range.
#[inline]
pub fn is_valid_tempo(bpm: f64) -> bool {
    bpm.is_finite() && (MIN_TEMPO..=MAX_TEMPO).contains(&bpm)
}

/// Return `bpm` unchanged if it is in range.
pub fn validate_tempo(bpm: f64) -> MetroResult<f64> {
    if is_valid_tempo(bpm) {
        Ok(bpm)
    } else {
        Err(MetroError::TempoOutOfRange(bpm))
    }
}

/// Parse a textual tempo ("140", " 98.5 ") and validate it.
pub fn parse_tempo(text: &str) -> MetroResult<f64> {
    let bpm = text
        .trim()
        .parse::<f64>()
        .map_err(|_| MetroError::InvalidTempo(text.to_string()))?;
    validate_tempo(bpm)
}

/// Round a tempo for display on the wire.
#[inline]
pub fn round_bpm(bpm: f64) -> u32 {
    if bpm.is_finite() && bpm > 0.0 {
        bpm.round() as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tempo_bounds_inclusive() {
        assert!(is_valid_tempo(20.0));
        assert!(is_valid_tempo(300.0));
        assert!(is_valid_tempo(DEFAULT_TEMPO));
        assert!(!is_valid_tempo(19.9));
        assert!(!is_valid_tempo(300.1));
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(!is_valid_tempo(f64::NAN));
        assert!(!is_valid_tempo(f64::INFINITY));
        assert!(validate_tempo(f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn test_parse_tempo() {
        assert_eq!(parse_tempo("140").unwrap(), 140.0);
        assert_eq!(parse_tempo(" 98.5 ").unwrap(), 98.5);
        assert!(matches!(parse_tempo("fast"), Err(MetroError::InvalidTempo(_))));
        assert!(matches!(parse_tempo("301"), Err(MetroError::TempoOutOfRange(_))));
    }

    #[test]
    fn test_round_bpm() {
        assert_eq!(round_bpm(119.5), 120);
        assert_eq!(round_bpm(127.49), 127);
        assert_eq!(round_bpm(f64::NAN), 0);
    }
}
