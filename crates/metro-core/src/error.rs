//! Error types for Metrolink core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum MetroError {
    #[error("Invalid quantum: {0} (must be at least 1 beat per bar)")]
    InvalidQuantum(u32),

    #[error("Tempo out of range: {0} BPM")]
    TempoOutOfRange(f64),

    #[error("Invalid tempo value: {0}")]
    InvalidTempo(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type MetroResult<T> = Result<T, MetroError>;
