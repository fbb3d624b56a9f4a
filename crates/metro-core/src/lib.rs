//! metro-core: Shared types for Metrolink
//!
//! Pure, allocation-light building blocks used by the clock providers and the
//! broadcast hub:
//! - [`Quantum`] and [`calculate_position`]: raw beat -> bar/beat/phase
//! - Tempo limits shared by commands, configuration and MIDI clock estimates
//! - [`StateSnapshot`]: the record sent to every client

mod error;
mod position;
mod snapshot;
mod tempo;

pub use error::*;
pub use position::*;
pub use snapshot::*;
pub use tempo::*;
