//! # metro-hub: Metrolink broadcast server
//!
//! Samples a [`metro_clock::TempoClockProvider`] at a fixed rate and pushes
//! the resulting transport snapshot to every connected WebSocket client.
//!
//! ## Components
//!
//! - [`ClockSampler`]: periodic provider read -> [`metro_core::StateSnapshot`]
//! - [`BroadcastHub`]: serialize once, fan out to every client queue
//! - [`CommandHandler`]: `start` / `stop` / `set_tempo` from clients
//! - [`ConnectionManager`]: accept, handshake, keepalive, close
//! - [`MetroServer`]: wiring and ordered shutdown
//! - [`MetroConfigFile`] / [`MetroConfig`]: JSON config and its validated form

pub mod commands;
pub mod config;
pub mod connection;
pub mod hub;
pub mod protocol;
pub mod sampler;
pub mod server;

pub use commands::*;
pub use config::*;
pub use connection::*;
pub use hub::*;
pub use protocol::*;
pub use sampler::*;
pub use server::*;
