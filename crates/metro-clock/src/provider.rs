//! Tempo clock provider interface
//!
//! The broadcast core only ever talks to a clock through this trait: one
//! consistent read, two mutators, and a change-event subscription. Concrete
//! providers own their internal consistency; the core never locks around them.

use std::fmt;

use metro_core::Quantum;
use tokio::sync::broadcast;

/// Capacity of each provider's event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// One consistent read of a provider's state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockState {
    /// Continuously increasing beat counter
    pub raw_beat: f64,
    /// Phase as reported by the provider (within the quantum for Link)
    pub phase: f64,
    /// Current tempo in BPM
    pub bpm: f64,
    /// Transport running
    pub is_playing: bool,
    /// Other participants in the clock session
    pub num_peers: u64,
}

/// Change notification emitted by a provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProviderEvent {
    TempoChanged(f64),
    PeersChanged(u64),
    PlayStateChanged(bool),
}

impl fmt::Display for ProviderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TempoChanged(bpm) => write!(f, "tempo changed to {bpm:.2}"),
            Self::PeersChanged(peers) => write!(f, "peers changed to {peers}"),
            Self::PlayStateChanged(playing) => write!(f, "play state changed to {playing}"),
        }
    }
}

/// Provider errors
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Clock unavailable: {0}")]
    Unavailable(String),

    #[error("Operation not supported by {provider} clock: {operation}")]
    Unsupported {
        provider: &'static str,
        operation: &'static str,
    },

    #[error("Clock initialization failed: {0}")]
    Init(String),

    #[error("Clock write failed: {0}")]
    Write(String),
}

/// Result type alias
pub type ProviderResult<T> = Result<T, ProviderError>;

// ═══════════════════════════════════════════════════════════════════════════════
// TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// A shared tempo/transport clock
pub trait TempoClockProvider: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Beats per bar used for position and phase
    fn quantum(&self) -> Quantum;

    /// Read the whole clock state at once.
    fn capture(&self) -> ProviderResult<ClockState>;

    /// Change the session tempo.
    fn set_bpm(&self, bpm: f64) -> ProviderResult<()>;

    /// Start or stop the transport.
    fn set_is_playing(&self, playing: bool) -> ProviderResult<()>;

    /// Subscribe to tempo, peer and play-state changes.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;

    /// Detach from the clock backend. Called once, after sampling has stopped.
    fn disable(&self) {}

    fn raw_beat(&self) -> ProviderResult<f64> {
        self.capture().map(|s| s.raw_beat)
    }

    fn phase(&self) -> ProviderResult<f64> {
        self.capture().map(|s| s.phase)
    }

    fn bpm(&self) -> ProviderResult<f64> {
        self.capture().map(|s| s.bpm)
    }

    fn is_playing(&self) -> ProviderResult<bool> {
        self.capture().map(|s| s.is_playing)
    }

    fn num_peers(&self) -> ProviderResult<u64> {
        self.capture().map(|s| s.num_peers)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT BUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Multi-subscriber event fan-out shared by the provider implementations
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProviderEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error.
    pub fn emit(&self, event: ProviderEvent) {
        log::debug!("[Clock] {}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(ProviderEvent::TempoChanged(120.0));
    }

    #[test]
    fn test_event_bus_fan_out() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(ProviderEvent::PeersChanged(3));

        assert_eq!(a.try_recv().unwrap(), ProviderEvent::PeersChanged(3));
        assert_eq!(b.try_recv().unwrap(), ProviderEvent::PeersChanged(3));
    }

    #[test]
    fn test_event_display() {
        assert_eq!(
            ProviderEvent::PlayStateChanged(true).to_string(),
            "play state changed to true"
        );
        assert_eq!(ProviderEvent::TempoChanged(140.0).to_string(), "tempo changed to 140.00");
    }
}
