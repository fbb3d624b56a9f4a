//! Manually driven clock
//!
//! Every value is set explicitly and every change fires the matching event,
//! which makes it the stand-in provider for hub and server tests.

use metro_core::{DEFAULT_TEMPO, Quantum};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::provider::{
    ClockState, EventBus, ProviderError, ProviderEvent, ProviderResult, TempoClockProvider,
};

#[derive(Debug, Clone, Copy)]
struct ManualState {
    raw_beat: f64,
    bpm: f64,
    playing: bool,
    peers: u64,
    unavailable: bool,
}

/// Clock whose state is set by hand
pub struct ManualClock {
    state: Mutex<ManualState>,
    quantum: Quantum,
    events: EventBus,
}

impl ManualClock {
    pub fn new(quantum: Quantum) -> Self {
        Self {
            state: Mutex::new(ManualState {
                raw_beat: 0.0,
                bpm: DEFAULT_TEMPO,
                playing: false,
                peers: 0,
                unavailable: false,
            }),
            quantum,
            events: EventBus::new(),
        }
    }

    /// Move the beat counter (no event; beats are sampled, not pushed).
    pub fn set_raw_beat(&self, raw_beat: f64) {
        self.state.lock().raw_beat = raw_beat;
    }

    /// Change the peer count and fire `PeersChanged`.
    pub fn set_num_peers(&self, peers: u64) {
        self.state.lock().peers = peers;
        self.events.emit(ProviderEvent::PeersChanged(peers));
    }

    /// Make reads and writes fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Fire an arbitrary event without touching state.
    pub fn fire(&self, event: ProviderEvent) {
        self.events.emit(event);
    }

    fn check_available(state: &ManualState) -> ProviderResult<()> {
        if state.unavailable {
            Err(ProviderError::Unavailable("manual clock marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl TempoClockProvider for ManualClock {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn quantum(&self) -> Quantum {
        self.quantum
    }

    fn capture(&self) -> ProviderResult<ClockState> {
        let state = *self.state.lock();
        Self::check_available(&state)?;
        Ok(ClockState {
            raw_beat: state.raw_beat,
            phase: state.raw_beat.rem_euclid(self.quantum.as_f64()),
            bpm: state.bpm,
            is_playing: state.playing,
            num_peers: state.peers,
        })
    }

    fn set_bpm(&self, bpm: f64) -> ProviderResult<()> {
        {
            let mut state = self.state.lock();
            Self::check_available(&state)?;
            state.bpm = bpm;
        }
        self.events.emit(ProviderEvent::TempoChanged(bpm));
        Ok(())
    }

    fn set_is_playing(&self, playing: bool) -> ProviderResult<()> {
        {
            let mut state = self.state.lock();
            Self::check_available(&state)?;
            state.playing = playing;
        }
        self.events.emit(ProviderEvent::PlayStateChanged(playing));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}
