//! Ableton Link session clock
//!
//! Joins the Link session on the local network. Beat and phase are read at
//! the current Link clock time for the configured quantum; Link's tempo, peer
//! and start/stop callbacks are forwarded as provider events.

use metro_core::Quantum;
use parking_lot::Mutex;
use rusty_link::{AblLink, SessionState};
use tokio::sync::broadcast;

use crate::provider::{
    ClockState, EventBus, ProviderEvent, ProviderResult, TempoClockProvider,
};

/// Provider backed by an Ableton Link session
pub struct LinkClock {
    link: Mutex<AblLink>,
    quantum: Quantum,
    events: EventBus,
}

impl LinkClock {
    /// Create and enable a Link instance with start/stop sync.
    pub fn enable(bpm: f64, quantum: Quantum) -> ProviderResult<Self> {
        let mut link = AblLink::new(bpm);
        let events = EventBus::new();

        let tempo_events = events.clone();
        link.set_tempo_callback(move |tempo| {
            tempo_events.emit(ProviderEvent::TempoChanged(tempo));
        });

        let peer_events = events.clone();
        link.set_num_peers_callback(move |peers| {
            peer_events.emit(ProviderEvent::PeersChanged(peers));
        });

        let play_events = events.clone();
        link.set_start_stop_callback(move |playing| {
            play_events.emit(ProviderEvent::PlayStateChanged(playing));
        });

        link.enable_start_stop_sync(true);
        link.enable(true);
        log::info!("[Link] Enabled at {:.1} BPM, quantum {}", bpm, quantum);

        Ok(Self {
            link: Mutex::new(link),
            quantum,
            events,
        })
    }

    /// Capture the app session state, apply `update`, commit it back.
    fn commit_with(&self, update: impl FnOnce(&mut SessionState, i64)) {
        let link = self.link.lock();
        let mut session = SessionState::new();
        link.capture_app_session_state(&mut session);
        let now = link.clock_micros();
        update(&mut session, now);
        link.commit_app_session_state(&session);
    }
}

impl TempoClockProvider for LinkClock {
    fn name(&self) -> &'static str {
        "link"
    }

    fn quantum(&self) -> Quantum {
        self.quantum
    }

    fn capture(&self) -> ProviderResult<ClockState> {
        let link = self.link.lock();
        let mut session = SessionState::new();
        link.capture_app_session_state(&mut session);
        let now = link.clock_micros();
        let quantum = self.quantum.as_f64();

        Ok(ClockState {
            raw_beat: session.beat_at_time(now, quantum),
            phase: session.phase_at_time(now, quantum),
            bpm: session.tempo(),
            is_playing: session.is_playing(),
            num_peers: link.num_peers(),
        })
    }

    fn set_bpm(&self, bpm: f64) -> ProviderResult<()> {
        self.commit_with(|session, now| session.set_tempo(bpm, now));
        Ok(())
    }

    fn set_is_playing(&self, playing: bool) -> ProviderResult<()> {
        self.commit_with(|session, now| session.set_is_playing(playing, now as u64));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    fn disable(&self) {
        self.link.lock().enable(false);
        log::info!("[Link] Disabled");
    }
}
