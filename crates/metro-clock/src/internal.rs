//! Internal software clock
//!
//! A free-running tempo clock for when no external session is available.
//! Beats advance only while the transport is running:
//! - `start` from stopped rewinds to beat 0 (bar 1, beat 1)
//! - `stop` freezes the position where it is
//! - tempo changes re-anchor the timeline so the beat counter stays continuous

use std::time::Instant;

use metro_core::{DEFAULT_TEMPO, Quantum};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::provider::{
    ClockState, EventBus, ProviderEvent, ProviderResult, TempoClockProvider,
};

/// Beat timeline anchored at an instant
#[derive(Debug, Clone, Copy)]
struct Timeline {
    anchor: Instant,
    beat_at_anchor: f64,
    bpm: f64,
    playing: bool,
}

impl Timeline {
    fn beat_at(&self, now: Instant) -> f64 {
        if !self.playing {
            return self.beat_at_anchor;
        }
        let elapsed = now.saturating_duration_since(self.anchor).as_secs_f64();
        self.beat_at_anchor + elapsed * self.bpm / 60.0
    }

    fn reanchor(&mut self, now: Instant) {
        self.beat_at_anchor = self.beat_at(now);
        self.anchor = now;
    }
}

/// Software tempo clock
pub struct InternalClock {
    timeline: Mutex<Timeline>,
    quantum: Quantum,
    events: EventBus,
}

impl InternalClock {
    /// Create a stopped clock at beat 0.
    pub fn new(bpm: f64, quantum: Quantum) -> Self {
        let bpm = if metro_core::is_valid_tempo(bpm) { bpm } else { DEFAULT_TEMPO };
        Self {
            timeline: Mutex::new(Timeline {
                anchor: Instant::now(),
                beat_at_anchor: 0.0,
                bpm,
                playing: false,
            }),
            quantum,
            events: EventBus::new(),
        }
    }

    fn capture_at(&self, now: Instant) -> ClockState {
        let timeline = *self.timeline.lock();
        let raw_beat = timeline.beat_at(now);
        ClockState {
            raw_beat,
            phase: raw_beat.rem_euclid(self.quantum.as_f64()),
            bpm: timeline.bpm,
            is_playing: timeline.playing,
            num_peers: 0,
        }
    }

    fn set_bpm_at(&self, bpm: f64, now: Instant) {
        let changed = {
            let mut timeline = self.timeline.lock();
            if timeline.bpm == bpm {
                false
            } else {
                timeline.reanchor(now);
                timeline.bpm = bpm;
                true
            }
        };
        if changed {
            self.events.emit(ProviderEvent::TempoChanged(bpm));
        }
    }

    fn set_is_playing_at(&self, playing: bool, now: Instant) {
        let changed = {
            let mut timeline = self.timeline.lock();
            if timeline.playing == playing {
                false
            } else {
                if playing {
                    timeline.beat_at_anchor = 0.0;
                } else {
                    timeline.reanchor(now);
                }
                timeline.anchor = now;
                timeline.playing = playing;
                true
            }
        };
        if changed {
            self.events.emit(ProviderEvent::PlayStateChanged(playing));
        }
    }
}

impl TempoClockProvider for InternalClock {
    fn name(&self) -> &'static str {
        "internal"
    }

    fn quantum(&self) -> Quantum {
        self.quantum
    }

    fn capture(&self) -> ProviderResult<ClockState> {
        Ok(self.capture_at(Instant::now()))
    }

    fn set_bpm(&self, bpm: f64) -> ProviderResult<()> {
        self.set_bpm_at(bpm, Instant::now());
        Ok(())
    }

    fn set_is_playing(&self, playing: bool) -> ProviderResult<()> {
        self.set_is_playing_at(playing, Instant::now());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    #[test]
    fn test_starts_stopped_at_origin() {
        let clock = InternalClock::new(120.0, Quantum::FOUR);
        let state = clock.capture().unwrap();
        assert!(!state.is_playing);
        assert_eq!(state.raw_beat, 0.0);
        assert_eq!(state.bpm, 120.0);
        assert_eq!(state.num_peers, 0);
    }

    #[test]
    fn test_invalid_initial_tempo_falls_back() {
        let clock = InternalClock::new(0.0, Quantum::FOUR);
        assert_eq!(clock.bpm().unwrap(), DEFAULT_TEMPO);
    }

    #[test]
    fn test_beats_advance_while_playing() {
        let clock = InternalClock::new(120.0, Quantum::FOUR);
        let t0 = Instant::now();
        clock.set_is_playing_at(true, t0);

        // 120 BPM = 2 beats per second
        let state = clock.capture_at(t0 + Duration::from_millis(1500));
        assert_relative_eq!(state.raw_beat, 3.0, epsilon = 1e-9);
        assert!(state.is_playing);
    }

    #[test]
    fn test_stop_freezes_and_start_rewinds() {
        let clock = InternalClock::new(60.0, Quantum::FOUR);
        let t0 = Instant::now();
        clock.set_is_playing_at(true, t0);
        clock.set_is_playing_at(false, t0 + Duration::from_secs(5));

        let frozen = clock.capture_at(t0 + Duration::from_secs(60));
        assert_relative_eq!(frozen.raw_beat, 5.0, epsilon = 1e-9);

        clock.set_is_playing_at(true, t0 + Duration::from_secs(61));
        let restarted = clock.capture_at(t0 + Duration::from_secs(62));
        assert_relative_eq!(restarted.raw_beat, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tempo_change_keeps_beat_continuous() {
        let clock = InternalClock::new(60.0, Quantum::FOUR);
        let t0 = Instant::now();
        clock.set_is_playing_at(true, t0);
        clock.set_bpm_at(120.0, t0 + Duration::from_secs(4));

        let state = clock.capture_at(t0 + Duration::from_secs(6));
        // 4 beats at 60 BPM, then 2 seconds at 120 BPM
        assert_relative_eq!(state.raw_beat, 8.0, epsilon = 1e-9);
        assert_relative_eq!(state.phase, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_events_only_on_change() {
        let clock = InternalClock::new(120.0, Quantum::FOUR);
        let mut rx = clock.subscribe();

        clock.set_bpm(120.0).unwrap();
        clock.set_is_playing(false).unwrap();
        assert!(rx.try_recv().is_err());

        clock.set_bpm(140.0).unwrap();
        clock.set_is_playing(true).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ProviderEvent::TempoChanged(140.0));
        assert_eq!(rx.try_recv().unwrap(), ProviderEvent::PlayStateChanged(true));
    }
}
