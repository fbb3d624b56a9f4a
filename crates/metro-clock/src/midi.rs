// MIDI Clock Follower: tempo and transport from an external MIDI clock
//
// Follows a MIDI clock master (DAW, drum machine, loopback port):
// - Start (0xFA) rewinds and runs, Continue (0xFB) runs, Stop (0xFC) halts
// - Timing clock (0xF8) advances the pulse counter, 24 pulses per beat
// - Tempo estimated from recent pulse spacing, once per beat
// - Transport commands go back out as Start/Stop bytes on the paired port

use std::collections::VecDeque;

use metro_core::{DEFAULT_TEMPO, is_valid_tempo, round_bpm};

use crate::provider::ProviderEvent;

// ============================================================================
// CONSTANTS
// ============================================================================

/// MIDI clock pulses per quarter note
pub const PPQN: u64 = 24;

pub const MIDI_TIMING_CLOCK: u8 = 0xF8;
pub const MIDI_START: u8 = 0xFA;
pub const MIDI_CONTINUE: u8 = 0xFB;
pub const MIDI_STOP: u8 = 0xFC;

/// Pulse intervals kept for the tempo estimate (two beats)
const INTERVAL_WINDOW: usize = 48;

/// Estimates this far from the current tempo are taken as-is
const TEMPO_JUMP_BPM: f64 = 50.0;

/// Weight of a new estimate when smoothing
const TEMPO_SMOOTHING: f64 = 0.1;

// ============================================================================
// CLOCK STATE MACHINE
// ============================================================================

/// Pulse counter and tempo estimator fed by raw MIDI realtime bytes
#[derive(Debug, Clone)]
pub struct MidiClockState {
    pulse_count: u64,
    running: bool,
    bpm: f64,
    intervals: VecDeque<f64>,
    last_pulse_secs: Option<f64>,
}

impl MidiClockState {
    pub fn new() -> Self {
        Self {
            pulse_count: 0,
            running: false,
            bpm: DEFAULT_TEMPO,
            intervals: VecDeque::with_capacity(INTERVAL_WINDOW),
            last_pulse_secs: None,
        }
    }

    /// Feed one message received at `now_secs` (any monotonic origin).
    ///
    /// Returns the event to publish, if the message changed something
    /// clients should hear about immediately.
    pub fn handle_message(&mut self, data: &[u8], now_secs: f64) -> Option<ProviderEvent> {
        match *data.first()? {
            MIDI_START => {
                self.running = true;
                self.pulse_count = 0;
                self.intervals.clear();
                self.last_pulse_secs = Some(now_secs);
                Some(ProviderEvent::PlayStateChanged(true))
            }
            MIDI_CONTINUE => {
                if self.running {
                    return None;
                }
                self.running = true;
                self.last_pulse_secs = Some(now_secs);
                Some(ProviderEvent::PlayStateChanged(true))
            }
            MIDI_STOP => {
                if !self.running {
                    return None;
                }
                self.running = false;
                Some(ProviderEvent::PlayStateChanged(false))
            }
            MIDI_TIMING_CLOCK if self.running => self.handle_pulse(now_secs),
            _ => None,
        }
    }

    fn handle_pulse(&mut self, now_secs: f64) -> Option<ProviderEvent> {
        self.pulse_count += 1;

        if let Some(last) = self.last_pulse_secs {
            let diff = now_secs - last;
            if diff > 0.0 {
                if self.intervals.len() == INTERVAL_WINDOW {
                    self.intervals.pop_front();
                }
                self.intervals.push_back(diff);
            }
        }
        self.last_pulse_secs = Some(now_secs);

        if self.pulse_count % PPQN != 0 || self.intervals.is_empty() {
            return None;
        }

        let average = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
        if average <= 0.0 {
            return None;
        }

        let estimate = 60.0 / (average * PPQN as f64);
        if !is_valid_tempo(estimate) {
            return None;
        }

        let previous = round_bpm(self.bpm);
        if (estimate - self.bpm).abs() > TEMPO_JUMP_BPM {
            self.bpm = estimate;
        } else {
            self.bpm = (1.0 - TEMPO_SMOOTHING) * self.bpm + TEMPO_SMOOTHING * estimate;
        }

        (round_bpm(self.bpm) != previous).then_some(ProviderEvent::TempoChanged(self.bpm))
    }

    /// Beats since the last Start
    pub fn raw_beat(&self) -> f64 {
        self.pulse_count as f64 / PPQN as f64
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pulse_count(&self) -> u64 {
        self.pulse_count
    }
}

impl Default for MidiClockState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PORT BINDING
// ============================================================================

#[cfg(feature = "midi")]
pub use follower::MidiClockFollower;

#[cfg(feature = "midi")]
mod follower {
    use std::sync::Arc;

    use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
    use metro_core::Quantum;
    use parking_lot::Mutex;
    use tokio::sync::broadcast;

    use super::{MIDI_START, MIDI_STOP, MidiClockState};
    use crate::provider::{
        ClockState, EventBus, ProviderError, ProviderEvent, ProviderResult, TempoClockProvider,
    };

    const CLIENT_NAME: &str = "Metrolink";

    /// Provider backed by a MIDI clock input (and optional output for transport)
    pub struct MidiClockFollower {
        state: Arc<Mutex<MidiClockState>>,
        events: EventBus,
        quantum: Quantum,
        port_name: String,
        // Connections are not Sync; the mutex makes the provider shareable.
        input: Mutex<Option<MidiInputConnection<()>>>,
        output: Mutex<Option<MidiOutputConnection>>,
    }

    impl MidiClockFollower {
        /// Open the first input port whose name contains `port_filter`,
        /// plus the matching output port when one exists.
        pub fn open(port_filter: &str, quantum: Quantum) -> ProviderResult<Self> {
            let mut midi_in = MidiInput::new(CLIENT_NAME)
                .map_err(|e| ProviderError::Init(format!("Failed to create MIDI input: {}", e)))?;
            midi_in.ignore(Ignore::None);

            let in_port = midi_in
                .ports()
                .into_iter()
                .find(|p| {
                    midi_in
                        .port_name(p)
                        .map(|name| name.contains(port_filter))
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    ProviderError::Init(format!("No MIDI input port matching '{}'", port_filter))
                })?;
            let port_name = midi_in
                .port_name(&in_port)
                .unwrap_or_else(|_| port_filter.to_string());

            let state = Arc::new(Mutex::new(MidiClockState::new()));
            let events = EventBus::new();

            let cb_state = Arc::clone(&state);
            let cb_events = events.clone();
            let input = midi_in
                .connect(
                    &in_port,
                    "metrolink-clock-in",
                    move |timestamp_us, data, _| {
                        let now_secs = timestamp_us as f64 / 1_000_000.0;
                        let event = cb_state.lock().handle_message(data, now_secs);
                        if let Some(event) = event {
                            cb_events.emit(event);
                        }
                    },
                    (),
                )
                .map_err(|e| ProviderError::Init(format!("Failed to connect: {}", e)))?;

            let output = Self::open_output(port_filter);
            if output.is_none() {
                log::warn!(
                    "[MIDI] No output port matching '{}'; start/stop commands will fail",
                    port_filter
                );
            }

            log::info!("[MIDI] Following clock on: {}", port_name);

            Ok(Self {
                state,
                events,
                quantum,
                port_name,
                input: Mutex::new(Some(input)),
                output: Mutex::new(output),
            })
        }

        fn open_output(port_filter: &str) -> Option<MidiOutputConnection> {
            let midi_out = match MidiOutput::new(CLIENT_NAME) {
                Ok(m) => m,
                Err(e) => {
                    log::error!("[MIDI] Failed to create MIDI output: {}", e);
                    return None;
                }
            };

            let port = midi_out.ports().into_iter().find(|p| {
                midi_out
                    .port_name(p)
                    .map(|name| name.contains(port_filter))
                    .unwrap_or(false)
            })?;

            match midi_out.connect(&port, "metrolink-clock-out") {
                Ok(conn) => Some(conn),
                Err(e) => {
                    log::error!("[MIDI] Failed to connect output: {}", e);
                    None
                }
            }
        }

        /// Name of the followed input port
        pub fn port_name(&self) -> &str {
            &self.port_name
        }
    }

    impl TempoClockProvider for MidiClockFollower {
        fn name(&self) -> &'static str {
            "midi"
        }

        fn quantum(&self) -> Quantum {
            self.quantum
        }

        fn capture(&self) -> ProviderResult<ClockState> {
            if self.input.lock().is_none() {
                return Err(ProviderError::Unavailable("MIDI input closed".into()));
            }
            let state = self.state.lock();
            let raw_beat = state.raw_beat();
            Ok(ClockState {
                raw_beat,
                phase: raw_beat.rem_euclid(self.quantum.as_f64()),
                bpm: state.bpm(),
                is_playing: state.is_running(),
                num_peers: 0,
            })
        }

        fn set_bpm(&self, _bpm: f64) -> ProviderResult<()> {
            Err(ProviderError::Unsupported {
                provider: "midi",
                operation: "set_bpm",
            })
        }

        fn set_is_playing(&self, playing: bool) -> ProviderResult<()> {
            let mut output = self.output.lock();
            let conn = output
                .as_mut()
                .ok_or_else(|| ProviderError::Unavailable("no MIDI output port".into()))?;
            let byte = if playing { MIDI_START } else { MIDI_STOP };
            conn.send(&[byte])
                .map_err(|e| ProviderError::Write(format!("MIDI send failed: {}", e)))
        }

        fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
            self.events.subscribe()
        }

        fn disable(&self) {
            if let Some(conn) = self.input.lock().take() {
                conn.close();
            }
            if let Some(conn) = self.output.lock().take() {
                conn.close();
            }
            log::info!("[MIDI] Closed ports for {}", self.port_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Feed `beats` beats of clock at `bpm`, starting at `t0`. Returns end time.
    fn feed_clock(state: &mut MidiClockState, bpm: f64, beats: u64, t0: f64) -> (f64, Vec<ProviderEvent>) {
        let pulse = 60.0 / (bpm * PPQN as f64);
        let mut events = Vec::new();
        let mut t = t0;
        for _ in 0..beats * PPQN {
            t += pulse;
            events.extend(state.handle_message(&[MIDI_TIMING_CLOCK], t));
        }
        (t, events)
    }

    #[test]
    fn test_start_resets_and_runs() {
        let mut state = MidiClockState::new();
        assert_eq!(
            state.handle_message(&[MIDI_START], 0.0),
            Some(ProviderEvent::PlayStateChanged(true))
        );
        assert!(state.is_running());
        assert_eq!(state.pulse_count(), 0);
    }

    #[test]
    fn test_pulses_ignored_while_stopped() {
        let mut state = MidiClockState::new();
        for i in 0..48 {
            assert!(state.handle_message(&[MIDI_TIMING_CLOCK], i as f64 * 0.02).is_none());
        }
        assert_eq!(state.pulse_count(), 0);
    }

    #[test]
    fn test_raw_beat_from_pulses() {
        let mut state = MidiClockState::new();
        state.handle_message(&[MIDI_START], 0.0);
        feed_clock(&mut state, 120.0, 3, 0.0);
        for t in 0..6 {
            state.handle_message(&[MIDI_TIMING_CLOCK], 10.0 + t as f64 * 0.02);
        }
        assert_relative_eq!(state.raw_beat(), 3.25);
    }

    #[test]
    fn test_tempo_jump_taken_directly() {
        let mut state = MidiClockState::new();
        state.handle_message(&[MIDI_START], 0.0);
        let (_, events) = feed_clock(&mut state, 180.0, 1, 0.0);

        assert_relative_eq!(state.bpm(), 180.0, epsilon = 1e-6);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProviderEvent::TempoChanged(_)));
    }

    #[test]
    fn test_small_tempo_drift_is_smoothed() {
        let mut state = MidiClockState::new();
        state.handle_message(&[MIDI_START], 0.0);
        feed_clock(&mut state, 130.0, 1, 0.0);

        // 0.9 * 120 + 0.1 * 130
        assert_relative_eq!(state.bpm(), 121.0, epsilon = 1e-6);
    }

    #[test]
    fn test_out_of_range_estimate_discarded() {
        let mut state = MidiClockState::new();
        state.handle_message(&[MIDI_START], 0.0);
        feed_clock(&mut state, 400.0, 1, 0.0);
        assert_eq!(state.bpm(), DEFAULT_TEMPO);
    }

    #[test]
    fn test_stop_and_continue() {
        let mut state = MidiClockState::new();
        state.handle_message(&[MIDI_START], 0.0);
        feed_clock(&mut state, 120.0, 2, 0.0);

        assert_eq!(
            state.handle_message(&[MIDI_STOP], 1.0),
            Some(ProviderEvent::PlayStateChanged(false))
        );
        assert!(state.handle_message(&[MIDI_STOP], 1.1).is_none());

        assert_eq!(
            state.handle_message(&[MIDI_CONTINUE], 2.0),
            Some(ProviderEvent::PlayStateChanged(true))
        );
        assert_relative_eq!(state.raw_beat(), 2.0);
    }

    #[test]
    fn test_empty_and_unrelated_messages() {
        let mut state = MidiClockState::new();
        assert!(state.handle_message(&[], 0.0).is_none());
        assert!(state.handle_message(&[0x90, 60, 100], 0.0).is_none());
    }
}
