//! Clock sampler
//!
//! Reads the provider once per tick and turns the read into a
//! [`StateSnapshot`]. A failed read skips the tick; the next tick retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metro_clock::{ClockState, ProviderResult, TempoClockProvider};
use metro_core::{SnapshotDebug, StateSnapshot, calculate_position, timestamp_now};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use crate::hub::{BroadcastHub, BroadcastReport};

/// Periodic reader of the shared clock
pub struct ClockSampler {
    provider: Arc<dyn TempoClockProvider>,
    include_debug: bool,
    /// Last known transport state, readable between samples
    transport_running: AtomicBool,
    /// Set while reads are failing, so only the first failure is a warning
    failing: AtomicBool,
    last_state: Mutex<Option<ClockState>>,
}

impl ClockSampler {
    pub fn new(provider: Arc<dyn TempoClockProvider>, include_debug: bool) -> Self {
        Self {
            provider,
            include_debug,
            transport_running: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            last_state: Mutex::new(None),
        }
    }

    /// Read the provider now.
    pub fn sample(&self) -> ProviderResult<StateSnapshot> {
        self.sample_at(timestamp_now())
    }

    /// Read the provider, stamping the snapshot with `timestamp`.
    pub fn sample_at(&self, timestamp: f64) -> ProviderResult<StateSnapshot> {
        let state = self.provider.capture()?;

        self.transport_running.store(state.is_playing, Ordering::Relaxed);
        *self.last_state.lock() = Some(state);

        let snapshot = StateSnapshot::new(
            state.raw_beat,
            self.provider.quantum(),
            state.bpm,
            state.is_playing,
            timestamp,
        );

        if self.include_debug {
            Ok(snapshot.with_debug(SnapshotDebug {
                tempo: state.bpm,
                raw_beat: state.raw_beat,
                num_peers: state.num_peers,
            }))
        } else {
            Ok(snapshot)
        }
    }

    /// Sample and publish. A failed read is logged and nothing is sent.
    pub fn sample_and_broadcast(&self, hub: &BroadcastHub) -> Option<BroadcastReport> {
        match self.sample() {
            Ok(snapshot) => {
                if self.failing.swap(false, Ordering::Relaxed) {
                    log::info!("[Sampler] {} clock readable again", self.provider.name());
                }
                Some(hub.broadcast(&snapshot))
            }
            Err(e) => {
                if self.failing.swap(true, Ordering::Relaxed) {
                    log::debug!("[Sampler] Skipping tick: {}", e);
                } else {
                    log::warn!("[Sampler] Skipping tick: {}", e);
                }
                None
            }
        }
    }

    /// Transport state as of the last successful sample
    pub fn transport_running(&self) -> bool {
        self.transport_running.load(Ordering::Relaxed)
    }

    pub fn last_state(&self) -> Option<ClockState> {
        *self.last_state.lock()
    }

    /// Sample and broadcast every `period` until `shutdown` fires.
    ///
    /// Missed ticks are skipped, never replayed in a burst. With
    /// `status_every` set, a one-line status summary is logged at that rate.
    pub async fn run(
        self: Arc<Self>,
        hub: Arc<BroadcastHub>,
        period: Duration,
        status_every: Option<Duration>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_status = Instant::now();

        log::info!(
            "[Sampler] Sampling {} clock every {:?}",
            self.provider.name(),
            period
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample_and_broadcast(&hub);

                    if let Some(every) = status_every {
                        if last_status.elapsed() >= every {
                            self.log_status(&hub);
                            last_status = Instant::now();
                        }
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        log::info!("[Sampler] Stopped");
    }

    fn log_status(&self, hub: &BroadcastHub) {
        let Some(state) = self.last_state() else {
            log::info!("[Sampler] clients={} clock=unavailable", hub.client_count());
            return;
        };
        let position = calculate_position(state.raw_beat, self.provider.quantum());
        log::info!(
            "[Sampler] clients={} peers={} tempo={:.1} transport={} position={}",
            hub.client_count(),
            state.num_peers,
            state.bpm,
            if self.transport_running() { "running" } else { "stopped" },
            position
        );
    }
}
