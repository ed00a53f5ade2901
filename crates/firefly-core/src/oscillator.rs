// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Oscillator
// ─────────────────────────────────────────────────────────────────────
//! One firefly: phase state, neighbor signal bookkeeping, and the
//! Kuramoto phase adjustment.
//!
//! # Concurrency
//!
//! - `neighbor signals + dirty` sit behind one `parking_lot::Mutex`. It is
//!   held only to write a signal and to snapshot-and-clear at the start
//!   of an adjustment; the trigonometric pass runs on the copy.
//! - The phase is an `AtomicU64` holding `f64` bits. Readers (renderers,
//!   neighbors sampling it) never lock; adjustments commit with a
//!   compare-and-swap so two concurrent adjustments cannot lose an update.
//! - Clearing `dirty` under the same lock as the snapshot means a signal
//!   that lands mid-adjustment re-arms `dirty` for the next tick.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rand::Rng;

use firefly_physics::{
    flash_activity, flash_coupling_delta, sampled_activity, sampled_coupling_delta,
    self_flash_time, wrap_phase, NEIGHBORS_PER_CELL,
};
use firefly_types::{CouplingFamily, OscillatorId, SyncConfig, SyncError, SyncResult};

use crate::link::NeighborLink;

#[derive(Debug, Default)]
struct SignalState {
    signals: BTreeMap<OscillatorId, f64>,
    dirty: bool,
    attached: bool,
}

pub struct Oscillator {
    id: OscillatorId,
    frequency_hz: f64,
    coupling: f64,
    family: CouplingFamily,
    phase: AtomicU64,
    state: Mutex<SignalState>,
    links: OnceLock<Vec<Arc<dyn NeighborLink>>>,
}

impl Oscillator {
    /// Create an unwired oscillator. Sampled-family phases are wrapped to
    /// [0, 2π) immediately.
    pub fn new(id: OscillatorId, config: &SyncConfig, initial_phase: f64) -> SyncResult<Self> {
        config.validate()?;
        if !initial_phase.is_finite() {
            return Err(SyncError::Config(format!(
                "initial phase of {id} must be finite, got {initial_phase}"
            )));
        }
        let phase = match config.family {
            CouplingFamily::Flash { .. } => initial_phase,
            CouplingFamily::Sampled { .. } => wrap_phase(initial_phase),
        };
        Ok(Self {
            id,
            frequency_hz: config.frequency_hz,
            coupling: config.coupling,
            family: config.family,
            phase: AtomicU64::new(phase.to_bits()),
            state: Mutex::new(SignalState::default()),
            links: OnceLock::new(),
        })
    }

    /// Create an unwired oscillator with a phase drawn uniformly from [0, 2π).
    pub fn with_random_phase<R: Rng>(
        id: OscillatorId,
        config: &SyncConfig,
        rng: &mut R,
    ) -> SyncResult<Self> {
        Self::new(id, config, rng.gen_range(0.0..TAU))
    }

    pub fn id(&self) -> OscillatorId {
        self.id
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn coupling(&self) -> f64 {
        self.coupling
    }

    pub fn family(&self) -> CouplingFamily {
        self.family
    }

    /// Current phase (unbounded for flash, [0, 2π) for sampled).
    pub fn phase(&self) -> f64 {
        f64::from_bits(self.phase.load(Ordering::Acquire))
    }

    /// Wire the oscillator to its neighbors. Allowed exactly once.
    ///
    /// Links back to this oscillator are dropped and duplicate neighbor
    /// identities collapse into one entry, so a 2×2 torus ends up with two
    /// neighbors and a 1×1 torus with none. Every neighbor starts with the
    /// signal this oscillator would itself emit, which contributes nothing
    /// to the first adjustment.
    pub fn attach_neighbors(&self, links: Vec<Arc<dyn NeighborLink>>) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.attached {
            return Err(SyncError::AlreadyAttached(self.id));
        }

        let mut kept: Vec<Arc<dyn NeighborLink>> = Vec::with_capacity(links.len());
        for link in links {
            let neighbor = link.neighbor_id();
            if neighbor == self.id || kept.iter().any(|k| k.neighbor_id() == neighbor) {
                continue;
            }
            kept.push(link);
        }
        if kept.len() > NEIGHBORS_PER_CELL {
            return Err(SyncError::Config(format!(
                "oscillator {} got {} distinct neighbors, at most {NEIGHBORS_PER_CELL} allowed",
                self.id,
                kept.len()
            )));
        }

        let default = self.default_signal(self.phase());
        state.signals = kept.iter().map(|l| (l.neighbor_id(), default)).collect();
        state.dirty = false;
        state.attached = true;
        log::debug!(
            "oscillator {} attached to {} neighbors",
            self.id,
            state.signals.len()
        );
        // Guarded by `attached` under the lock, so this is the only set.
        let _ = self.links.set(kept);
        Ok(())
    }

    /// Outgoing links, empty until `attach_neighbors`.
    pub fn neighbors(&self) -> &[Arc<dyn NeighborLink>] {
        self.links.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors().len()
    }

    /// Activity in [-1, 1] at time `now` (seconds).
    pub fn compute_activity(&self, now: f64) -> f64 {
        let phase = self.phase();
        match self.family {
            CouplingFamily::Flash { .. } => flash_activity(self.frequency_hz, phase, now),
            CouplingFamily::Sampled { .. } => sampled_activity(self.frequency_hz, phase, now),
        }
    }

    pub fn is_flashing(&self, now: f64) -> bool {
        let activity = self.compute_activity(now);
        match self.family {
            CouplingFamily::Flash { threshold } => activity > threshold,
            CouplingFamily::Sampled { .. } => activity >= 0.0,
        }
    }

    /// Record the latest signal from `from` and mark the oscillator dirty.
    ///
    /// Unknown senders and non-finite values are rejected so the signal map
    /// keeps exactly one finite entry per neighbor.
    pub fn receive_signal(&self, from: OscillatorId, value: f64) -> SyncResult<()> {
        if !value.is_finite() {
            return Err(SyncError::Numerical(format!(
                "signal from {from} to {} is not finite: {value}",
                self.id
            )));
        }
        let mut state = self.state.lock();
        match state.signals.get_mut(&from) {
            Some(slot) => *slot = value,
            None => {
                return Err(SyncError::UnknownNeighbor {
                    receiver: self.id,
                    sender: from,
                })
            }
        }
        state.dirty = true;
        Ok(())
    }

    /// Kuramoto update from the current neighbor signals.
    ///
    /// Returns the applied phase delta; 0 when there are no neighbors.
    pub fn adjust_phase(&self) -> SyncResult<f64> {
        let samples: Vec<f64> = {
            let mut state = self.state.lock();
            state.dirty = false;
            state.signals.values().copied().collect()
        };
        if samples.is_empty() {
            return Ok(0.0);
        }

        let mut applied = 0.0;
        let committed = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let (delta, next) = self.next_phase(f64::from_bits(bits), &samples);
                if !next.is_finite() {
                    return None;
                }
                applied = delta;
                Some(next.to_bits())
            });

        match committed {
            Ok(_) => {
                log::trace!("oscillator {} adjusted phase by {applied:.6}", self.id);
                Ok(applied)
            }
            Err(bits) => Err(SyncError::Numerical(format!(
                "phase update of {} from {} is not finite",
                self.id,
                f64::from_bits(bits)
            ))),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Copy of the neighbor signal map, ordered by neighbor id.
    pub fn signal_snapshot(&self) -> Vec<(OscillatorId, f64)> {
        self.state
            .lock()
            .signals
            .iter()
            .map(|(&id, &v)| (id, v))
            .collect()
    }

    fn next_phase(&self, phase: f64, samples: &[f64]) -> (f64, f64) {
        match self.family {
            CouplingFamily::Flash { threshold } => {
                let delta = flash_coupling_delta(
                    self.frequency_hz,
                    threshold,
                    self.coupling,
                    phase,
                    samples,
                );
                (delta, phase + delta)
            }
            CouplingFamily::Sampled { .. } => {
                let delta = sampled_coupling_delta(self.coupling, phase, samples);
                (delta, wrap_phase(phase + delta))
            }
        }
    }

    fn default_signal(&self, phase: f64) -> f64 {
        match self.family {
            CouplingFamily::Flash { threshold } => {
                self_flash_time(self.frequency_hz, threshold, phase)
            }
            CouplingFamily::Sampled { .. } => phase,
        }
    }
}

impl fmt::Debug for Oscillator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Oscillator")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("frequency_hz", &self.frequency_hz)
            .field("coupling", &self.coupling)
            .field("family", &self.family)
            .field("neighbors", &self.neighbor_count())
            .finish()
    }
}
