// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Torus Grid
// ─────────────────────────────────────────────────────────────────────
//! rows×cols oscillators on a torus, wired with in-process links.
//!
//! Two ways to drive a grid:
//! - `step` / `simulate`: every loop ticks once per call, sequentially,
//!   on the caller's thread. Deterministic for a fixed seed.
//! - `start` / `stop`: one named thread per oscillator, all reading the
//!   same clock until stopped.
//!
//! Queries (`is_flashing`, `phases`, `order_parameter`, ...) work in both
//! modes; they only read oscillator state.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use firefly_physics::{order_parameter, phase_distance};
use firefly_types::{GridConfig, GridPos, OscillatorId, SyncError, SyncResult};

use crate::clock::Clock;
use crate::link::{LocalLink, NeighborLink};
use crate::oscillator::Oscillator;
use crate::sync_loop::SyncLoop;
use crate::torus::Torus;

/// Totals over one `step` (or a whole `simulate` run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub flashes: usize,
    pub adjustments: usize,
    pub failed_exchanges: usize,
    pub errors: usize,
}

impl StepReport {
    fn merge(&mut self, other: StepReport) {
        self.flashes += other.flashes;
        self.adjustments += other.adjustments;
        self.failed_exchanges += other.failed_exchanges;
        self.errors += other.errors;
    }
}

struct Runner {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<SyncLoop>>,
}

pub struct Grid {
    config: GridConfig,
    torus: Torus,
    oscillators: Vec<Arc<Oscillator>>,
    loops: Vec<SyncLoop>,
    runner: Option<Runner>,
}

impl Grid {
    /// Build a grid with phases drawn uniformly from [0, 2π).
    ///
    /// `config.seed` makes the draw reproducible.
    pub fn new(config: GridConfig) -> SyncResult<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let phases = (0..config.cells()).map(|_| rng.gen_range(0.0..TAU)).collect();
        Self::with_phases(config, phases)
    }

    /// Build a grid with explicit initial phases in row-major order.
    pub fn with_phases(config: GridConfig, phases: Vec<f64>) -> SyncResult<Self> {
        config.validate()?;
        let torus = Torus::new(config.rows, config.cols)?;
        if phases.len() != torus.cell_count() {
            return Err(SyncError::Config(format!(
                "{}x{} grid needs {} phases, got {}",
                config.rows,
                config.cols,
                torus.cell_count(),
                phases.len()
            )));
        }

        let oscillators = phases
            .iter()
            .enumerate()
            .map(|(i, &phase)| {
                Oscillator::new(OscillatorId(i as u32), &config.sync, phase).map(Arc::new)
            })
            .collect::<SyncResult<Vec<_>>>()?;

        for (i, osc) in oscillators.iter().enumerate() {
            let links = torus
                .neighbor_indices(i)
                .iter()
                .map(|&j| Arc::new(LocalLink::new(&oscillators[j])) as Arc<dyn NeighborLink>)
                .collect();
            osc.attach_neighbors(links)?;
        }

        let tick = config.sync.tick_interval();
        let loops = oscillators
            .iter()
            .map(|osc| SyncLoop::new(osc.clone(), tick))
            .collect();

        log::info!(
            "grid {}x{} wired: {} oscillators, f={}Hz K={} {:?}",
            config.rows,
            config.cols,
            oscillators.len(),
            config.sync.frequency_hz,
            config.sync.coupling,
            config.sync.family
        );
        Ok(Self {
            config,
            torus,
            oscillators,
            loops,
            runner: None,
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn torus(&self) -> Torus {
        self.torus
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_some()
    }

    pub fn oscillators(&self) -> &[Arc<Oscillator>] {
        &self.oscillators
    }

    pub fn oscillator(&self, pos: GridPos) -> SyncResult<&Arc<Oscillator>> {
        Ok(&self.oscillators[self.torus.index(pos)?])
    }

    /// Tick every oscillator once at `now`, in row-major order.
    ///
    /// Errors from individual oscillators are logged and counted, not
    /// returned; the only error is calling this while threads run.
    pub fn step(&mut self, now: f64) -> SyncResult<StepReport> {
        if self.runner.is_some() {
            return Err(SyncError::AlreadyRunning);
        }
        let mut report = StepReport::default();
        for sync_loop in &mut self.loops {
            match sync_loop.tick(now) {
                Ok(tick) => {
                    report.flashes += usize::from(tick.flashed);
                    report.adjustments += usize::from(tick.adjusted);
                    report.failed_exchanges += tick.failed;
                }
                Err(e) => {
                    report.errors += 1;
                    log::warn!(
                        "oscillator {}: tick at {now:.3}s failed: {e}",
                        sync_loop.oscillator().id()
                    );
                }
            }
        }
        Ok(report)
    }

    /// `steps` calls of `step` at `start + k·dt`.
    pub fn simulate(&mut self, start: f64, dt: f64, steps: usize) -> SyncResult<StepReport> {
        if !(dt.is_finite() && dt > 0.0) || !start.is_finite() {
            return Err(SyncError::Config(format!(
                "simulation needs a finite start and positive dt, got start={start} dt={dt}"
            )));
        }
        let mut total = StepReport::default();
        for k in 0..steps {
            total.merge(self.step(start + k as f64 * dt)?);
        }
        Ok(total)
    }

    /// Spawn one thread per oscillator, all ticking against `clock`.
    pub fn start(&mut self, clock: Arc<dyn Clock>) -> SyncResult<()> {
        if self.runner.is_some() {
            return Err(SyncError::AlreadyRunning);
        }
        let stop = Arc::new(AtomicBool::new(false));
        let loops = std::mem::take(&mut self.loops);
        let mut handles = Vec::with_capacity(loops.len());

        for mut sync_loop in loops {
            let clock = clock.clone();
            let flag = stop.clone();
            let name = format!("firefly-{}", sync_loop.oscillator().id().0);
            let spawned = thread::Builder::new().name(name).spawn(move || {
                sync_loop.run(clock.as_ref(), &flag);
                sync_loop
            });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    log::error!("failed to spawn oscillator thread: {e}");
                    self.runner = Some(Runner { stop, handles });
                    self.stop();
                    return Err(SyncError::Io(e));
                }
            }
        }

        log::info!("grid started: {} oscillator threads", handles.len());
        self.runner = Some(Runner { stop, handles });
        Ok(())
    }

    /// Signal every thread to stop and wait for them. No-op when idle.
    pub fn stop(&mut self) {
        let Some(runner) = self.runner.take() else {
            return;
        };
        runner.stop.store(true, Ordering::SeqCst);

        let mut returned: Vec<Option<SyncLoop>> =
            (0..self.oscillators.len()).map(|_| None).collect();
        for handle in runner.handles {
            match handle.join() {
                Ok(sync_loop) => {
                    let index = sync_loop.oscillator().id().0 as usize;
                    returned[index] = Some(sync_loop);
                }
                Err(_) => log::error!("oscillator thread panicked outside its tick"),
            }
        }

        // Loops lost to a failed spawn or a dead thread restart fresh.
        let tick = self.config.sync.tick_interval();
        self.loops = self
            .oscillators
            .iter()
            .zip(returned)
            .map(|(osc, slot)| slot.unwrap_or_else(|| SyncLoop::new(osc.clone(), tick)))
            .collect();
        log::info!("grid stopped");
    }

    pub fn is_flashing(&self, pos: GridPos, now: f64) -> SyncResult<bool> {
        Ok(self.oscillator(pos)?.is_flashing(now))
    }

    /// Row-major flashing state of every cell at `now`.
    pub fn flashing_mask(&self, now: f64) -> Vec<bool> {
        self.oscillators.iter().map(|o| o.is_flashing(now)).collect()
    }

    pub fn phases(&self) -> Vec<f64> {
        self.oscillators.iter().map(|o| o.phase()).collect()
    }

    pub fn order_parameter(&self) -> f64 {
        order_parameter(&self.phases())
    }

    /// Largest circular phase gap across any torus edge.
    pub fn max_neighbor_gap(&self) -> f64 {
        let phases = self.phases();
        self.torus
            .edges()
            .map(|(a, b)| phase_distance(phases[a], phases[b]))
            .fold(0.0, f64::max)
    }
}

impl Drop for Grid {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grid")
            .field("rows", &self.torus.rows())
            .field("cols", &self.torus.cols())
            .field("running", &self.is_running())
            .finish()
    }
}
