// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Synchronization Loop
// ─────────────────────────────────────────────────────────────────────
//! Per-oscillator driver: one `tick` per clock reading.
//!
//! Flash family: on the rising edge of `is_flashing` the current time is
//! broadcast to every neighbor, then the phase is adjusted if any signal
//! arrived since the last adjustment.
//!
//! Sampled family: every `1 / adjustment_hz` seconds each neighbor's
//! phase is pulled through its link and the phase is adjusted.
//!
//! A failing neighbor never stops fan-out to the others; the failure is
//! logged and counted in the `TickReport`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use firefly_types::{CouplingFamily, SyncResult};

use crate::clock::Clock;
use crate::oscillator::Oscillator;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    /// Oscillator was lit at the tick time.
    pub flashing: bool,
    /// A flash started on this tick and was broadcast.
    pub flashed: bool,
    /// Signals delivered (flash) or phases sampled (sampled).
    pub exchanged: usize,
    /// Deliveries or samples that failed.
    pub failed: usize,
    pub adjusted: bool,
    pub delta: f64,
}

pub struct SyncLoop {
    oscillator: Arc<Oscillator>,
    tick_interval: Duration,
    was_flashing: bool,
    last_adjustment: Option<f64>,
    ticks: u64,
}

impl SyncLoop {
    pub fn new(oscillator: Arc<Oscillator>, tick_interval: Duration) -> Self {
        Self {
            oscillator,
            tick_interval,
            was_flashing: false,
            last_adjustment: None,
            ticks: 0,
        }
    }

    pub fn oscillator(&self) -> &Arc<Oscillator> {
        &self.oscillator
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Ticks completed so far, including those that returned an error.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one step at time `now` (seconds).
    pub fn tick(&mut self, now: f64) -> SyncResult<TickReport> {
        self.ticks += 1;
        let osc = &self.oscillator;
        let mut report = TickReport {
            flashing: osc.is_flashing(now),
            ..TickReport::default()
        };

        match osc.family() {
            CouplingFamily::Flash { .. } => {
                if report.flashing && !self.was_flashing {
                    self.broadcast(now, &mut report);
                    report.flashed = true;
                }
                self.was_flashing = report.flashing;
                if osc.is_dirty() {
                    report.delta = osc.adjust_phase()?;
                    report.adjusted = true;
                }
            }
            CouplingFamily::Sampled { adjustment_hz } => {
                let due = self
                    .last_adjustment
                    .map_or(true, |last| now - last >= 1.0 / adjustment_hz);
                if due {
                    self.last_adjustment = Some(now);
                    self.pull_samples(&mut report);
                    report.delta = osc.adjust_phase()?;
                    report.adjusted = true;
                }
            }
        }
        Ok(report)
    }

    fn broadcast(&self, now: f64, report: &mut TickReport) {
        let id = self.oscillator.id();
        for link in self.oscillator.neighbors() {
            match link.deliver(id, now) {
                Ok(()) => report.exchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!("oscillator {id}: flash to {} failed: {e}", link.neighbor_id());
                }
            }
        }
    }

    fn pull_samples(&self, report: &mut TickReport) {
        let osc = &self.oscillator;
        for link in osc.neighbors() {
            let neighbor = link.neighbor_id();
            match link
                .sample_phase()
                .and_then(|phase| osc.receive_signal(neighbor, phase))
            {
                Ok(()) => report.exchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!("oscillator {}: sampling {neighbor} failed: {e}", osc.id());
                }
            }
        }
    }

    /// Tick against `clock` every `tick_interval` until `stop` is set.
    ///
    /// Tick errors are logged and the loop carries on. A panic inside a
    /// tick ends this loop only; other oscillators keep running.
    pub fn run(&mut self, clock: &dyn Clock, stop: &AtomicBool) {
        let id = self.oscillator.id();
        log::debug!("sync loop {id} started");
        while !stop.load(Ordering::SeqCst) {
            let now = clock.now();
            match panic::catch_unwind(AssertUnwindSafe(|| self.tick(now))) {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::warn!("oscillator {id}: tick at {now:.3}s failed: {e}"),
                Err(_) => {
                    log::error!("oscillator {id}: tick panicked, loop stopped");
                    break;
                }
            }
            thread::sleep(self.tick_interval);
        }
        log::debug!("sync loop {id} exited after {} ticks", self.ticks);
    }
}

impl std::fmt::Debug for SyncLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLoop")
            .field("oscillator", &self.oscillator.id())
            .field("tick_interval", &self.tick_interval)
            .field("ticks", &self.ticks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};
    use crate::link::{ExternalLink, LocalLink, NeighborLink};
    use firefly_physics::phase_distance;
    use firefly_types::{OscillatorId, SyncConfig, SyncError};

    const TICK: Duration = Duration::from_millis(1);

    fn flash_config() -> SyncConfig {
        SyncConfig {
            frequency_hz: 1.0,
            coupling: 1.0,
            family: CouplingFamily::Flash { threshold: 0.9 },
            ..SyncConfig::default()
        }
    }

    fn recording_link(id: u32, seen: &Arc<Mutex<Vec<f64>>>) -> Arc<dyn NeighborLink> {
        let sink = seen.clone();
        Arc::new(ExternalLink::new(OscillatorId(id), move |_, t| {
            sink.lock().push(t);
            Ok(())
        }))
    }

    #[test]
    fn test_one_broadcast_per_flash_window() {
        let osc = Arc::new(Oscillator::new(OscillatorId(0), &flash_config(), 0.0).unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        osc.attach_neighbors(vec![recording_link(1, &seen)]).unwrap();

        let mut sync_loop = SyncLoop::new(osc, TICK);
        for k in 0..300 {
            sync_loop.tick(k as f64 * 0.01).unwrap();
        }
        let flashes = seen.lock().clone();
        assert_eq!(flashes.len(), 3, "flashes={flashes:?}");
        // sin(2πt) first exceeds 0.9 shortly after t = 0.178.
        assert!((flashes[0] - 0.18).abs() < 1e-9, "first flash at {}", flashes[0]);
        assert!((flashes[1] - flashes[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_delivery_does_not_stop_fanout() {
        let osc = Arc::new(Oscillator::new(OscillatorId(0), &flash_config(), 0.0).unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let failing: Arc<dyn NeighborLink> = Arc::new(ExternalLink::new(OscillatorId(1), |_, _| {
            Err(SyncError::Transport("peer unreachable".into()))
        }));
        osc.attach_neighbors(vec![failing, recording_link(2, &seen)]).unwrap();

        let mut sync_loop = SyncLoop::new(osc, TICK);
        let report = sync_loop.tick(0.25).unwrap();
        assert!(report.flashed);
        assert_eq!(report.exchanged, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(*seen.lock(), vec![0.25]);
    }

    #[test]
    fn test_adjusts_only_when_dirty() {
        let osc = Arc::new(Oscillator::new(OscillatorId(0), &flash_config(), 0.0).unwrap());
        osc.attach_neighbors(vec![Arc::new(ExternalLink::new(OscillatorId(1), |_, _| Ok(())))
            as Arc<dyn NeighborLink>])
            .unwrap();
        let mut sync_loop = SyncLoop::new(osc.clone(), TICK);

        assert!(!sync_loop.tick(0.0).unwrap().adjusted);
        osc.receive_signal(OscillatorId(1), 0.3).unwrap();
        let report = sync_loop.tick(0.01).unwrap();
        assert!(report.adjusted);
        assert!(report.delta > 0.0, "later neighbor flash should pull phase up");
        assert!(!sync_loop.tick(0.02).unwrap().adjusted);
    }

    #[test]
    fn test_sampled_adjustment_rate_limited() {
        let cfg = SyncConfig {
            frequency_hz: 1.0,
            coupling: 1.0,
            family: CouplingFamily::Sampled { adjustment_hz: 10.0 },
            ..SyncConfig::default()
        };
        let a = Arc::new(Oscillator::new(OscillatorId(0), &cfg, 0.0).unwrap());
        let b = Arc::new(Oscillator::new(OscillatorId(1), &cfg, 1.0).unwrap());
        a.attach_neighbors(vec![Arc::new(LocalLink::new(&b)) as Arc<dyn NeighborLink>])
            .unwrap();

        let mut sync_loop = SyncLoop::new(a.clone(), TICK);
        let first = sync_loop.tick(0.0).unwrap();
        assert!(first.adjusted);
        assert_eq!(first.exchanged, 1);
        assert!((a.phase() - 1f64.sin()).abs() < 1e-12);

        assert!(!sync_loop.tick(0.05).unwrap().adjusted);
        assert!(sync_loop.tick(0.1).unwrap().adjusted);
    }

    #[test]
    fn test_sampling_failure_counted() {
        let cfg = SyncConfig {
            family: CouplingFamily::Sampled { adjustment_hz: 5.0 },
            ..SyncConfig::default()
        };
        let osc = Arc::new(Oscillator::new(OscillatorId(0), &cfg, 0.5).unwrap());
        osc.attach_neighbors(vec![Arc::new(ExternalLink::new(OscillatorId(1), |_, _| Ok(())))
            as Arc<dyn NeighborLink>])
            .unwrap();
        let report = SyncLoop::new(osc.clone(), TICK).tick(0.0).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(osc.phase(), 0.5);
    }

    #[test]
    fn test_pair_converges() {
        let cfg = flash_config();
        let a = Arc::new(Oscillator::new(OscillatorId(0), &cfg, 0.3).unwrap());
        let b = Arc::new(Oscillator::new(OscillatorId(1), &cfg, 2.0).unwrap());
        a.attach_neighbors(vec![Arc::new(LocalLink::new(&b)) as Arc<dyn NeighborLink>])
            .unwrap();
        b.attach_neighbors(vec![Arc::new(LocalLink::new(&a)) as Arc<dyn NeighborLink>])
            .unwrap();

        let initial = phase_distance(a.phase(), b.phase());
        let mut loop_a = SyncLoop::new(a.clone(), TICK);
        let mut loop_b = SyncLoop::new(b.clone(), TICK);
        for k in 0..6_000 {
            let now = k as f64 * 0.01;
            loop_a.tick(now).unwrap();
            loop_b.tick(now).unwrap();
        }
        let last = phase_distance(a.phase(), b.phase());
        assert!(last < initial, "initial={initial} final={last}");
    }

    #[test]
    fn test_run_until_stopped() {
        let osc = Arc::new(Oscillator::new(OscillatorId(0), &flash_config(), 0.0).unwrap());
        osc.attach_neighbors(Vec::new()).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            let mut sync_loop = SyncLoop::new(osc, TICK);
            sync_loop.run(&MonotonicClock::new(), &flag);
            sync_loop
        });
        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::SeqCst);
        let sync_loop = handle.join().unwrap();
        assert!(sync_loop.ticks() > 0);
    }

    /// Poll `cond` for up to two seconds.
    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_run_follows_its_clock() {
        let osc = Arc::new(Oscillator::new(OscillatorId(0), &flash_config(), 0.0).unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        osc.attach_neighbors(vec![recording_link(1, &seen)]).unwrap();

        let clock = Arc::new(ManualClock::new(0.0));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let (clock, stop) = (clock.clone(), stop.clone());
            thread::spawn(move || SyncLoop::new(osc, TICK).run(clock.as_ref(), &stop))
        };

        // Frozen inside the flash window: one rising edge, one broadcast.
        clock.set(0.25);
        assert!(wait_for(|| seen.lock().len() == 1));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(*seen.lock(), vec![0.25]);

        // Out of the window and back in: the next period flashes again.
        assert_eq!(clock.advance(0.5), 0.75);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(clock.advance(0.5), 1.25);
        assert!(wait_for(|| seen.lock().len() == 2), "seen={:?}", seen.lock());

        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(*seen.lock(), vec![0.25, 1.25]);
    }

    #[test]
    fn test_panicking_link_ends_only_its_loop() {
        let osc = Arc::new(Oscillator::new(OscillatorId(0), &flash_config(), 0.0).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        osc.attach_neighbors(vec![Arc::new(ExternalLink::new(OscillatorId(1), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("neighbor exploded")
        })) as Arc<dyn NeighborLink>])
            .unwrap();

        // Clock parked inside the flash window: the first tick broadcasts.
        let clock = ManualClock::new(0.25);
        let stop = AtomicBool::new(false);
        let mut sync_loop = SyncLoop::new(osc, TICK);
        sync_loop.run(&clock, &stop);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sync_loop.ticks(), 1);
        assert!(!stop.load(Ordering::SeqCst));
    }
}
