// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Clocks
// ─────────────────────────────────────────────────────────────────────
//! Time sources, in seconds as `f64`.
//!
//! Flash timestamps are compared across oscillators, so every oscillator
//! in one simulation must read the same clock:
//! - `MonotonicClock` for a single-process grid,
//! - `SystemClock` (UNIX time) for nodes in separate processes,
//! - `ManualClock` for simulated time in tests and offline runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Seconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Seconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// Externally driven clock for simulated time.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, t: f64) {
        self.bits.store(t.to_bits(), Ordering::SeqCst);
    }

    /// Move time forward by `dt` seconds and return the new time.
    pub fn advance(&self, dt: f64) -> f64 {
        let prev = self
            .bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + dt).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        f64::from_bits(prev) + dt
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1.5);
        assert_eq!(clock.now(), 1.5);
        assert_eq!(clock.advance(0.5), 2.0);
        assert_eq!(clock.now(), 2.0);
        clock.set(10.0);
        assert_eq!(clock.now(), 10.0);
    }

    #[test]
    fn test_manual_clock_default_zero() {
        assert_eq!(ManualClock::default().now(), 0.0);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.now();
        assert!(b > a && a >= 0.0);
    }

    #[test]
    fn test_system_clock_is_unix_time() {
        // Any date after 2020-01-01.
        assert!(SystemClock.now() > 1_577_836_800.0);
    }
}
