// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Canonical Parameters
// ─────────────────────────────────────────────────────────────────────
//! Canonical simulation constants. Configs copy these as defaults; no code
//! reads them as process-wide settings.

/// Natural flashing frequency (Hz): one flash every ten seconds.
pub const DEFAULT_FREQUENCY_HZ: f64 = 0.1;

/// Activity level above which a firefly counts as flashing.
pub const DEFAULT_THRESHOLD: f64 = 0.99;

/// Kuramoto coupling constant K.
pub const DEFAULT_COUPLING: f64 = 1.0;

/// Loop sleep between ticks (ms).
pub const DEFAULT_TICK_MS: u64 = 10;

/// Neighbors of a torus cell: up, down, left, right.
pub const NEIGHBORS_PER_CELL: usize = 4;

/// Upper bound on grid cells, since every cell gets its own thread.
pub const MAX_GRID_CELLS: usize = 10_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_inside_asin_domain() {
        assert!(DEFAULT_THRESHOLD > -1.0 && DEFAULT_THRESHOLD < 1.0);
    }

    #[test]
    fn test_tick_resolves_flash_window() {
        // The flashing window (activity > threshold) must span several ticks,
        // otherwise rising edges are missed.
        let window_s = (std::f64::consts::PI - 2.0 * DEFAULT_THRESHOLD.asin())
            / (std::f64::consts::TAU * DEFAULT_FREQUENCY_HZ);
        let tick_s = DEFAULT_TICK_MS as f64 / 1000.0;
        assert!(window_s > 10.0 * tick_s, "window={window_s}s tick={tick_s}s");
    }
}
