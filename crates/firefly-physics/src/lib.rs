// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Coupling Physics
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Kuramoto coupling rules for flash and sampled oscillators, plus the
//! canonical simulation parameters.

pub mod kuramoto;
pub mod params;

pub use kuramoto::{
    flash_activity, flash_coupling_delta, order_parameter, phase_distance, sampled_activity,
    sampled_coupling_delta, self_flash_time, wrap_phase,
};
pub use params::{
    DEFAULT_COUPLING, DEFAULT_FREQUENCY_HZ, DEFAULT_THRESHOLD, DEFAULT_TICK_MS, MAX_GRID_CELLS,
    NEIGHBORS_PER_CELL,
};
