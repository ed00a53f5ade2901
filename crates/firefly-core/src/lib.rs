// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Synchronization Engine
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Coupled oscillators that synchronize through nearest-neighbor signals
//! on a torus, one independent loop per oscillator.
//!
//! # Invariants
//!
//! 1. **Families never mix**: an oscillator is either flash (neighbors send
//!    flash times, phase unbounded) or sampled (neighbors report phases,
//!    phase in [0, 2π)). The family is fixed at construction.
//!
//! 2. **One finite signal per neighbor**: the signal map is keyed by
//!    neighbor identity, populated at attach time with values that exert
//!    no pull, and only ever overwritten with finite values from known
//!    neighbors. A neighbor that falls silent keeps its last value.
//!
//! 3. **No lost signals**: `dirty` is cleared under the same lock that
//!    snapshots the signals, so a signal arriving during an adjustment
//!    triggers the next one.
//!
//! 4. **Failures stay local**: a failed delivery is logged and fan-out
//!    continues; a panicking tick ends only its own loop.

pub mod clock;
pub mod grid;
pub mod link;
pub mod oscillator;
pub mod sync_loop;
pub mod torus;

pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use grid::{Grid, StepReport};
pub use link::{ExternalLink, LocalLink, NeighborLink};
pub use oscillator::Oscillator;
pub use sync_loop::{SyncLoop, TickReport};
pub use torus::Torus;
