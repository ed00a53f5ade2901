// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Error Hierarchy
// ─────────────────────────────────────────────────────────────────────

use thiserror::Error;

use crate::ids::OscillatorId;

/// Root error type for all Firefly Sync failures.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid parameters, grid dimensions or node configuration.
    #[error("config error: {0}")]
    Config(String),

    /// `attach_neighbors` was called on an already wired oscillator.
    #[error("oscillator {0} already has its neighbors attached")]
    AlreadyAttached(OscillatorId),

    /// A signal arrived from an identity that is not a configured neighbor.
    #[error("oscillator {receiver} has no neighbor {sender}")]
    UnknownNeighbor {
        receiver: OscillatorId,
        sender: OscillatorId,
    },

    /// The in-process neighbor behind a link has been dropped.
    #[error("neighbor {0} is no longer alive")]
    NeighborGone(OscillatorId),

    /// NaN or Inf in a signal value or a phase update.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Grid position outside the torus.
    #[error("position ({row}, {col}) is outside the {rows}x{cols} grid")]
    OutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    /// The grid loops are running on their own threads.
    #[error("grid is already running")]
    AlreadyRunning,

    /// Operation not offered by this link or deployment profile.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Malformed or unexpected wire message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Remote delivery failed after all attempts.
    #[error("transport error: {0}")]
    Transport(String),

    /// Registration did not complete before the configured deadline.
    #[error("registration timed out after {waited_ms}ms, pending neighbors: {pending:?}")]
    RegistrationTimeout {
        waited_ms: u64,
        pending: Vec<OscillatorId>,
    },

    /// Registration was cancelled by a node shutdown.
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
