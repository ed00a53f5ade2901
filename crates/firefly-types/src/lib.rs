// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Shared Types
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Identifiers, configuration, and error hierarchy shared by every
//! Firefly Sync crate: the in-process grid, the TCP node, and the CLI.

pub mod config;
pub mod error;
pub mod ids;

pub use config::{
    CouplingFamily, DeliveryConfig, GridConfig, NodeConfig, PeerHandle, RegistrationConfig,
    SyncConfig,
};
pub use error::{SyncError, SyncResult};
pub use ids::{GridPos, OscillatorId};
