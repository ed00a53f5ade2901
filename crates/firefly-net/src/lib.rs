// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Network Transport
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Process-per-oscillator deployment: each node owns one oscillator and
//! reaches its neighbors through `RemoteLink`s over newline-delimited
//! JSON on TCP.
//!
//! Networking runs on a tokio runtime; the synchronization loop stays
//! blocking and runs beside it.
//!
//! Only the flash family is supported here; sampling a remote phase would
//! need a request per neighbor per adjustment.

pub mod node;
pub mod protocol;
pub mod remote;

pub use node::Node;
pub use protocol::{read_message, write_message, Message, MAX_LINE_BYTES};
pub use remote::RemoteLink;
