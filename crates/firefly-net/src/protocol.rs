// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Wire Protocol
// ─────────────────────────────────────────────────────────────────────
//! Newline-delimited JSON over TCP.
//!
//! Every request (`register`, `signal`) gets exactly one reply (`ack` or
//! `nack`) on the same connection:
//!
//! ```text
//! {"type":"register","peer":{"id":3,"addr":"10.0.0.3:7000"}}
//! {"type":"ack"}
//! {"type":"signal","from":3,"value":1712345678.25}
//! {"type":"nack","reason":"oscillator #4 has no neighbor #3"}
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use firefly_types::{OscillatorId, PeerHandle, SyncError, SyncResult};

/// Longest accepted line, newline included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Announce `peer` as a live neighbor of the receiver.
    Register { peer: PeerHandle },
    /// Flash notification: `from` flashed at `value` (seconds).
    Signal { from: OscillatorId, value: f64 },
    Ack,
    Nack { reason: String },
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> SyncResult<()> {
    let mut line = serde_json::to_vec(message)
        .map_err(|e| SyncError::Protocol(format!("cannot encode message: {e}")))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one raw line of at most `MAX_LINE_BYTES`, newline included.
///
/// An oversized line is drained up to its newline before the error is
/// returned, so the next read starts on a message boundary.
async fn read_line_bounded<R: AsyncBufRead + Unpin>(reader: &mut R) -> SyncResult<Vec<u8>> {
    let mut raw = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(raw);
        }
        let (end, found_newline) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        if raw.len() + end > MAX_LINE_BYTES {
            reader.consume(end);
            if !found_newline {
                loop {
                    let rest = reader.fill_buf().await?;
                    if rest.is_empty() {
                        break;
                    }
                    let newline = rest.iter().position(|&b| b == b'\n');
                    let len = rest.len();
                    match newline {
                        Some(pos) => {
                            reader.consume(pos + 1);
                            break;
                        }
                        None => reader.consume(len),
                    }
                }
            }
            return Err(SyncError::Protocol(format!(
                "line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }

        raw.extend_from_slice(&available[..end]);
        reader.consume(end);
        if found_newline {
            return Ok(raw);
        }
    }
}

/// Read the next message, skipping blank lines.
///
/// Returns `Ok(None)` on a clean end of stream.
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> SyncResult<Option<Message>> {
    loop {
        let raw = read_line_bounded(reader).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let complete = raw.ends_with(b"\n");
        let line = String::from_utf8(raw)
            .map_err(|e| SyncError::Protocol(format!("message is not UTF-8: {e}")))?;
        let trimmed = line.trim();
        if !complete {
            if trimmed.is_empty() {
                return Ok(None);
            }
            return Err(SyncError::Protocol(
                "connection closed in the middle of a message".to_string(),
            ));
        }
        if trimmed.is_empty() {
            continue;
        }
        return serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| SyncError::Protocol(format!("malformed message: {e}")));
    }
}
