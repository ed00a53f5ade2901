// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Remote Neighbor Link
// ─────────────────────────────────────────────────────────────────────
//! `NeighborLink` to an oscillator in another process.
//!
//! One cached connection per link, opened lazily and dropped on any
//! error. Each request gets `attempts` tries, each with bounded connect
//! and I/O time, so a dead neighbor delays a broadcast by at most
//! `attempts × (connect + io timeout) + retries × backoff`.
//!
//! The async methods run on the node's runtime. `deliver`, called from the
//! blocking synchronization loop, enters that runtime through a stored
//! `Handle`, so it must not be called from inside an async task.

use std::io;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

use firefly_core::NeighborLink;
use firefly_types::{DeliveryConfig, OscillatorId, PeerHandle, SyncError, SyncResult};

use crate::protocol::{read_message, write_message, Message};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

fn timed_out(what: &str, addr: &str, ms: u64) -> SyncError {
    SyncError::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{what} {addr} timed out after {ms}ms"),
    ))
}

impl Connection {
    async fn open(addr: &str, delivery: &DeliveryConfig) -> SyncResult<Self> {
        let stream = timeout(
            Duration::from_millis(delivery.connect_timeout_ms),
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| timed_out("connect to", addr, delivery.connect_timeout_ms))??;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn exchange(&mut self, message: &Message) -> SyncResult<Message> {
        write_message(&mut self.writer, message).await?;
        read_message(&mut self.reader)
            .await?
            .ok_or_else(|| SyncError::Transport("peer closed the connection".to_string()))
    }
}

pub struct RemoteLink {
    peer: PeerHandle,
    delivery: DeliveryConfig,
    conn: Mutex<Option<Connection>>,
    runtime: Handle,
}

impl RemoteLink {
    /// `runtime` drives the blocking `deliver` path.
    pub fn new(peer: PeerHandle, delivery: DeliveryConfig, runtime: Handle) -> Self {
        Self {
            peer,
            delivery,
            conn: Mutex::new(None),
            runtime,
        }
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    /// Announce `me` to the neighbor. Succeeds once the neighbor acks.
    pub async fn register(&self, me: &PeerHandle) -> SyncResult<()> {
        let reply = self.request(&Message::Register { peer: me.clone() }).await?;
        self.expect_ack(reply, "registration")
    }

    /// Send a flash time and wait for the ack.
    pub async fn signal(&self, sender: OscillatorId, value: f64) -> SyncResult<()> {
        let reply = self
            .request(&Message::Signal {
                from: sender,
                value,
            })
            .await?;
        self.expect_ack(reply, "signal")
    }

    async fn request(&self, message: &Message) -> SyncResult<Message> {
        let attempts = self.delivery.attempts.max(1);
        let io_ms = self.delivery.io_timeout_ms;
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                sleep(Duration::from_millis(self.delivery.retry_backoff_ms)).await;
            }
            let mut slot = self.conn.lock().await;
            if slot.is_none() {
                match Connection::open(&self.peer.addr, &self.delivery).await {
                    Ok(conn) => *slot = Some(conn),
                    Err(e) => {
                        log::debug!(
                            "connect to {} at {} failed (attempt {attempt}/{attempts}): {e}",
                            self.peer.id,
                            self.peer.addr
                        );
                        last_error = Some(e);
                        continue;
                    }
                }
            }
            let Some(conn) = slot.as_mut() else {
                continue;
            };
            let outcome = timeout(Duration::from_millis(io_ms), conn.exchange(message))
                .await
                .unwrap_or_else(|_| Err(timed_out("request to", &self.peer.addr, io_ms)));
            match outcome {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    // The stream may hold half a reply; never reuse it.
                    *slot = None;
                    log::debug!(
                        "request to {} failed (attempt {attempt}/{attempts}): {e}",
                        self.peer.id
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(SyncError::Transport(format!(
            "neighbor {} at {} unreachable after {attempts} attempts: {}",
            self.peer.id,
            self.peer.addr,
            last_error.map_or_else(|| "no error recorded".to_string(), |e| e.to_string())
        )))
    }

    fn expect_ack(&self, reply: Message, what: &str) -> SyncResult<()> {
        match reply {
            Message::Ack => Ok(()),
            Message::Nack { reason } => Err(SyncError::Protocol(format!(
                "{} refused {what}: {reason}",
                self.peer.id
            ))),
            other => Err(SyncError::Protocol(format!(
                "{} answered {what} with {other:?}",
                self.peer.id
            ))),
        }
    }
}

impl NeighborLink for RemoteLink {
    fn neighbor_id(&self) -> OscillatorId {
        self.peer.id
    }

    fn deliver(&self, sender: OscillatorId, value: f64) -> SyncResult<()> {
        self.runtime.block_on(self.signal(sender, value))
    }
}

impl std::fmt::Debug for RemoteLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteLink")
            .field("peer", &self.peer)
            .field("connected", &self.conn.try_lock().ok().map(|c| c.is_some()))
            .finish()
    }
}
