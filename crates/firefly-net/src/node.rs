// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Distributed Node
// ─────────────────────────────────────────────────────────────────────
//! One oscillator per process, talking to its neighbors over TCP.
//!
//! Lifecycle:
//! 1. `bind` / `from_listener`: build the oscillator, wire one
//!    `RemoteLink` per configured neighbor, spawn the accept task.
//! 2. `register`: announce ourselves to every neighbor and wait until each
//!    neighbor has both acked us and registered with us, retrying with
//!    exponential backoff.
//! 3. `run`: drive the synchronization loop on a blocking thread until
//!    `shutdown`.
//! 4. `shutdown`: stop the loop and every server task. Dropping the node
//!    signals the same stop without waiting.
//!
//! Flash times are UNIX seconds so values from different hosts compare;
//! nodes are expected to run with synchronized system clocks.

use std::collections::HashSet;
use std::f64::consts::TAU;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use firefly_core::{Clock, NeighborLink, Oscillator, SyncLoop};
use firefly_types::{NodeConfig, OscillatorId, PeerHandle, SyncError, SyncResult};

use crate::protocol::{read_message, write_message, Message};
use crate::remote::RemoteLink;

/// State shared between the node and its connection tasks.
struct Inbound {
    oscillator: Arc<Oscillator>,
    allowed: HashSet<OscillatorId>,
    registered: Mutex<HashSet<OscillatorId>>,
}

impl Inbound {
    fn handle(&self, message: Message) -> Message {
        match message {
            Message::Register { peer } => {
                if !self.allowed.contains(&peer.id) {
                    log::warn!(
                        "rejecting registration from {} at {}: not a configured neighbor",
                        peer.id,
                        peer.addr
                    );
                    return Message::Nack {
                        reason: format!(
                            "{} is not a neighbor of {}",
                            peer.id,
                            self.oscillator.id()
                        ),
                    };
                }
                if self.registered.lock().insert(peer.id) {
                    log::info!("neighbor {} registered from {}", peer.id, peer.addr);
                }
                Message::Ack
            }
            Message::Signal { from, value } => match self.oscillator.receive_signal(from, value) {
                Ok(()) => Message::Ack,
                Err(e) => {
                    log::warn!("dropping signal from {from}: {e}");
                    Message::Nack {
                        reason: e.to_string(),
                    }
                }
            },
            Message::Ack | Message::Nack { .. } => Message::Nack {
                reason: "replies are not requests".to_string(),
            },
        }
    }
}

pub struct Node {
    config: NodeConfig,
    me: PeerHandle,
    local_addr: SocketAddr,
    oscillator: Arc<Oscillator>,
    remotes: Vec<Arc<RemoteLink>>,
    inbound: Arc<Inbound>,
    /// Read by the blocking synchronization loop.
    stop: Arc<AtomicBool>,
    /// Wakes every task waiting on this node.
    shutdown: watch::Sender<bool>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Bind `config.listen` and start serving.
    pub async fn bind(config: NodeConfig) -> SyncResult<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen).await?;
        Self::from_listener(config, listener)
    }

    /// Start serving on an already bound listener; `config.listen` is
    /// ignored. Must be called inside a tokio runtime.
    pub fn from_listener(config: NodeConfig, listener: TcpListener) -> SyncResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| SyncError::Config(format!("node needs a tokio runtime: {e}")))?;
        let local_addr = listener.local_addr()?;
        let me = PeerHandle::new(
            config.id,
            config
                .advertise
                .clone()
                .unwrap_or_else(|| local_addr.to_string()),
        );

        let phase = config
            .initial_phase
            .unwrap_or_else(|| rand::thread_rng().gen_range(0.0..TAU));
        let oscillator = Arc::new(Oscillator::new(config.id, &config.sync, phase)?);

        let remotes: Vec<Arc<RemoteLink>> = config
            .neighbors
            .iter()
            .map(|peer| {
                let link = RemoteLink::new(peer.clone(), config.delivery.clone(), runtime.clone());
                Arc::new(link)
            })
            .collect();
        oscillator.attach_neighbors(
            remotes
                .iter()
                .map(|r| r.clone() as Arc<dyn NeighborLink>)
                .collect(),
        )?;

        let inbound = Arc::new(Inbound {
            oscillator: oscillator.clone(),
            allowed: config.neighbors.iter().map(|p| p.id).collect(),
            registered: Mutex::new(HashSet::new()),
        });

        let (shutdown, watcher) = watch::channel(false);
        let server = runtime.spawn(accept_loop(listener, inbound.clone(), watcher));

        log::info!(
            "node {} listening on {local_addr} (advertised as {}), phase {phase:.4}, {} neighbors",
            config.id,
            me.addr,
            remotes.len()
        );
        Ok(Self {
            config,
            me,
            local_addr,
            oscillator,
            remotes,
            inbound,
            stop: Arc::new(AtomicBool::new(false)),
            shutdown,
            server: Mutex::new(Some(server)),
        })
    }

    pub fn id(&self) -> OscillatorId {
        self.config.id
    }

    pub fn handle(&self) -> &PeerHandle {
        &self.me
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn oscillator(&self) -> &Arc<Oscillator> {
        &self.oscillator
    }

    /// Neighbors that have registered with this node, sorted.
    pub fn registered_neighbors(&self) -> Vec<OscillatorId> {
        let mut ids: Vec<_> = self.inbound.registered.lock().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_shut_down(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Register with every neighbor and wait for every neighbor to
    /// register back.
    ///
    /// Retries with exponential backoff until done, the node shuts down, or
    /// `registration.timeout_ms` elapses.
    pub async fn register(&self) -> SyncResult<()> {
        let reg = &self.config.registration;
        let started = Instant::now();
        let deadline = reg.timeout_ms.map(|ms| started + Duration::from_millis(ms));
        let max_backoff = Duration::from_millis(reg.max_backoff_ms);
        let mut backoff = Duration::from_millis(reg.initial_backoff_ms);
        let mut acked: HashSet<OscillatorId> = HashSet::new();
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if self.is_shut_down() {
                return Err(SyncError::Cancelled(format!(
                    "registration of {} cancelled",
                    self.id()
                )));
            }

            for remote in &self.remotes {
                let id = remote.neighbor_id();
                if acked.contains(&id) {
                    continue;
                }
                match remote.register(&self.me).await {
                    Ok(()) => {
                        log::info!("registered with neighbor {id} at {}", remote.peer().addr);
                        acked.insert(id);
                    }
                    Err(e) => log::debug!("registration with {id} pending: {e}"),
                }
            }

            let pending = self.pending(&acked);
            if pending.is_empty() {
                log::info!(
                    "node {} registered with all {} neighbors in {:?}",
                    self.id(),
                    self.remotes.len(),
                    started.elapsed()
                );
                return Ok(());
            }

            let mut pause = backoff;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(SyncError::RegistrationTimeout {
                        waited_ms: started.elapsed().as_millis() as u64,
                        pending,
                    });
                }
                pause = pause.min(deadline - now);
            }
            log::debug!("waiting {pause:?} for neighbors {pending:?}");
            tokio::select! {
                () = sleep(pause) => {}
                () = stopped(&mut shutdown) => {}
            }
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    /// Neighbors that have not acked us or not registered with us yet.
    fn pending(&self, acked: &HashSet<OscillatorId>) -> Vec<OscillatorId> {
        let inbound = self.inbound.registered.lock();
        self.config
            .neighbors
            .iter()
            .map(|p| p.id)
            .filter(|id| !acked.contains(id) || !inbound.contains(id))
            .collect()
    }

    /// Register, then run the synchronization loop on a blocking thread
    /// until `shutdown`.
    ///
    /// Returns the number of ticks executed.
    pub async fn run(&self, clock: Arc<dyn Clock>) -> SyncResult<u64> {
        self.register().await?;
        let tick = self.config.sync.tick_interval();
        let mut sync_loop = SyncLoop::new(self.oscillator.clone(), tick);
        let stop = self.stop.clone();
        log::info!("node {} synchronizing", self.id());
        let ticks = tokio::task::spawn_blocking(move || {
            sync_loop.run(clock.as_ref(), &stop);
            sync_loop.ticks()
        })
        .await
        .map_err(io::Error::from)?;
        Ok(ticks)
    }

    /// Stop the loop and the server, and wait for the accept task.
    /// Idempotent.
    pub async fn shutdown(&self) {
        self.signal_stop();
        let server = self.server.lock().take();
        if let Some(server) = server {
            if let Err(e) = server.await {
                log::error!("node {} accept task failed: {e}", self.id());
            }
            log::info!("node {} shut down", self.id());
        }
    }

    fn signal_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.shutdown.send_replace(true);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Resolves once `shutdown` carries `true` or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    inbound: Arc<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    let watcher = shutdown.clone();
    loop {
        tokio::select! {
            biased;
            () = stopped(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    log::debug!("connection from {addr}");
                    let inbound = inbound.clone();
                    let watcher = watcher.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, &inbound, watcher).await {
                            log::debug!("connection from {addr} closed: {e}");
                        }
                    });
                }
                Err(e) => log::warn!("accept failed: {e}"),
            },
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    inbound: &Inbound,
    mut shutdown: watch::Receiver<bool>,
) -> SyncResult<()> {
    stream.set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let read = tokio::select! {
            biased;
            () = stopped(&mut shutdown) => return Ok(()),
            read = read_message(&mut reader) => read,
        };
        let message = match read {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(()),
            Err(e) => {
                let nack = Message::Nack {
                    reason: e.to_string(),
                };
                let _ = write_message(&mut writer, &nack).await;
                return Err(e);
            }
        };
        write_message(&mut writer, &inbound.handle(message)).await?;
    }
}
