//! TCP Server
//!
//! Accepts agent connections and funnels them into a single depot runner.
//!
//! ```text
//!   accept loop ──► Connection (reader thread) ─┐
//!                   Connection (reader thread) ─┼─► events ──► runner ──► Depot
//!                                               │                │
//!   writer thread ◄── outbound queue ◄──────────┴────────────────┘
//! ```
//!
//! The runner owns the depot outright, so the depot itself needs no locks.

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{tick, unbounded, Receiver, Sender};

use crate::config::Config;
use crate::depot::{AgentId, Depot, DepotOutput, RangeResult, StorageGroup};
use crate::error::{DepotError, Result};
use crate::protocol::{AgentMessage, DepotMessage, Envelope};

use super::connection::{Connection, ConnectionGuard};

const ACCEPT_POLL: Duration = Duration::from_millis(25);
const RUNNER_TICK: Duration = Duration::from_millis(100);

/// What connections report to the runner
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        agent_id: AgentId,
        peer_addr: String,
        outbound: Sender<Envelope<DepotMessage>>,
        /// Used to unblock the reader on shutdown
        stream: TcpStream,
    },
    Message {
        agent_id: AgentId,
        envelope: Envelope<AgentMessage>,
    },
    Disconnected {
        agent_id: AgentId,
    },
}

/// Stops a running server from another thread
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

pub struct Server {
    config: Config,
    listener: Option<TcpListener>,
    storage_group: Option<Box<dyn StorageGroup + Send>>,
    shutdown: Arc<AtomicBool>,
    active_connections: Arc<AtomicUsize>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            listener: None,
            storage_group: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer range queries of a decommissioning depot with `group`
    pub fn with_storage_group(mut self, group: Box<dyn StorageGroup + Send>) -> Self {
        self.storage_group = Some(group);
        self
    }

    /// Bind the listen address; `run` binds lazily otherwise
    pub fn bind(&mut self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.config.listen_addr)?;
        let addr = listener.local_addr()?;
        self.listener = Some(listener);
        Ok(addr)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Open the depot and serve until shut down (blocking)
    ///
    /// Returns the error that stopped the depot, if any.
    pub fn run(&mut self) -> Result<()> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => TcpListener::bind(&self.config.listen_addr)?,
        };
        listener.set_nonblocking(true)?;

        let depot = Depot::open(&self.config)?;
        let (events_tx, events_rx) = unbounded();
        let runner = Runner {
            depot,
            storage_group: self.storage_group.take(),
            peers: HashMap::new(),
            shutdown: Arc::clone(&self.shutdown),
        };
        let runner = thread::Builder::new()
            .name("blobdepot-runner".to_string())
            .spawn(move || runner.run(events_rx))?;

        tracing::info!(addr = ?listener.local_addr().ok(), "listening");
        self.accept_loop(&listener, &events_tx);
        drop(events_tx);

        match runner.join() {
            Ok(result) => result,
            Err(_) => Err(DepotError::Invariant("depot runner panicked".to_string())),
        }
    }

    fn accept_loop(&self, listener: &TcpListener, events: &Sender<ServerEvent>) {
        let mut next_agent_id: AgentId = 1;
        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let Some(guard) =
                        ConnectionGuard::try_acquire(&self.active_connections, self.config.max_connections)
                    else {
                        tracing::warn!(%addr, max = self.config.max_connections, "connection limit reached");
                        let _ = stream.shutdown(Shutdown::Both);
                        continue;
                    };
                    let agent_id = next_agent_id;
                    next_agent_id += 1;
                    let events = events.clone();
                    let (read_ms, write_ms) = (self.config.read_timeout_ms, self.config.write_timeout_ms);
                    let spawned = thread::Builder::new()
                        .name(format!("blobdepot-conn-{}", agent_id))
                        .spawn(move || {
                            let served = Connection::new(stream, agent_id).and_then(|conn| {
                                conn.set_timeouts(read_ms, write_ms)?;
                                conn.serve(events, guard)
                            });
                            if let Err(e) = served {
                                tracing::warn!(agent_id, error = %e, "connection error");
                            }
                        });
                    if let Err(e) = spawned {
                        tracing::error!(error = %e, "failed to spawn connection thread");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    tracing::warn!(error = %e, "accept error");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        tracing::info!("accept loop stopped");
    }
}

struct Peer {
    outbound: Sender<Envelope<DepotMessage>>,
    stream: TcpStream,
}

/// Owns the depot; everything touching it runs here
struct Runner {
    depot: Depot,
    storage_group: Option<Box<dyn StorageGroup + Send>>,
    peers: HashMap<AgentId, Peer>,
    shutdown: Arc<AtomicBool>,
}

impl Runner {
    fn run(mut self, events: Receiver<ServerEvent>) -> Result<()> {
        let result = self.serve(&events);
        if let Err(e) = &result {
            tracing::error!(error = %e, "depot stopped");
        }
        self.shutdown.store(true, Ordering::Relaxed);

        for (_, peer) in self.peers.drain() {
            let _ = peer.stream.shutdown(Shutdown::Both);
        }
        let closed = self.depot.close();
        result.and(closed)
    }

    fn serve(&mut self, events: &Receiver<ServerEvent>) -> Result<()> {
        let load = self.depot.start_load();
        self.settle(load)?;

        let ticker = tick(RUNNER_TICK);
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(());
            }
            crossbeam::select! {
                recv(events) -> event => match event {
                    Ok(event) => self.on_event(event)?,
                    Err(_) => return Ok(()),
                },
                recv(ticker) -> _ => {
                    self.depot.check_watchdog(Instant::now());
                }
            }
        }
    }

    fn on_event(&mut self, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::Connected {
                agent_id,
                peer_addr,
                outbound,
                stream,
            } => {
                tracing::debug!(agent_id, %peer_addr, "peer attached");
                self.peers.insert(agent_id, Peer { outbound, stream });
                Ok(())
            }
            ServerEvent::Message { agent_id, envelope } => {
                let handled = self.depot.handle(agent_id, envelope);
                self.settle(handled)
            }
            ServerEvent::Disconnected { agent_id } => {
                self.peers.remove(&agent_id);
                self.depot.on_agent_disconnected(agent_id);
                Ok(())
            }
        }
    }

    /// Stop on fatal errors, otherwise deliver everything the depot queued
    fn settle(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => tracing::warn!(error = %e, "request failed"),
            Ok(()) => {}
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Result<()> {
        loop {
            let outputs = self.depot.take_outputs();
            if outputs.is_empty() {
                return Ok(());
            }
            for output in outputs {
                match output {
                    DepotOutput::ToAgent { agent_id, envelope } => match self.peers.get(&agent_id) {
                        Some(peer) => {
                            if peer.outbound.send(envelope).is_err() {
                                tracing::debug!(agent_id, "writer gone, message dropped");
                            }
                        }
                        None => {
                            tracing::debug!(agent_id, message = envelope.message.name(), "agent gone, message dropped");
                        }
                    },
                    DepotOutput::RangeQuery(query) => {
                        let result = match self.storage_group.as_mut() {
                            Some(group) => group.range(&query),
                            None => RangeResult::error(query.fan_out_id, "no predecessor group attached"),
                        };
                        match self.depot.on_range_result(result) {
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => tracing::warn!(error = %e, "range result failed"),
                            Ok(()) => {}
                        }
                    }
                    DepotOutput::LeastExpectedAdvanced {
                        channel,
                        least_expected,
                    } => {
                        tracing::debug!(channel, %least_expected, "least expected id advanced");
                    }
                }
            }
        }
    }
}
