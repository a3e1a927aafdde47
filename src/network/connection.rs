//! Connection Handler
//!
//! One accepted agent connection. The calling thread reads frames and
//! forwards them to the depot runner; a writer thread drains the
//! connection's outbound queue, so each direction stays in order.

use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::depot::AgentId;
use crate::error::{DepotError, Result};
use crate::protocol::{read_frame, write_frame, AgentMessage, DepotMessage, Envelope};

use super::server::ServerEvent;

/// Holds one slot of the connection limit until dropped
pub(crate) struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub(crate) fn try_acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let mut current = active.load(Ordering::Acquire);
        loop {
            if current >= max {
                return None;
            }
            match active.compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    return Some(Self {
                        active: Arc::clone(active),
                    })
                }
                Err(next) => current = next,
            }
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Whether `err` just means the peer went away
pub(crate) fn is_disconnect(err: &DepotError) -> bool {
    match err {
        DepotError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut
        ),
        _ => false,
    }
}

pub struct Connection {
    agent_id: AgentId,
    stream: TcpStream,
    peer_addr: String,
}

impl Connection {
    pub fn new(stream: TcpStream, agent_id: AgentId) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // accepted sockets may inherit the listener's non-blocking mode
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;

        Ok(Self {
            agent_id,
            stream,
            peer_addr,
        })
    }

    /// Configure connection timeouts (0 = none)
    pub fn set_timeouts(&self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.stream
                .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.stream
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Serve the connection until the peer leaves (blocking)
    ///
    /// The depot runner learns about the connection, every frame and the
    /// disconnect through `events`.
    pub(crate) fn serve(self, events: Sender<ServerEvent>, _guard: ConnectionGuard) -> Result<()> {
        let (outbound_tx, outbound_rx) = unbounded();
        let writer_stream = self.stream.try_clone()?;
        let control_stream = self.stream.try_clone()?;

        let agent_id = self.agent_id;
        let peer_addr = self.peer_addr.clone();
        let writer = thread::Builder::new()
            .name(format!("blobdepot-writer-{}", agent_id))
            .spawn(move || run_writer(agent_id, &peer_addr, writer_stream, outbound_rx))?;

        if events
            .send(ServerEvent::Connected {
                agent_id,
                peer_addr: self.peer_addr.clone(),
                outbound: outbound_tx,
                stream: control_stream,
            })
            .is_err()
        {
            let _ = self.stream.shutdown(Shutdown::Both);
            let _ = writer.join();
            return Ok(());
        }

        tracing::info!(agent_id, peer_addr = %self.peer_addr, "connection established");
        let result = self.run_reader(&events);
        let _ = events.send(ServerEvent::Disconnected { agent_id });
        let _ = writer.join();
        result
    }

    fn run_reader(&self, events: &Sender<ServerEvent>) -> Result<()> {
        let mut reader = BufReader::new(&self.stream);
        loop {
            let envelope: Envelope<AgentMessage> = match read_frame(&mut reader) {
                Ok(envelope) => envelope,
                Err(ref e) if is_disconnect(e) => {
                    tracing::debug!(agent_id = self.agent_id, peer_addr = %self.peer_addr, "peer closed connection");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(agent_id = self.agent_id, peer_addr = %self.peer_addr, error = %e, "dropping connection");
                    let _ = self.stream.shutdown(Shutdown::Both);
                    return Err(e);
                }
            };

            tracing::trace!(
                agent_id = self.agent_id,
                request_id = envelope.request_id,
                message = envelope.message.name(),
                "frame received"
            );
            if events
                .send(ServerEvent::Message {
                    agent_id: self.agent_id,
                    envelope,
                })
                .is_err()
            {
                // runner is gone
                return Ok(());
            }
        }
    }
}

fn run_writer(
    agent_id: AgentId,
    peer_addr: &str,
    stream: TcpStream,
    outbound: Receiver<Envelope<DepotMessage>>,
) {
    let mut writer = BufWriter::new(stream);
    for envelope in outbound {
        if let Err(e) = write_frame(&mut writer, &envelope) {
            if is_disconnect(&e) {
                tracing::debug!(agent_id, peer_addr, "peer left before response could be sent");
            } else {
                tracing::warn!(agent_id, peer_addr, error = %e, "write failed");
            }
            let _ = writer.get_ref().shutdown(Shutdown::Both);
            return;
        }
    }
}
