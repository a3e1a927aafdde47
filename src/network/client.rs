//! TCP Client
//!
//! [`DepotLink`] over a TCP connection, reconnecting with exponential
//! backoff per the configured [`RetryPolicy`].

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use crate::agent::DepotLink;
use crate::config::{Config, RetryPolicy};
use crate::error::{DepotError, Result};
use crate::protocol::{read_frame, write_frame, AgentMessage, DepotMessage, Envelope};

use super::connection::is_disconnect;

pub struct TcpLink {
    addr: String,
    retry_policy: RetryPolicy,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
    reader: Option<BufReader<TcpStream>>,
    writer: Option<BufWriter<TcpStream>>,
}

impl TcpLink {
    pub fn new(addr: impl Into<String>, config: &Config) -> Self {
        Self {
            addr: addr.into(),
            retry_policy: config.retry_policy,
            read_timeout_ms: config.read_timeout_ms,
            write_timeout_ms: config.write_timeout_ms,
            reader: None,
            writer: None,
        }
    }

    fn open(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr)?;
        stream.set_nodelay(true)?;
        if self.read_timeout_ms > 0 {
            stream.set_read_timeout(Some(Duration::from_millis(self.read_timeout_ms)))?;
        }
        if self.write_timeout_ms > 0 {
            stream.set_write_timeout(Some(Duration::from_millis(self.write_timeout_ms)))?;
        }
        Ok(stream)
    }

    /// Block for the next message from the depot
    ///
    /// Any failure drops the link; the caller should then run
    /// `Agent::on_disconnect` and reconnect.
    pub fn recv(&mut self) -> Result<Envelope<DepotMessage>> {
        let reader = self.reader.as_mut().ok_or(DepotError::Disconnected)?;
        match read_frame(reader) {
            Ok(envelope) => Ok(envelope),
            Err(e) => {
                self.disconnect();
                if is_disconnect(&e) {
                    Err(DepotError::Disconnected)
                } else {
                    Err(e)
                }
            }
        }
    }

    pub fn disconnect(&mut self) {
        if self.writer.is_some() {
            tracing::info!(addr = %self.addr, "depot link closed");
        }
        self.reader = None;
        self.writer = None;
    }
}

impl DepotLink for TcpLink {
    fn connect(&mut self) -> Result<()> {
        self.disconnect();
        let mut attempt = 0;
        loop {
            match self.open() {
                Ok(stream) => {
                    let read_half = stream.try_clone()?;
                    self.reader = Some(BufReader::new(read_half));
                    self.writer = Some(BufWriter::new(stream));
                    tracing::info!(addr = %self.addr, attempt, "connected to depot");
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if self
                        .retry_policy
                        .max_attempts
                        .map_or(false, |max| attempt >= max)
                    {
                        return Err(DepotError::Network(format!(
                            "giving up on {} after {} attempts: {}",
                            self.addr, attempt, e
                        )));
                    }
                    let delay = self.retry_policy.backoff(attempt - 1);
                    tracing::debug!(addr = %self.addr, attempt, delay_ms = delay.as_millis() as u64, error = %e, "connect failed, retrying");
                    thread::sleep(delay);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn send(&mut self, envelope: Envelope<AgentMessage>) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(DepotError::Disconnected)?;
        if let Err(e) = write_frame(writer, &envelope) {
            self.disconnect();
            return Err(if is_disconnect(&e) {
                DepotError::Disconnected
            } else {
                e
            });
        }
        Ok(())
    }
}
