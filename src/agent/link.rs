//! Agent ↔ depot link
//!
//! The agent only needs an ordered, reconnectable pipe; responses are fed
//! back through `Agent::handle_response` by whoever owns the receive side.

use std::collections::VecDeque;

use crate::error::{DepotError, Result};
use crate::protocol::{AgentMessage, Envelope};

pub trait DepotLink {
    /// Establish the link, retrying as the implementation sees fit
    fn connect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Send one message; FIFO with every other message on this link
    fn send(&mut self, envelope: Envelope<AgentMessage>) -> Result<()>;
}

/// In-process link that queues outgoing messages
///
/// Used to wire an agent to a depot living in the same process.
#[derive(Debug, Default)]
pub struct QueueLink {
    connected: bool,
    outbox: VecDeque<Envelope<AgentMessage>>,
}

impl QueueLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the link; queued messages are lost
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.outbox.clear();
    }

    /// Take every message sent so far, oldest first
    pub fn drain(&mut self) -> Vec<Envelope<AgentMessage>> {
        self.outbox.drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }
}

impl DepotLink for QueueLink {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, envelope: Envelope<AgentMessage>) -> Result<()> {
        if !self.connected {
            return Err(DepotError::Disconnected);
        }
        self.outbox.push_back(envelope);
        Ok(())
    }
}
