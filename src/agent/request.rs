//! Request correlation
//!
//! Every request the agent sends is remembered under its request id until
//! the final response arrives or the link drops.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::types::{ChannelKindId, SequenceId};

/// Who is waiting for a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSender {
    /// The agent itself (register, refill)
    Agent,
    /// An external caller, identified by the id it passed to `issue`
    Caller(u64),
}

/// Typed data the response handler needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    AllocateIds { kind: ChannelKindId },
    /// Ids whose writes this commit completes
    CommitBlobSeq { seq_ids: Vec<SequenceId> },
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub sender: RequestSender,
    pub payload: Option<RequestPayload>,
    pub issued_at: Instant,
}

impl RequestContext {
    pub fn new(sender: RequestSender, payload: Option<RequestPayload>) -> Self {
        Self {
            sender,
            payload,
            issued_at: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RequestTable {
    in_flight: BTreeMap<u64, RequestContext>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, request_id: u64, context: RequestContext) {
        self.in_flight.insert(request_id, context);
    }

    pub fn get(&self, request_id: u64) -> Option<&RequestContext> {
        self.in_flight.get(&request_id)
    }

    pub fn remove(&mut self, request_id: u64) -> Option<RequestContext> {
        self.in_flight.remove(&request_id)
    }

    /// Remove every context, oldest request first
    pub fn drain(&mut self) -> Vec<(u64, RequestContext)> {
        std::mem::take(&mut self.in_flight).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}
