//! Transaction queue
//!
//! Exactly one transaction touches durable state at a time. A transaction
//! that hits a cold page either asks to be rerun (no progress: it goes back
//! to the front once the page is loaded) or hands over to a successor
//! (partial progress: the successor queues behind everyone else).

use std::collections::VecDeque;

use crate::types::{KeepState, Key};

use super::commit::CommitRequest;
use super::decommit::RangeResult;
use super::resolve::{ResolveCursor, ResolveRequest};

#[derive(Debug)]
pub enum Transaction {
    /// Stream the durable index into memory
    Load,
    Resolve {
        request: ResolveRequest,
        cursor: ResolveCursor,
    },
    Commit(CommitRequest),
    /// Ingest one predecessor range read
    CommitRange(RangeResult),
    UpdateKeepState {
        key: Key,
        keep_state: KeepState,
    },
}

impl Transaction {
    pub fn name(&self) -> &'static str {
        match self {
            Transaction::Load => "Load",
            Transaction::Resolve { .. } => "Resolve",
            Transaction::Commit(_) => "Commit",
            Transaction::CommitRange(_) => "CommitRange",
            Transaction::UpdateKeepState { .. } => "UpdateKeepState",
        }
    }
}

#[derive(Debug, Default)]
pub struct Executor {
    queue: VecDeque<Transaction>,
    executed: u64,
    restarts: u64,
    successors: u64,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, tx: Transaction) {
        self.queue.push_back(tx);
    }

    /// Queue a successor behind already waiting work
    pub fn submit_successor(&mut self, tx: Transaction) {
        self.successors += 1;
        self.queue.push_back(tx);
    }

    /// Put a not-ready transaction back at the head
    pub fn restart(&mut self, tx: Transaction) {
        self.restarts += 1;
        self.queue.push_front(tx);
    }

    pub fn next(&mut self) -> Option<Transaction> {
        let tx = self.queue.pop_front()?;
        self.executed += 1;
        Some(tx)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Attempts started so far, reruns included
    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn successors(&self) -> u64 {
        self.successors
    }
}
