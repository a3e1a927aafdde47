//! Depot
//!
//! Server half of the system: owns the durable index, the allocation ledger
//! and the barriers, and answers agents.
//!
//! ## Message Flow
//! ```text
//!   Register      ──► ledger attach ──► RegisterResult (+ pending pushes)
//!   AllocateIds   ──► ledger grant  ──► AllocateIdsResult
//!   CommitBlobSeq ──► Commit tx     ──► CommitBlobSeqResult
//!   Resolve       ──► decommit plan ──► Resolve tx ──► ResolveResult pages
//!                                 └──► RangeQuery outputs ... on_range_result
//!   PushNotifyResult ──► trim agent share
//! ```
//!
//! The depot performs no I/O towards agents. Everything it wants delivered
//! is queued as a [`DepotOutput`] and collected with [`Depot::take_outputs`];
//! outputs are only queued after the batch they depend on was applied.

mod barrier;
mod commit;
mod data;
mod decommit;
mod executor;
mod ledger;
mod push;
mod resolve;
mod watchdog;

use std::time::{Duration, Instant};

pub use barrier::{Barrier, BarrierRelation, BarrierServer};
pub use commit::CommitRequest;
pub use data::{Data, ScanFlags, UpdateOutcome};
pub use decommit::{
    AssimilatedBlob, DecommitState, FanInOutcome, Plan, RangeQuery, RangeResult, RangeStatus,
    StorageGroup,
};
pub use executor::{Executor, Transaction};
pub use ledger::{AgentId, AgentRecord, ChannelState, Ledger};
pub use resolve::{ResolveCursor, ResolveRequest};
pub use watchdog::Watchdog;

use crate::config::Config;
use crate::engine::{IndexEngine, ScanStep};
use crate::error::{DepotError, Result};
use crate::protocol::{AgentMessage, DepotMessage, Envelope, GivenIdRange};
use crate::storage::PageRead;
use crate::types::{BlobId, GenStep, KeepState, Key, SequenceId};
use crate::wal::Operation;

use commit::CommitAttempt;
use resolve::{ResolveAttempt, ResolveEnv};

/// Rows pulled into memory by one Load transaction
const LOAD_ROWS_PER_TX: usize = 1024;

/// Something the depot wants the runtime to deliver
#[derive(Debug, Clone, PartialEq)]
pub enum DepotOutput {
    ToAgent {
        agent_id: AgentId,
        envelope: Envelope<DepotMessage>,
    },
    /// Range read for the predecessor group
    RangeQuery(RangeQuery),
    /// Collection may now proceed up to (excluding) `least_expected`
    LeastExpectedAdvanced {
        channel: u8,
        least_expected: SequenceId,
    },
}

/// Result of one transaction attempt
enum TxStep {
    Done,
    Successor(Transaction),
    NotReady(Transaction),
}

pub struct Depot {
    tablet_id: u64,
    max_message_size: usize,

    engine: IndexEngine,
    ledger: Ledger,
    barriers: BarrierServer,
    data: Data,
    decommit: DecommitState,
    executor: Executor,
    watchdog: Watchdog,

    outputs: Vec<DepotOutput>,
}

impl Depot {
    /// Open the index under `config.data_dir` and start a new generation
    pub fn open(config: &Config) -> Result<Self> {
        let engine = IndexEngine::open(config)?;
        let previous = engine.load_ledger()?;
        let ledger = Ledger::open(previous.as_ref(), &config.channel_kinds)?;
        engine.store_ledger(&ledger.record())?;

        tracing::info!(
            tablet_id = config.tablet_id,
            generation = ledger.generation(),
            decommit_group_id = ?config.decommit_group_id,
            "depot opened"
        );

        Ok(Self {
            tablet_id: config.tablet_id,
            max_message_size: config.max_message_size,
            engine,
            ledger,
            barriers: BarrierServer::new(),
            data: Data::new(config.key_mode),
            decommit: DecommitState::new(config.decommit_group_id),
            executor: Executor::new(),
            watchdog: Watchdog::new(config.watchdog_period),
            outputs: Vec::new(),
        })
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Process one message from `agent_id` and run every transaction it
    /// made ready
    ///
    /// `Invariant` errors are fatal for the depot.
    pub fn handle(&mut self, agent_id: AgentId, envelope: Envelope<AgentMessage>) -> Result<()> {
        let Envelope {
            request_id,
            message,
        } = envelope;
        tracing::debug!(agent_id, request_id, message = message.name(), "agent message");

        match message {
            AgentMessage::Register {
                virtual_group_id,
                agent_instance_id,
            } => self.on_register(agent_id, request_id, virtual_group_id, agent_instance_id),
            AgentMessage::AllocateIds { kind, count } => {
                let registered = self
                    .ledger
                    .agent(agent_id)
                    .map_or(false, |agent| agent.connected);
                let range = if registered {
                    self.ledger.allocate(agent_id, kind, count)
                } else {
                    tracing::warn!(agent_id, request_id, "allocate from unregistered agent");
                    None
                };
                self.send(
                    agent_id,
                    request_id,
                    DepotMessage::AllocateIdsResult {
                        kind,
                        generation: self.ledger.generation(),
                        given_id_range: range.map(|r| GivenIdRange {
                            channel_ranges: vec![r],
                        }),
                    },
                );
            }
            AgentMessage::CommitBlobSeq { items } => {
                self.executor.submit(Transaction::Commit(CommitRequest {
                    agent_id,
                    request_id,
                    items,
                }));
            }
            AgentMessage::Resolve { items } => {
                let request = ResolveRequest::new(agent_id, request_id, items);
                self.watchdog.start(agent_id, request_id, request.received_at);
                self.start_resolve(request);
            }
            AgentMessage::PushNotifyResult { writes_in_flight } => {
                self.on_push_notify_result(agent_id, request_id, &writes_in_flight);
            }
        }

        self.run_pending()
    }

    fn on_register(&mut self, agent_id: AgentId, request_id: u64, virtual_group_id: u32, instance_id: u64) {
        tracing::info!(agent_id, virtual_group_id, instance_id, "agent registered");
        for least_expected in self.ledger.register_agent(agent_id, instance_id) {
            self.push_least_expected(Some(least_expected));
        }
        self.send(
            agent_id,
            request_id,
            DepotMessage::RegisterResult {
                generation: self.ledger.generation(),
                decommit_group_id: self.decommit.group_id(),
                channel_kinds: self.ledger.channel_kinds().to_vec(),
            },
        );
        // invalidations this agent missed while away
        self.push_invalidations(agent_id);
    }

    fn start_resolve(&mut self, request: ResolveRequest) {
        match self.decommit.plan(&self.data, request) {
            Plan::Run(request) => self.executor.submit(Transaction::Resolve {
                request,
                cursor: ResolveCursor::default(),
            }),
            Plan::Deferred(queries) => {
                self.outputs
                    .extend(queries.into_iter().map(DepotOutput::RangeQuery));
            }
            Plan::Reject(request, reason) => self.fail_resolve(&request, reason),
        }
    }

    fn fail_resolve(&mut self, request: &ResolveRequest, reason: String) {
        self.watchdog.finish(request.agent_id, request.request_id);
        self.send(
            request.agent_id,
            request.request_id,
            DepotMessage::resolve_error(reason),
        );
    }

    /// The connection to `agent_id` dropped
    pub fn on_agent_disconnected(&mut self, agent_id: AgentId) {
        tracing::info!(agent_id, "agent disconnected");
        self.ledger.disconnect_agent(agent_id);
    }

    /// Feed back one predecessor range read
    pub fn on_range_result(&mut self, result: RangeResult) -> Result<()> {
        self.executor.submit(Transaction::CommitRange(result));
        self.run_pending()
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Raise the client barrier of (tablet, channel) and drop the keys it
    /// passed over
    pub fn set_barrier(&mut self, tablet_id: u64, channel: u8, hard: bool, gen_step: GenStep) -> Result<bool> {
        let previous = self.barriers.barrier(tablet_id, channel);
        if !self.barriers.set_barrier(tablet_id, channel, hard, gen_step) {
            return Ok(false);
        }
        let after = if hard { previous.hard } else { previous.soft };

        let mut batch = Vec::new();
        for (key, keep_state) in self
            .data
            .blob_keys_between(tablet_id, channel, after, gen_step)
        {
            if hard || keep_state != KeepState::Keep {
                self.data.delete_key(&key, &mut batch);
            }
        }
        tracing::info!(
            tablet_id,
            channel,
            hard,
            %gen_step,
            dropped = batch.len(),
            "barrier raised"
        );
        self.engine.apply(batch)?;
        Ok(true)
    }

    /// Record collection issued up to `gen_step` on (channel, group)
    pub fn record_issued_gen_step(&mut self, channel: u8, group_id: u32, gen_step: GenStep) {
        self.barriers.record_issued(channel, group_id, gen_step);
    }

    pub fn update_keep_state(&mut self, key: Key, keep_state: KeepState) -> Result<()> {
        self.executor
            .submit(Transaction::UpdateKeepState { key, keep_state });
        self.run_pending()
    }

    // =========================================================================
    // Decommission
    // =========================================================================

    /// Everything up to `id` was imported in bulk
    pub fn set_last_assimilated(&mut self, id: BlobId) {
        self.decommit.set_last_assimilated(id);
    }

    pub fn finish_decommit(&mut self) {
        tracing::info!(group_id = ?self.decommit.group_id(), "decommission finished");
        self.decommit.finish();
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Queue the background load of the durable index
    pub fn start_load(&mut self) -> Result<()> {
        self.executor.submit(Transaction::Load);
        self.run_pending()
    }

    /// Run queued transactions until the queue is empty
    pub fn run_pending(&mut self) -> Result<()> {
        while let Some(tx) = self.executor.next() {
            let name = tx.name();
            let mut batch = Vec::new();
            let step = self.execute(tx, &mut batch)?;
            // rows merged while loading are kept even when the attempt reruns
            self.engine.apply(batch)?;

            match step {
                TxStep::Done => {}
                TxStep::Successor(tx) => self.executor.submit_successor(tx),
                TxStep::NotReady(tx) => {
                    let loaded = self.engine.load_pending()?;
                    tracing::trace!(tx = name, loaded, "transaction not ready");
                    if loaded == 0 {
                        return Err(DepotError::Storage(format!(
                            "{} transaction faulted without a pending page",
                            name
                        )));
                    }
                    self.executor.restart(tx);
                }
            }
        }
        Ok(())
    }

    fn execute(&mut self, tx: Transaction, batch: &mut Vec<Operation>) -> Result<TxStep> {
        match tx {
            Transaction::Load => self.execute_load(batch),

            Transaction::Resolve { request, cursor } => {
                let env = ResolveEnv {
                    engine: &self.engine,
                    barriers: &self.barriers,
                    tablet_id: self.tablet_id,
                    decommit_group_id: self.decommit.group_id(),
                    max_message_size: self.max_message_size,
                };
                match resolve::execute(&request, &cursor, &mut self.data, &env, batch)? {
                    ResolveAttempt::Complete(pages) => {
                        self.watchdog.finish(request.agent_id, request.request_id);
                        for page in pages {
                            self.send(request.agent_id, request.request_id, page);
                        }
                        Ok(TxStep::Done)
                    }
                    ResolveAttempt::Continue(cursor) => {
                        Ok(TxStep::Successor(Transaction::Resolve { request, cursor }))
                    }
                    ResolveAttempt::NotReady => {
                        Ok(TxStep::NotReady(Transaction::Resolve { request, cursor }))
                    }
                }
            }

            Transaction::Commit(request) => match self.execute_commit(&request, batch)? {
                CommitAttempt::Complete { statuses, advanced } => {
                    self.finish_commit(&request, statuses, advanced);
                    Ok(TxStep::Done)
                }
                CommitAttempt::NotReady => Ok(TxStep::NotReady(Transaction::Commit(request))),
            },

            Transaction::CommitRange(result) => self.execute_commit_range(result, batch),

            Transaction::UpdateKeepState { key, keep_state } => {
                if !self.preload(std::slice::from_ref(&key), batch)? {
                    return Ok(TxStep::NotReady(Transaction::UpdateKeepState { key, keep_state }));
                }
                self.data
                    .update_keep_state(key, keep_state, &self.barriers, batch)?;
                Ok(TxStep::Done)
            }
        }
    }

    fn execute_load(&mut self, batch: &mut Vec<Operation>) -> Result<TxStep> {
        let mut rows = 0;
        loop {
            let lower = self.data.last_loaded_key().map(Key::to_binary);
            let lower = match &lower {
                Some(key) => std::ops::Bound::Excluded(key.as_slice()),
                None => std::ops::Bound::Unbounded,
            };
            match self
                .engine
                .next_row(lower, std::ops::Bound::Unbounded, false)?
            {
                ScanStep::Row(key_bytes, value_bytes) => {
                    let key = self.data.parse_key(&key_bytes)?;
                    self.data
                        .add_data_on_load(key.clone(), &value_bytes, &self.barriers, batch)?;
                    self.data.set_last_loaded_key(key);
                    rows += 1;
                    if rows == LOAD_ROWS_PER_TX {
                        return Ok(TxStep::Successor(Transaction::Load));
                    }
                }
                ScanStep::End => {
                    self.data.set_loaded();
                    tracing::info!(keys = self.data.len(), "index loaded");
                    return Ok(TxStep::Done);
                }
                ScanStep::Fault if rows > 0 => return Ok(TxStep::Successor(Transaction::Load)),
                ScanStep::Fault => return Ok(TxStep::NotReady(Transaction::Load)),
            }
        }
    }

    fn execute_commit_range(&mut self, result: RangeResult, batch: &mut Vec<Operation>) -> Result<TxStep> {
        if result.is_ok() {
            let keys: Vec<Key> = result.blobs.iter().map(|blob| Key::Blob(blob.id)).collect();
            if !self.preload(&keys, batch)? {
                return Ok(TxStep::NotReady(Transaction::CommitRange(result)));
            }
            for blob in &result.blobs {
                self.data
                    .add_data_on_decommit(blob, &self.barriers, batch)?;
            }
        } else {
            tracing::warn!(fan_out_id = result.fan_out_id, status = ?result.status, "range query failed");
        }

        match self.decommit.on_range_done(result.fan_out_id, result.is_ok()) {
            FanInOutcome::Waiting => {}
            FanInOutcome::Ready(request) => self.executor.submit(Transaction::Resolve {
                request,
                cursor: ResolveCursor::default(),
            }),
            FanInOutcome::Failed(request) => {
                self.fail_resolve(&request, "errors in range queries".to_string())
            }
            FanInOutcome::Unknown => {
                tracing::warn!(fan_out_id = result.fan_out_id, "range result without a waiting resolve");
            }
        }
        Ok(TxStep::Done)
    }

    /// Read every key memory is not authoritative for into memory
    ///
    /// Returns false when a page must be loaded first; rows already read stay
    /// in memory so the rerun skips them.
    fn preload(&mut self, keys: &[Key], batch: &mut Vec<Operation>) -> Result<bool> {
        let mut ready = true;
        for key in keys {
            if self.data.find(key).is_some() || self.data.covers(key) {
                continue;
            }
            match self.engine.get(&key.to_binary())? {
                PageRead::Ready(Some(bytes)) => {
                    self.data
                        .add_data_on_load(key.clone(), &bytes, &self.barriers, batch)?;
                }
                PageRead::Ready(None) => {}
                PageRead::Fault => ready = false,
            }
        }
        Ok(ready)
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    fn send(&mut self, agent_id: AgentId, request_id: u64, message: DepotMessage) {
        self.outputs.push(DepotOutput::ToAgent {
            agent_id,
            envelope: Envelope::new(request_id, message),
        });
    }

    /// Report resolves running longer than the watchdog period
    pub fn check_watchdog(&mut self, now: Instant) -> usize {
        self.watchdog.check(now)
    }

    pub fn take_outputs(&mut self) -> Vec<DepotOutput> {
        std::mem::take(&mut self.outputs)
    }

    /// Persist the ledger record and flush the index
    pub fn close(self) -> Result<()> {
        self.engine.store_ledger(&self.ledger.record())?;
        self.engine.close()?;
        tracing::info!(generation = self.ledger.generation(), "depot closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn generation(&self) -> u32 {
        self.ledger.generation()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn barriers(&self) -> &BarrierServer {
        &self.barriers
    }

    pub fn engine(&self) -> &IndexEngine {
        &self.engine
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn pending_fan_ins(&self) -> usize {
        self.decommit.pending_contexts()
    }

    pub fn running_resolves(&self) -> usize {
        self.watchdog.running()
    }

    pub fn watchdog_period(&self) -> Duration {
        self.watchdog.period()
    }
}
