//! Agent Allocator
//!
//! Per-client state machine that keeps each channel kind supplied with
//! leased identifiers so writers never wait on a round trip to the depot.
//!
//! ## Message Flow
//! ```text
//!   connect ──► Register ─────────────► RegisterResult ──► trim + refill
//!   pool < low watermark ──► AllocateIds ──► AllocateIdsResult ──► pool
//!   issue(commit/resolve) ──────────────► result ──► completion queue
//!   ◄── PushNotify ── trim ──► PushNotifyResult (same link as commits)
//! ```
//!
//! The agent never blocks: outgoing messages go through a [`DepotLink`],
//! incoming ones are handed to [`Agent::handle_response`], and results for
//! external callers are collected with [`Agent::take_completions`].

mod channel_kind;
mod link;
mod request;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub use channel_kind::{ChannelKind, LeasedId};
pub use link::{DepotLink, QueueLink};
pub use request::{RequestContext, RequestPayload, RequestSender, RequestTable};

use crate::config::Config;
use crate::error::{DepotError, Result};
use crate::protocol::{
    AgentMessage, BlockedTablet, DepotMessage, Envelope, GivenIdRange, InvalidatedStep,
    ResolveStatus,
};
use crate::types::{ChannelKindEntry, ChannelKindId, SequenceId, MAX_INDEX};

/// Result delivered to an external caller
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Response(DepotMessage),
    /// The link dropped before the request finished
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub caller: u64,
    pub request_id: u64,
    pub outcome: Outcome,
}

pub struct Agent<L: DepotLink> {
    virtual_group_id: u32,
    instance_id: u64,
    low_watermark: u64,
    allocate_batch: u32,

    link: L,
    next_request_id: u64,
    requests: RequestTable,
    completions: VecDeque<Completion>,

    /// Depot generation from the last RegisterResult (0 = never registered)
    generation: u32,
    decommit_group_id: Option<u32>,
    channel_kinds: BTreeMap<ChannelKindId, ChannelKind>,
    channel_to_kind: BTreeMap<u8, ChannelKindId>,
    /// tablet id → blocked generation
    blocked_tablets: BTreeMap<u64, u32>,
}

impl<L: DepotLink> Agent<L> {
    pub fn new(config: &Config, instance_id: u64, link: L) -> Self {
        Self {
            virtual_group_id: config.virtual_group_id,
            instance_id,
            low_watermark: config.low_watermark,
            allocate_batch: config.allocate_batch,
            link,
            next_request_id: 1,
            requests: RequestTable::new(),
            completions: VecDeque::new(),
            generation: 0,
            decommit_group_id: None,
            channel_kinds: BTreeMap::new(),
            channel_to_kind: BTreeMap::new(),
            blocked_tablets: BTreeMap::new(),
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open the link and register with the depot
    pub fn connect(&mut self) -> Result<()> {
        self.link.connect()?;

        let request_id = self.take_request_id();
        tracing::debug!(
            virtual_group_id = self.virtual_group_id,
            request_id,
            instance_id = self.instance_id,
            "registering with depot"
        );
        self.link.send(Envelope::new(
            request_id,
            AgentMessage::Register {
                virtual_group_id: self.virtual_group_id,
                agent_instance_id: self.instance_id,
            },
        ))?;
        self.requests
            .register(request_id, RequestContext::new(RequestSender::Agent, None));
        Ok(())
    }

    /// The link dropped: fail every caller request and forget refills
    pub fn on_disconnect(&mut self) {
        let pending = self.requests.drain();
        tracing::info!(
            virtual_group_id = self.virtual_group_id,
            cancelled = pending.len(),
            "depot link lost"
        );

        for (request_id, context) in pending {
            if let RequestSender::Caller(caller) = context.sender {
                self.completions.push_back(Completion {
                    caller,
                    request_id,
                    outcome: Outcome::Disconnected,
                });
            }
        }

        for kind in self.channel_kinds.values_mut() {
            kind.id_alloc_in_flight = false;
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Dispatch one message received from the depot
    ///
    /// `Protocol` errors are fatal for the agent.
    pub fn handle_response(&mut self, envelope: Envelope<DepotMessage>) -> Result<()> {
        let Envelope {
            request_id,
            message,
        } = envelope;

        if let DepotMessage::PushNotify {
            invalidated_steps,
            blocked_tablets,
        } = message
        {
            return self.on_push_notify(request_id, &invalidated_steps, &blocked_tablets);
        }

        let Some(context) = self.requests.get(request_id).cloned() else {
            tracing::debug!(
                virtual_group_id = self.virtual_group_id,
                request_id,
                message = message.name(),
                "response to a request no longer in flight, ignored"
            );
            return Ok(());
        };

        // A resolve keeps its context until the last page
        let last_page = !matches!(
            message,
            DepotMessage::ResolveResult {
                status: ResolveStatus::Overrun,
                ..
            }
        );
        if last_page {
            self.requests.remove(request_id);
        }

        match (context.sender, context.payload, message) {
            (
                RequestSender::Agent,
                None,
                DepotMessage::RegisterResult {
                    generation,
                    decommit_group_id,
                    channel_kinds,
                },
            ) => self.on_register_result(generation, decommit_group_id, &channel_kinds),

            (
                RequestSender::Agent,
                Some(RequestPayload::AllocateIds { kind: requested }),
                DepotMessage::AllocateIdsResult {
                    kind,
                    generation,
                    given_id_range,
                },
            ) => self.on_allocate_result(requested, kind, generation, given_id_range),

            (
                RequestSender::Caller(caller),
                Some(RequestPayload::CommitBlobSeq { seq_ids }),
                message @ DepotMessage::CommitBlobSeqResult { .. },
            ) => {
                for seq_id in &seq_ids {
                    self.complete_write(seq_id);
                }
                self.completions.push_back(Completion {
                    caller,
                    request_id,
                    outcome: Outcome::Response(message),
                });
                Ok(())
            }

            (RequestSender::Caller(caller), None, message @ DepotMessage::ResolveResult { .. }) => {
                self.completions.push_back(Completion {
                    caller,
                    request_id,
                    outcome: Outcome::Response(message),
                });
                Ok(())
            }

            (sender, payload, message) => Err(DepotError::Protocol(format!(
                "request {} ({:?}, {:?}) answered with {}",
                request_id,
                sender,
                payload,
                message.name()
            ))),
        }
    }

    /// Rebuild the channel-kind table after (re)registration
    pub fn on_register_result(
        &mut self,
        generation: u32,
        decommit_group_id: Option<u32>,
        table: &[ChannelKindEntry],
    ) -> Result<()> {
        tracing::debug!(
            virtual_group_id = self.virtual_group_id,
            generation,
            ?decommit_group_id,
            kinds = table.len(),
            "registered"
        );
        self.generation = generation;
        self.decommit_group_id = decommit_group_id;

        let mut vanished: BTreeSet<ChannelKindId> = self.channel_kinds.keys().copied().collect();
        self.channel_to_kind.clear();

        for entry in table {
            vanished.remove(&entry.kind);
            let kind = self
                .channel_kinds
                .entry(entry.kind)
                .or_insert_with(|| ChannelKind::new(entry.kind));
            kind.set_channels(&entry.channel_groups);
            for cg in &entry.channel_groups {
                self.channel_to_kind.insert(cg.channel, entry.kind);
            }
        }

        for kind in vanished {
            tracing::info!(virtual_group_id = self.virtual_group_id, %kind, "kind vanished");
            self.channel_kinds.remove(&kind);
        }

        // Anything leased under an older generation is no longer trusted
        for (&channel, kind_id) in &self.channel_to_kind {
            let Some(kind) = self.channel_kinds.get_mut(kind_id) else {
                continue;
            };
            let valid_since = SequenceId::first_of(channel, generation).to_sequential_number();
            kind.trim_below(channel, valid_since);
            if generation > 0 {
                kind.take_writes_in_flight(
                    SequenceId::first_of(channel, 0),
                    SequenceId::last_of(channel, generation - 1),
                );
            }
        }

        self.refill_all()
    }

    /// Request more ids for `kind` when it runs low
    pub fn maybe_refill(&mut self, kind_id: ChannelKindId) -> Result<()> {
        let Some(kind) = self.channel_kinds.get(&kind_id) else {
            return Ok(());
        };
        if kind.id_alloc_in_flight
            || kind.num_available() >= self.low_watermark
            || !self.link.is_connected()
        {
            return Ok(());
        }

        let available = kind.num_available();
        let request_id = self.take_request_id();
        tracing::debug!(
            virtual_group_id = self.virtual_group_id,
            kind = %kind_id,
            available,
            request_id,
            "requesting ids"
        );
        self.link.send(Envelope::new(
            request_id,
            AgentMessage::AllocateIds {
                kind: kind_id,
                count: self.allocate_batch,
            },
        ))?;
        self.requests.register(
            request_id,
            RequestContext::new(
                RequestSender::Agent,
                Some(RequestPayload::AllocateIds { kind: kind_id }),
            ),
        );
        if let Some(kind) = self.channel_kinds.get_mut(&kind_id) {
            kind.id_alloc_in_flight = true;
        }
        Ok(())
    }

    fn refill_all(&mut self) -> Result<()> {
        let kinds: Vec<ChannelKindId> = self.channel_kinds.keys().copied().collect();
        for kind in kinds {
            self.maybe_refill(kind)?;
        }
        Ok(())
    }

    /// Merge a granted range
    ///
    /// The response must answer the outstanding request for `requested`
    /// under the current generation; anything else is a protocol violation.
    pub fn on_allocate_result(
        &mut self,
        requested: ChannelKindId,
        kind_id: ChannelKindId,
        generation: u32,
        given_id_range: Option<GivenIdRange>,
    ) -> Result<()> {
        if kind_id != requested {
            return Err(DepotError::Protocol(format!(
                "allocate result for kind {} answers request for {}",
                kind_id, requested
            )));
        }
        if generation != self.generation {
            return Err(DepotError::Protocol(format!(
                "allocate result generation {} differs from registered generation {}",
                generation, self.generation
            )));
        }
        let kind = self.channel_kinds.get_mut(&kind_id).ok_or_else(|| {
            DepotError::Protocol(format!("allocate result for unknown kind {}", kind_id))
        })?;
        if !kind.id_alloc_in_flight {
            return Err(DepotError::Protocol(format!(
                "allocate result for kind {} without a request in flight",
                kind_id
            )));
        }
        kind.id_alloc_in_flight = false;

        let added = given_id_range
            .as_ref()
            .map_or(0, |range| kind.issue_given_id_range(range));
        tracing::debug!(
            virtual_group_id = self.virtual_group_id,
            kind = %kind_id,
            added,
            available = kind.num_available(),
            "ids granted"
        );
        Ok(())
    }

    /// Trim the invalidated spans and acknowledge on the commit link
    pub fn on_push_notify(
        &mut self,
        request_id: u64,
        invalidated_steps: &[InvalidatedStep],
        blocked_tablets: &[BlockedTablet],
    ) -> Result<()> {
        for bt in blocked_tablets {
            let entry = self.blocked_tablets.entry(bt.tablet_id).or_insert(0);
            *entry = (*entry).max(bt.blocked_generation);
        }

        let mut writes_in_flight = Vec::new();
        for item in invalidated_steps {
            if item.generation != self.generation {
                return Err(DepotError::Protocol(format!(
                    "push notify for generation {} while registered under {}",
                    item.generation, self.generation
                )));
            }
            let kind_id = self.channel_to_kind.get(&item.channel).copied().ok_or_else(|| {
                DepotError::Protocol(format!("push notify for unknown channel {}", item.channel))
            })?;
            let Some(kind) = self.channel_kinds.get_mut(&kind_id) else {
                continue;
            };

            let before = kind.num_available();
            kind.trim(item.channel, item.generation, item.invalidated_step);
            let reported = kind.writes_in_flight_within(
                SequenceId::new(item.channel, item.generation, 0, 0),
                SequenceId::new(item.channel, item.generation, item.invalidated_step, MAX_INDEX),
            );
            tracing::debug!(
                virtual_group_id = self.virtual_group_id,
                channel = item.channel,
                invalidated_step = item.invalidated_step,
                available_before = before,
                available_after = kind.num_available(),
                writes_in_flight = reported.len(),
                "trimmed channel"
            );
            writes_in_flight.extend(reported);
        }

        // Must share the link with commits so the ack cannot overtake one
        self.link.send(Envelope::new(
            request_id,
            AgentMessage::PushNotifyResult { writes_in_flight },
        ))?;

        self.refill_all()
    }

    // =========================================================================
    // Caller API
    // =========================================================================

    /// Take one identifier of `kind` for a write
    pub fn next_sequence_id(&mut self, kind_id: ChannelKindId) -> Result<Option<LeasedId>> {
        let leased = self
            .channel_kinds
            .get_mut(&kind_id)
            .and_then(ChannelKind::allocate);
        self.maybe_refill(kind_id)?;
        Ok(leased)
    }

    /// Send a commit or resolve on behalf of `caller`; returns the request id
    pub fn issue(&mut self, message: AgentMessage, caller: u64) -> Result<u64> {
        let payload = match &message {
            AgentMessage::CommitBlobSeq { items } => Some(RequestPayload::CommitBlobSeq {
                seq_ids: items.iter().map(|item| item.locator.seq_id).collect(),
            }),
            AgentMessage::Resolve { .. } => None,
            other => {
                return Err(DepotError::Protocol(format!(
                    "{} is not a caller request",
                    other.name()
                )))
            }
        };
        if !self.link.is_connected() {
            return Err(DepotError::Disconnected);
        }

        let request_id = self.take_request_id();
        tracing::debug!(
            virtual_group_id = self.virtual_group_id,
            request_id,
            caller,
            message = message.name(),
            "issue"
        );
        self.link.send(Envelope::new(request_id, message))?;
        self.requests.register(
            request_id,
            RequestContext::new(RequestSender::Caller(caller), payload),
        );
        Ok(request_id)
    }

    pub fn take_completions(&mut self) -> Vec<Completion> {
        self.completions.drain(..).collect()
    }

    fn complete_write(&mut self, seq_id: &SequenceId) {
        if let Some(kind) = self
            .channel_to_kind
            .get(&seq_id.channel)
            .and_then(|kind_id| self.channel_kinds.get_mut(kind_id))
        {
            kind.complete_write(seq_id);
        }
    }

    fn take_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn decommit_group_id(&self) -> Option<u32> {
        self.decommit_group_id
    }

    pub fn channel_kind(&self, kind: ChannelKindId) -> Option<&ChannelKind> {
        self.channel_kinds.get(&kind)
    }

    pub fn num_available(&self, kind: ChannelKindId) -> u64 {
        self.channel_kinds.get(&kind).map_or(0, ChannelKind::num_available)
    }

    pub fn blocked_generation(&self, tablet_id: u64) -> Option<u32> {
        self.blocked_tablets.get(&tablet_id).copied()
    }

    pub fn requests_in_flight(&self) -> usize {
        self.requests.len()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}
