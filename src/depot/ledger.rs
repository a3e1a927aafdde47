//! Allocation Ledger
//!
//! Server-side mirror of every agent's allocation window. Per channel it
//! keeps the union of ranges granted and not yet committed plus the next
//! sequential number to grant; per agent it keeps that agent's share.
//!
//! ```text
//!   grant ──► agent share ∪ channel window grow
//!   commit / trim ──► both shrink
//!   least expected = min(channel window) or next id when empty
//! ```
//!
//! The least expected id only moves forward; collection may proceed up to
//! it.

use std::collections::BTreeMap;

use crate::error::{DepotError, Result};
use crate::protocol::ChannelRange;
use crate::storage::LedgerRecord;
use crate::types::{
    ChannelKindEntry, ChannelKindId, IdRangeSet, SequenceId, MAX_GENERATION, MAX_INDEX, MAX_STEP,
};

/// Connection-scoped identity of an agent inside the depot
pub type AgentId = u64;

#[derive(Debug)]
pub struct ChannelState {
    pub channel: u8,
    pub kind: ChannelKindId,
    pub group_id: u32,
    /// Granted to some agent and not committed
    pub given_id_ranges: IdRangeSet,
    /// Next sequential number to grant
    pub next_seq: u64,
    /// Highest step invalidated for collection this generation
    pub invalidated_step: Option<u32>,
    least_expected: u64,
}

impl ChannelState {
    fn current_least_expected(&self) -> u64 {
        self.given_id_ranges.min().unwrap_or(self.next_seq)
    }

    pub fn least_expected(&self) -> SequenceId {
        SequenceId::from_sequential_number(self.channel, self.least_expected)
    }
}

#[derive(Debug, Default)]
pub struct AgentRecord {
    pub instance_id: Option<u64>,
    pub connected: bool,
    /// This agent's share of every channel window
    pub given_id_ranges: BTreeMap<u8, IdRangeSet>,
    /// channel → highest step already pushed to this agent
    pub invalidated_step_in_flight: BTreeMap<u8, u32>,
    /// push id → (channel → invalidated step) awaiting acknowledgement
    pub push_requests: BTreeMap<u64, BTreeMap<u8, u32>>,
    pub last_push_id: u64,
}

pub struct Ledger {
    generation: u32,
    channel_kinds: Vec<ChannelKindEntry>,
    channels: BTreeMap<u8, ChannelState>,
    /// kind → next slot in its channel list
    kind_slots: BTreeMap<ChannelKindId, usize>,
    agents: BTreeMap<AgentId, AgentRecord>,
}

impl Ledger {
    /// Start a new generation on top of the persisted record
    pub fn open(previous: Option<&LedgerRecord>, channel_kinds: &[ChannelKindEntry]) -> Result<Self> {
        let generation = previous.map_or(1, |record| record.generation + 1);
        if generation > MAX_GENERATION {
            return Err(DepotError::Config(format!(
                "generation {} exceeds the id layout",
                generation
            )));
        }

        let mut channels = BTreeMap::new();
        for entry in channel_kinds {
            for cg in &entry.channel_groups {
                let first = SequenceId::first_of(cg.channel, generation).to_sequential_number();
                let state = ChannelState {
                    channel: cg.channel,
                    kind: entry.kind,
                    group_id: cg.group_id,
                    given_id_ranges: IdRangeSet::new(),
                    next_seq: first,
                    invalidated_step: None,
                    least_expected: first,
                };
                if channels.insert(cg.channel, state).is_some() {
                    return Err(DepotError::Config(format!(
                        "channel {} assigned to more than one kind",
                        cg.channel
                    )));
                }
            }
        }

        Ok(Self {
            generation,
            channel_kinds: channel_kinds.to_vec(),
            channels,
            kind_slots: BTreeMap::new(),
            agents: BTreeMap::new(),
        })
    }

    pub fn record(&self) -> LedgerRecord {
        LedgerRecord {
            generation: self.generation,
            next_per_channel: self
                .channels
                .values()
                .map(|ch| (ch.channel, ch.next_seq))
                .collect(),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn channel_kinds(&self) -> &[ChannelKindEntry] {
        &self.channel_kinds
    }

    pub fn channel(&self, channel: u8) -> Option<&ChannelState> {
        self.channels.get(&channel)
    }

    pub fn channel_mut(&mut self, channel: u8) -> Option<&mut ChannelState> {
        self.channels.get_mut(&channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelState> {
        self.channels.values()
    }

    pub fn agent(&self, agent_id: AgentId) -> Option<&AgentRecord> {
        self.agents.get(&agent_id)
    }

    pub fn agent_mut(&mut self, agent_id: AgentId) -> &mut AgentRecord {
        self.agents.entry(agent_id).or_default()
    }

    pub fn agents(&self) -> impl Iterator<Item = (&AgentId, &AgentRecord)> {
        self.agents.iter()
    }

    // =========================================================================
    // Agent lifecycle
    // =========================================================================

    /// Attach an agent; a new instance id forfeits the previous share
    ///
    /// Returns the channels whose least expected id advanced.
    pub fn register_agent(&mut self, agent_id: AgentId, instance_id: u64) -> Vec<SequenceId> {
        let agent = self.agents.entry(agent_id).or_default();
        agent.connected = true;

        let forfeited = match agent.instance_id {
            Some(previous) if previous != instance_id => {
                tracing::info!(agent_id, previous, instance_id, "agent restarted, dropping its leases");
                std::mem::take(&mut agent.given_id_ranges)
            }
            _ => BTreeMap::new(),
        };
        agent.instance_id = Some(instance_id);

        let mut advanced = Vec::new();
        for (channel, ranges) in forfeited {
            if let Some(state) = self.channels.get_mut(&channel) {
                state.given_id_ranges.subtract(&ranges);
            }
            advanced.extend(self.refresh_least_expected(channel));
        }
        advanced
    }

    /// The link dropped; outstanding pushes are forgotten and resent on
    /// the next registration
    pub fn disconnect_agent(&mut self, agent_id: AgentId) {
        if let Some(agent) = self.agents.get_mut(&agent_id) {
            agent.connected = false;
            agent.invalidated_step_in_flight.clear();
            agent.push_requests.clear();
        }
    }

    // =========================================================================
    // Grants and commits
    // =========================================================================

    /// Grant up to `count` ids of `kind` to `agent_id`
    ///
    /// Channels of the kind are tried round-robin; `None` when the kind is
    /// unknown or every channel ran out of ids for this generation.
    pub fn allocate(&mut self, agent_id: AgentId, kind: ChannelKindId, count: u32) -> Option<ChannelRange> {
        if count == 0 {
            return None;
        }
        let channels: Vec<u8> = self
            .channel_kinds
            .iter()
            .find(|entry| entry.kind == kind)
            .map(|entry| entry.channel_groups.iter().map(|cg| cg.channel).collect())?;
        if channels.is_empty() {
            return None;
        }

        let start = self.kind_slots.get(&kind).copied().unwrap_or(0);
        for offset in 0..channels.len() {
            let slot = (start + offset) % channels.len();
            let channel = channels[slot];
            let Some(state) = self.channels.get_mut(&channel) else {
                continue;
            };

            let generation_end =
                SequenceId::new(channel, self.generation, MAX_STEP, MAX_INDEX).to_sequential_number() + 1;
            if state.next_seq >= generation_end {
                tracing::warn!(channel, generation = self.generation, "channel exhausted for this generation");
                continue;
            }
            let begin = state.next_seq;
            let end = begin.saturating_add(u64::from(count)).min(generation_end);
            state.next_seq = end;
            state.given_id_ranges.add_range(begin, end);

            self.agents
                .entry(agent_id)
                .or_default()
                .given_id_ranges
                .entry(channel)
                .or_default()
                .add_range(begin, end);
            self.kind_slots.insert(kind, (slot + 1) % channels.len());

            return Some(ChannelRange {
                channel,
                begin,
                end,
            });
        }
        None
    }

    /// Drop a committed id from the windows
    ///
    /// Returns the new least expected id when it advanced.
    pub fn mark_committed(&mut self, agent_id: AgentId, seq_id: &SequenceId) -> Option<SequenceId> {
        let value = seq_id.to_sequential_number();
        if let Some(agent) = self.agents.get_mut(&agent_id) {
            if let Some(ranges) = agent.given_id_ranges.get_mut(&seq_id.channel) {
                ranges.remove_point(value);
            }
        }

        let state = self.channels.get_mut(&seq_id.channel)?;
        match state.given_id_ranges.remove_point(value) {
            Some(true) => self.refresh_least_expected(seq_id.channel),
            Some(false) => None,
            None => {
                tracing::debug!(%seq_id, "committed id not in the channel window");
                None
            }
        }
    }

    /// Trim `agent_id`'s share of `channel` through `invalidated_step`,
    /// keeping the reported writes in flight
    pub fn trim_agent(
        &mut self,
        agent_id: AgentId,
        channel: u8,
        invalidated_step: u32,
        writes_in_flight: &[SequenceId],
    ) -> Option<SequenceId> {
        let valid_since = SequenceId::new(channel, self.generation, invalidated_step, MAX_INDEX)
            .to_sequential_number()
            + 1;
        let agent = self.agents.entry(agent_id).or_default();
        let agent_ranges = agent.given_id_ranges.entry(channel).or_default();
        let trimmed = agent_ranges.trim(valid_since);

        let state = self.channels.get_mut(&channel)?;
        state.given_id_ranges.subtract(&trimmed);

        for id in writes_in_flight.iter().filter(|id| id.channel == channel) {
            let value = id.to_sequential_number();
            agent_ranges.add_point(value);
            state.given_id_ranges.add_point(value);
        }

        tracing::debug!(
            agent_id,
            channel,
            invalidated_step,
            trimmed = trimmed.len(),
            window = %state.given_id_ranges,
            "trimmed agent share"
        );
        self.refresh_least_expected(channel)
    }

    /// Move the channel's next id beyond `step`; returns false for unknown
    /// channels
    pub fn invalidate_step(&mut self, channel: u8, step: u32) -> bool {
        let generation = self.generation;
        let Some(state) = self.channels.get_mut(&channel) else {
            return false;
        };
        let next = SequenceId::from_sequential_number(channel, state.next_seq);
        if next.generation == generation && next.step <= step && step < MAX_STEP {
            state.next_seq = SequenceId::new(channel, generation, step + 1, 0).to_sequential_number();
        }
        state.invalidated_step = Some(state.invalidated_step.map_or(step, |s| s.max(step)));
        true
    }

    /// Recompute the least expected id; returns it when it advanced
    pub fn refresh_least_expected(&mut self, channel: u8) -> Option<SequenceId> {
        let state = self.channels.get_mut(&channel)?;
        let current = state.current_least_expected();
        if current > state.least_expected {
            state.least_expected = current;
            Some(state.least_expected())
        } else {
            None
        }
    }
}
