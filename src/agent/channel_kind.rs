//! Per-kind allocation state
//!
//! The agent's pool of leased identifiers for one channel kind, split per
//! physical channel, plus the identifiers already handed to writers.

use std::collections::{BTreeMap, BTreeSet};

use crate::protocol::GivenIdRange;
use crate::types::{ChannelGroup, ChannelKindId, IdRangeSet, SequenceId, MAX_INDEX};

/// An identifier taken from the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasedId {
    pub seq_id: SequenceId,
    /// Group backing the channel the id was leased on
    pub group_id: u32,
}

#[derive(Debug)]
pub struct ChannelKind {
    pub kind: ChannelKindId,
    channel_groups: Vec<ChannelGroup>,
    /// channel → slot in `channel_groups`
    channel_to_index: BTreeMap<u8, usize>,
    /// Leased and not yet handed out, per channel
    given_ids: BTreeMap<u8, IdRangeSet>,
    /// Handed to writers and not yet committed
    writes_in_flight: BTreeSet<SequenceId>,
    /// An AllocateIds request for this kind is outstanding
    pub id_alloc_in_flight: bool,
    next_slot: usize,
}

impl ChannelKind {
    pub fn new(kind: ChannelKindId) -> Self {
        Self {
            kind,
            channel_groups: Vec::new(),
            channel_to_index: BTreeMap::new(),
            given_ids: BTreeMap::new(),
            writes_in_flight: BTreeSet::new(),
            id_alloc_in_flight: false,
            next_slot: 0,
        }
    }

    /// Replace the channel assignment; leases on channels that left are
    /// dropped
    pub fn set_channels(&mut self, channel_groups: &[ChannelGroup]) {
        self.channel_groups = channel_groups.to_vec();
        self.channel_to_index = channel_groups
            .iter()
            .enumerate()
            .map(|(idx, cg)| (cg.channel, idx))
            .collect();

        let index = &self.channel_to_index;
        self.given_ids.retain(|channel, _| index.contains_key(channel));
        self.writes_in_flight
            .retain(|id| index.contains_key(&id.channel));
        self.next_slot = 0;
    }

    pub fn channels(&self) -> impl Iterator<Item = u8> + '_ {
        self.channel_groups.iter().map(|cg| cg.channel)
    }

    /// Identifiers available in the pool across all channels
    pub fn num_available(&self) -> u64 {
        self.given_ids.values().map(IdRangeSet::len).sum()
    }

    pub fn given_ids(&self, channel: u8) -> Option<&IdRangeSet> {
        self.given_ids.get(&channel)
    }

    pub fn writes_in_flight(&self) -> &BTreeSet<SequenceId> {
        &self.writes_in_flight
    }

    /// Merge a granted range into the pool; returns the number of ids added
    pub fn issue_given_id_range(&mut self, range: &GivenIdRange) -> u64 {
        let mut added = 0;
        for cr in &range.channel_ranges {
            if !self.channel_to_index.contains_key(&cr.channel) {
                tracing::warn!(
                    kind = %self.kind,
                    channel = cr.channel,
                    "granted range for a channel outside the kind, ignored"
                );
                continue;
            }
            let set = self.given_ids.entry(cr.channel).or_default();
            let before = set.len();
            set.add_range(cr.begin, cr.end);
            added += set.len() - before;
        }
        added
    }

    /// Take the next identifier, rotating over channels
    pub fn allocate(&mut self) -> Option<LeasedId> {
        let slots = self.channel_groups.len();
        for offset in 0..slots {
            let slot = (self.next_slot + offset) % slots;
            let ChannelGroup { channel, group_id } = self.channel_groups[slot];
            let Some(value) = self.given_ids.get_mut(&channel).and_then(IdRangeSet::pop_min) else {
                continue;
            };
            self.next_slot = (slot + 1) % slots;

            let seq_id = SequenceId::from_sequential_number(channel, value);
            self.writes_in_flight.insert(seq_id);
            return Some(LeasedId { seq_id, group_id });
        }
        None
    }

    /// Drop pool entries of `channel` up to and including
    /// `(generation, step)`; returns the number dropped
    pub fn trim(&mut self, channel: u8, generation: u32, step: u32) -> u64 {
        let valid_since = SequenceId::new(channel, generation, step, MAX_INDEX)
            .to_sequential_number()
            + 1;
        self.trim_below(channel, valid_since)
    }

    /// Drop pool entries of `channel` below sequential number `valid_since`
    pub fn trim_below(&mut self, channel: u8, valid_since: u64) -> u64 {
        self.given_ids
            .get_mut(&channel)
            .map_or(0, |set| set.trim(valid_since).len())
    }

    /// Remove and return the writes in flight of `channel` inside
    /// `[first, last]`
    pub fn take_writes_in_flight(&mut self, first: SequenceId, last: SequenceId) -> Vec<SequenceId> {
        let taken: Vec<SequenceId> = self.writes_in_flight.range(first..=last).copied().collect();
        for id in &taken {
            self.writes_in_flight.remove(id);
        }
        taken
    }

    /// Writes in flight of `channel` inside `[first, last]`, left in place
    ///
    /// They stay in flight until committed, so every later push over the
    /// same span reports them again.
    pub fn writes_in_flight_within(&self, first: SequenceId, last: SequenceId) -> Vec<SequenceId> {
        self.writes_in_flight.range(first..=last).copied().collect()
    }

    /// The write backed by `seq_id` finished (committed or rejected)
    pub fn complete_write(&mut self, seq_id: &SequenceId) -> bool {
        self.writes_in_flight.remove(seq_id)
    }
}
