//! Collection barriers
//!
//! Two independent boundaries live here:
//! - client barriers per (tablet, channel): blobs at or below a soft barrier
//!   may only be kept when explicitly retained, blobs at or below a hard
//!   barrier are gone
//! - the gen/step the depot itself issued for collection per
//!   (channel, group), which decides whether a leased id may already have
//!   been reclaimed

use std::collections::BTreeMap;

use crate::types::{BlobId, GenStep, SequenceId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Barrier {
    pub soft: Option<GenStep>,
    pub hard: Option<GenStep>,
}

/// Where a blob sits relative to its owner's barrier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarrierRelation {
    pub under_soft: bool,
    pub under_hard: bool,
}

impl BarrierRelation {
    pub fn is_under_any(&self) -> bool {
        self.under_soft || self.under_hard
    }
}

#[derive(Debug, Default)]
pub struct BarrierServer {
    /// (tablet_id, channel) → barrier
    barriers: BTreeMap<(u64, u8), Barrier>,
    /// (channel, group_id) → last issued collection gen/step
    issued: BTreeMap<(u8, u32), GenStep>,
}

impl BarrierServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a client barrier; barriers never move backwards
    pub fn set_barrier(&mut self, tablet_id: u64, channel: u8, hard: bool, gen_step: GenStep) -> bool {
        let barrier = self.barriers.entry((tablet_id, channel)).or_default();
        let slot = if hard {
            &mut barrier.hard
        } else {
            &mut barrier.soft
        };
        match *slot {
            Some(current) if current >= gen_step => false,
            _ => {
                *slot = Some(gen_step);
                true
            }
        }
    }

    pub fn barrier(&self, tablet_id: u64, channel: u8) -> Barrier {
        self.barriers
            .get(&(tablet_id, channel))
            .copied()
            .unwrap_or_default()
    }

    pub fn relation(&self, id: &BlobId) -> BarrierRelation {
        let barrier = self.barrier(id.tablet_id, id.channel);
        let gen_step = id.gen_step();
        BarrierRelation {
            under_soft: barrier.soft.map_or(false, |b| gen_step <= b),
            under_hard: barrier.hard.map_or(false, |b| gen_step <= b),
        }
    }

    /// Record that collection up to `gen_step` was issued for (channel, group)
    pub fn record_issued(&mut self, channel: u8, group_id: u32, gen_step: GenStep) {
        let issued = self.issued.entry((channel, group_id)).or_default();
        *issued = (*issued).max(gen_step);
    }

    pub fn issued(&self, channel: u8, group_id: u32) -> Option<GenStep> {
        self.issued.get(&(channel, group_id)).copied()
    }

    /// Whether the blob at `id` in `group_id` may already have been collected
    pub fn can_be_collected(&self, group_id: u32, id: &SequenceId) -> bool {
        self.issued(id.channel, group_id)
            .map_or(false, |issued| id.gen_step() <= issued)
    }
}
