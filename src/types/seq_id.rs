//! Sequence identifiers
//!
//! A `SequenceId` names a location a blob *may* be written to. Inside one
//! channel it maps onto a single `u64` so leases can be kept as range sets.
//!
//! ## Sequential Number Layout
//! ```text
//! ┌──────────────────┬───────────────┬───────────────┐
//! │ Generation (24)  │  Step (20)    │  Index (20)   │
//! └──────────────────┴───────────────┴───────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

pub const INDEX_BITS: u32 = 20;
pub const STEP_BITS: u32 = 20;
pub const GENERATION_BITS: u32 = 24;

pub const MAX_INDEX: u32 = (1 << INDEX_BITS) - 1;
pub const MAX_STEP: u32 = (1 << STEP_BITS) - 1;
pub const MAX_GENERATION: u32 = (1 << GENERATION_BITS) - 1;

/// Identifier of a potential blob location
///
/// Ordering is lexicographic over (channel, generation, step, index), which
/// within a single channel agrees with the sequential number ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceId {
    pub channel: u8,
    pub generation: u32,
    pub step: u32,
    pub index: u32,
}

impl SequenceId {
    pub fn new(channel: u8, generation: u32, step: u32, index: u32) -> Self {
        Self {
            channel,
            generation,
            step,
            index,
        }
    }

    /// First identifier of `generation` on `channel`
    pub fn first_of(channel: u8, generation: u32) -> Self {
        Self::new(channel, generation, 0, 0)
    }

    /// Last identifier of `generation` on `channel`
    pub fn last_of(channel: u8, generation: u32) -> Self {
        Self::new(channel, generation, MAX_STEP, MAX_INDEX)
    }

    /// Collapse generation/step/index into one comparable number
    pub fn to_sequential_number(&self) -> u64 {
        (u64::from(self.generation.min(MAX_GENERATION)) << (STEP_BITS + INDEX_BITS))
            | (u64::from(self.step.min(MAX_STEP)) << INDEX_BITS)
            | u64::from(self.index.min(MAX_INDEX))
    }

    /// Inverse of [`SequenceId::to_sequential_number`]
    pub fn from_sequential_number(channel: u8, value: u64) -> Self {
        Self {
            channel,
            generation: ((value >> (STEP_BITS + INDEX_BITS)) as u32) & MAX_GENERATION,
            step: ((value >> INDEX_BITS) as u32) & MAX_STEP,
            index: (value as u32) & MAX_INDEX,
        }
    }

    pub fn gen_step(&self) -> GenStep {
        GenStep::new(self.generation, self.step)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}:{}:{}:{}}}",
            self.channel, self.generation, self.step, self.index
        )
    }
}

/// A (generation, step) boundary
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GenStep {
    pub generation: u32,
    pub step: u32,
}

impl GenStep {
    pub fn new(generation: u32, step: u32) -> Self {
        Self { generation, step }
    }

    pub fn as_u64(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.step)
    }
}

impl From<SequenceId> for GenStep {
    fn from(id: SequenceId) -> Self {
        id.gen_step()
    }
}

impl fmt::Display for GenStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generation, self.step)
    }
}
