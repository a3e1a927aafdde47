//! Values
//!
//! What a key resolves to: an ordered chain of physical blob segments, plus
//! the bookkeeping the commit and decommission paths need.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{BlobId, SequenceId};

/// Physical location of a blob written by an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocator {
    /// Storage group the blob lives in
    pub group_id: u32,
    /// Leased identifier the blob was written under
    pub seq_id: SequenceId,
    /// Blob size in bytes
    pub total_size: u32,
}

impl BlobLocator {
    pub fn new(group_id: u32, seq_id: SequenceId, total_size: u32) -> Self {
        Self {
            group_id,
            seq_id,
            total_size,
        }
    }

    /// Physical blob id of this location under the depot's own tablet id
    pub fn blob_id(&self, tablet_id: u64) -> BlobId {
        BlobId::new(
            tablet_id,
            self.seq_id.generation,
            self.seq_id.step,
            self.seq_id.channel,
            self.seq_id.index,
            self.total_size,
        )
    }
}

/// One piece of a value: a byte subrange of a physical blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSegment {
    pub locator: BlobLocator,
    pub subrange_begin: u32,
    pub subrange_end: u32,
}

impl ValueSegment {
    /// Segment covering the whole blob
    pub fn whole(locator: BlobLocator) -> Self {
        Self {
            locator,
            subrange_begin: 0,
            subrange_end: locator.total_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subrange_begin == self.subrange_end
    }
}

/// Retention state consulted by soft barriers
///
/// Only ever raised: `Default < Keep < DoNotKeep`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum KeepState {
    #[default]
    Default,
    Keep,
    DoNotKeep,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub value_chain: Vec<ValueSegment>,
    /// Blob in the predecessor group this key maps to until re-indexed
    pub original_blob: Option<BlobId>,
    pub meta: Vec<u8>,
    pub keep_state: KeepState,
}

impl Value {
    /// Value pointing at one freshly written blob
    pub fn from_locator(locator: BlobLocator, meta: Vec<u8>) -> Self {
        Self {
            value_chain: vec![ValueSegment::whole(locator)],
            original_blob: None,
            meta,
            keep_state: KeepState::Default,
        }
    }

    /// Nothing to read: no segments and no decommission fallback
    pub fn is_unreadable(&self) -> bool {
        self.value_chain.is_empty() && self.original_blob.is_none()
    }

    /// Merge a copy read back from the durable index into this one.
    ///
    /// Keep state only grows; an empty chain is filled from the durable copy.
    pub fn merge_loaded(&mut self, loaded: Value) {
        self.keep_state = self.keep_state.max(loaded.keep_state);
        if self.value_chain.is_empty() && !loaded.value_chain.is_empty() {
            self.value_chain = loaded.value_chain;
            self.original_blob = None;
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
