//! Message definitions
//!
//! One sum type per direction; every handler matches them exhaustively.

use serde::{Deserialize, Serialize};

use crate::types::{BlobId, BlobLocator, ChannelKindEntry, ChannelKindId, SequenceId};

/// A message together with its correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    pub request_id: u64,
    pub message: M,
}

impl<M> Envelope<M> {
    pub fn new(request_id: u64, message: M) -> Self {
        Self {
            request_id,
            message,
        }
    }
}

// =============================================================================
// Agent → Depot
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentMessage {
    Register {
        virtual_group_id: u32,
        agent_instance_id: u64,
    },
    AllocateIds {
        kind: ChannelKindId,
        count: u32,
    },
    CommitBlobSeq {
        items: Vec<CommitItem>,
    },
    Resolve {
        items: Vec<ResolveItem>,
    },
    /// Acknowledges a `PushNotify`; carries the writes in flight that fell
    /// into the invalidated span
    PushNotifyResult {
        writes_in_flight: Vec<SequenceId>,
    },
}

impl AgentMessage {
    pub fn name(&self) -> &'static str {
        match self {
            AgentMessage::Register { .. } => "Register",
            AgentMessage::AllocateIds { .. } => "AllocateIds",
            AgentMessage::CommitBlobSeq { .. } => "CommitBlobSeq",
            AgentMessage::Resolve { .. } => "Resolve",
            AgentMessage::PushNotifyResult { .. } => "PushNotifyResult",
        }
    }
}

/// Proposed mapping of a key onto a freshly written blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitItem {
    /// Binary key, interpreted under the depot's key mode
    pub key: Vec<u8>,
    pub locator: BlobLocator,
    pub meta: Vec<u8>,
}

/// One range to scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveItem {
    pub begin_key: Option<Vec<u8>>,
    pub end_key: Option<Vec<u8>>,
    pub include_beginning: bool,
    pub include_ending: bool,
    pub reverse: bool,
    /// 0 means unlimited
    pub max_keys: u32,
    /// Echoed back on every key this item resolves
    pub cookie: Option<u64>,
    /// Owning tablet; required while the depot is decommissioning
    pub tablet_id: Option<u64>,
    pub must_restore_first: bool,
}

impl ResolveItem {
    /// Point lookup of one key
    pub fn key(key: Vec<u8>) -> Self {
        Self {
            begin_key: Some(key.clone()),
            end_key: Some(key),
            include_beginning: true,
            include_ending: true,
            ..Self::default()
        }
    }

    /// Inclusive range scan
    pub fn range(begin: Option<Vec<u8>>, end: Option<Vec<u8>>) -> Self {
        Self {
            begin_key: begin,
            end_key: end,
            include_beginning: true,
            include_ending: true,
            ..Self::default()
        }
    }
}

// =============================================================================
// Depot → Agent
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DepotMessage {
    RegisterResult {
        generation: u32,
        decommit_group_id: Option<u32>,
        channel_kinds: Vec<ChannelKindEntry>,
    },
    AllocateIdsResult {
        kind: ChannelKindId,
        generation: u32,
        given_id_range: Option<GivenIdRange>,
    },
    CommitBlobSeqResult {
        items: Vec<CommitStatus>,
    },
    ResolveResult {
        status: ResolveStatus,
        resolved_keys: Vec<ResolvedKey>,
    },
    PushNotify {
        invalidated_steps: Vec<InvalidatedStep>,
        blocked_tablets: Vec<BlockedTablet>,
    },
}

impl DepotMessage {
    pub fn name(&self) -> &'static str {
        match self {
            DepotMessage::RegisterResult { .. } => "RegisterResult",
            DepotMessage::AllocateIdsResult { .. } => "AllocateIdsResult",
            DepotMessage::CommitBlobSeqResult { .. } => "CommitBlobSeqResult",
            DepotMessage::ResolveResult { .. } => "ResolveResult",
            DepotMessage::PushNotify { .. } => "PushNotify",
        }
    }

    /// Whole-request resolve failure
    pub fn resolve_error(reason: impl Into<String>) -> Self {
        DepotMessage::ResolveResult {
            status: ResolveStatus::Error(reason.into()),
            resolved_keys: Vec::new(),
        }
    }
}

/// Half-open range `[begin, end)` of sequential numbers on one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRange {
    pub channel: u8,
    pub begin: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GivenIdRange {
    pub channel_ranges: Vec<ChannelRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitStatus {
    Ok,
    Error(String),
}

impl CommitStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommitStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveStatus {
    Ok,
    /// More pages follow
    Overrun,
    Error(String),
}

/// One segment of a resolved value, in physical terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedChainItem {
    pub group_id: u32,
    pub blob_id: BlobId,
    pub subrange_begin: u32,
    pub subrange_end: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedKey {
    pub cookie: Option<u64>,
    pub key: Vec<u8>,
    pub value_chain: Vec<ResolvedChainItem>,
    pub meta: Vec<u8>,
}

/// Everything up to and including `invalidated_step` of `generation` on
/// `channel` is being collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidatedStep {
    pub channel: u8,
    pub generation: u32,
    pub invalidated_step: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTablet {
    pub tablet_id: u64,
    pub blocked_generation: u32,
}
