//! Protocol Module
//!
//! Defines the wire protocol between agents and the depot.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────────────┬──────────┬──────────────────────┐
//! │ Tag (1)  │ Request Id (8)   │ Len (4)  │   bincode payload    │
//! └──────────┴──────────────────┴──────────┴──────────────────────┘
//! ```
//! Integers are big-endian. The request id correlates a response with the
//! request it answers; depot-initiated pushes carry an id from the depot's
//! own per-agent sequence and are echoed back in the acknowledgement.
//!
//! ### Agent → Depot Tags
//! - 0x01: REGISTER
//! - 0x02: ALLOCATE_IDS
//! - 0x03: COMMIT_BLOB_SEQ
//! - 0x04: RESOLVE
//! - 0x05: PUSH_NOTIFY_RESULT
//!
//! ### Depot → Agent Tags
//! - 0x81: REGISTER_RESULT
//! - 0x82: ALLOCATE_IDS_RESULT
//! - 0x83: COMMIT_BLOB_SEQ_RESULT
//! - 0x84: RESOLVE_RESULT
//! - 0x85: PUSH_NOTIFY

mod codec;
mod message;

pub use codec::{
    decode_frame, encode_frame, read_frame, write_frame, WireMessage, HEADER_SIZE,
    MAX_PAYLOAD_SIZE,
};
pub use message::{
    AgentMessage, BlockedTablet, ChannelRange, CommitItem, CommitStatus, DepotMessage, Envelope,
    GivenIdRange, InvalidatedStep, ResolveItem, ResolveStatus, ResolvedChainItem, ResolvedKey,
};
