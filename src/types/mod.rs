//! Identifier & Channel Model
//!
//! Plain value types shared by the agent and the depot. Nothing in here
//! performs I/O or owns mutable protocol state.
//!
//! ## Contents
//! - `SequenceId` / `GenStep`: where a blob may be written, and the boundary
//!   unit used by barriers and collection
//! - `IdRangeSet`: compact set of leased sequential numbers
//! - `Key` / `BlobId`: logical keys, ordered per variant
//! - `Value` / `BlobLocator`: the value chain a key resolves to
//! - `ChannelKindId` / `ChannelGroup`: channel classification

mod channel;
mod key;
mod range_set;
mod seq_id;
mod value;

pub use channel::{ChannelGroup, ChannelKindEntry, ChannelKindId};
pub use key::{BlobId, Key, KeyMode, BLOB_ID_BINARY_LEN};
pub use range_set::IdRangeSet;
pub use seq_id::{
    GenStep, SequenceId, GENERATION_BITS, INDEX_BITS, MAX_GENERATION, MAX_INDEX, MAX_STEP,
    STEP_BITS,
};
pub use value::{BlobLocator, KeepState, Value, ValueSegment};
