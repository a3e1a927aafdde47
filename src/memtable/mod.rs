//! MemTable Module
//!
//! In-memory delta of the durable index: every mutation applied since the
//! last table flush.
//!
//! ## Responsibilities
//! - Hold recent upserts and deletes in key order
//! - Shadow the table on reads (a tombstone hides an older table row)
//! - Track size for flush triggers
//! - Ordered iteration for table creation
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock: ordered keys are required both for range
//! scans and for building the next table.

mod table;

pub use table::MemTable;

/// Entry stored in the MemTable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

impl MemTableEntry {
    fn payload_len(&self) -> usize {
        match self {
            MemTableEntry::Value(v) => v.len(),
            MemTableEntry::Tombstone => 0,
        }
    }
}
