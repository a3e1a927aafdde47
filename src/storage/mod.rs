//! Storage Module
//!
//! Persistent storage layer for the key → value index.
//!
//! ## Responsibilities
//! - Persist rows in sorted, paged tables
//! - Keep a bounded set of pages resident and report faults for the rest
//! - Merge the memtable into a fresh table on flush
//! - Persist the ledger record
//!
//! A depot keeps at most one live table: every flush rewrites the table
//! with the memtable folded in, so a lookup touches at most one page.

mod manager;
mod meta;
mod page_cache;
mod sstable;

pub use manager::StorageManager;
pub use meta::LedgerRecord;
pub use page_cache::PageCache;
pub use sstable::{Page, PageInfo, Row, SSTable, SSTableBuilder, SSTableIterator, SSTableReader};

/// Outcome of a read that may need a page which is not resident
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRead<T> {
    Ready(T),
    /// The page was queued for loading; retry after `load_pending`
    Fault,
}

impl<T> PageRead<T> {
    pub fn is_fault(&self) -> bool {
        matches!(self, PageRead::Fault)
    }
}
