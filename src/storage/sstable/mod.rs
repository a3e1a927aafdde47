//! SSTable Module
//!
//! Paged, immutable, sorted index table. A page is the unit of residency:
//! readers load whole pages into the page cache and a scan that needs a
//! page which is not resident reports a fault instead of blocking.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "BDPT" (4) | Version: u16 (2) | Rows: u64 (8)  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Pages (variable)                                        │
//! │   [KeyLen: u32][ValLen: u32][Key][Value] ...            │
//! │   ... up to rows_per_page rows per page ...             │
//! ├─────────────────────────────────────────────────────────┤
//! │ Page Index (variable)                                   │
//! │   [KeyLen: u32][Offset: u64][Len: u32][CRC: u32]        │
//! │   [Rows: u32][FirstKey]                                 │
//! │   ... repeated for each page ...                        │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                       │
//! │   IndexOffset: u64 (8) | IndexCRC: u32 (4) | Pages (4)  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Tables hold live rows only: deletes are resolved when the memtable is
//! merged into the next table.

mod builder;
mod iterator;
mod reader;

use std::path::PathBuf;

pub use builder::SSTableBuilder;
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying a blobdepot table file
pub(crate) const MAGIC: &[u8; 4] = b"BDPT";

/// Current table format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + RowCount (8) = 14 bytes
pub(crate) const HEADER_SIZE: u64 = 14;

/// Footer size: IndexOffset (8) + IndexCRC (4) + PageCount (4) = 16 bytes
pub(crate) const FOOTER_SIZE: u64 = 16;

/// One key/value row
pub type Row = (Vec<u8>, Vec<u8>);

/// A decoded page, sorted by key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub rows: Vec<Row>,
}

/// Location and summary of one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub first_key: Vec<u8>,
    pub offset: u64,
    pub len: u32,
    pub crc: u32,
    pub row_count: u32,
}

// =============================================================================
// SSTable Metadata
// =============================================================================

/// Summary of a finished table
#[derive(Debug, Clone)]
pub struct SSTable {
    pub path: PathBuf,
    pub row_count: u64,
    pub page_count: usize,
    pub file_size: u64,
}

impl SSTable {
    pub fn row_count(&self) -> u64 {
        self.row_count
    }
}

/// Decode `[KeyLen][ValLen][Key][Value]*` page bytes
pub(crate) fn decode_rows(bytes: &[u8]) -> Option<Vec<Row>> {
    let mut rows = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let key_len = read_u32(bytes, pos)? as usize;
        let val_len = read_u32(bytes, pos + 4)? as usize;
        pos += 8;
        let key = bytes.get(pos..pos + key_len)?.to_vec();
        pos += key_len;
        let value = bytes.get(pos..pos + val_len)?.to_vec();
        pos += val_len;
        rows.push((key, value));
    }
    Some(rows)
}

pub(crate) fn read_u32(bytes: &[u8], pos: usize) -> Option<u32> {
    let raw = bytes.get(pos..pos + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub(crate) fn read_u64(bytes: &[u8], pos: usize) -> Option<u64> {
    let raw = bytes.get(pos..pos + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Some(u64::from_le_bytes(buf))
}
