//! Ledger Record
//!
//! The small piece of depot state that lives outside the index: the
//! generation the depot runs under and the next identifier to grant per
//! channel.
//!
//! ## File Format
//! ```text
//! ┌─────────┬─────────┬──────────────────┐
//! │ CRC (4) │ Len (4) │ bincode(record)  │
//! └─────────┴─────────┴──────────────────┘
//! ```
//! Written to a temporary file and renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DepotError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub generation: u32,
    /// channel → next sequential number to grant
    pub next_per_channel: BTreeMap<u8, u64>,
}

impl LedgerRecord {
    /// Load the record, `None` when the file does not exist yet
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        if bytes.len() < 8 {
            return Err(DepotError::Storage(format!(
                "ledger record {} truncated",
                path.display()
            )));
        }
        let crc = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let data = bytes.get(8..8 + len).ok_or_else(|| {
            DepotError::Storage(format!("ledger record {} truncated", path.display()))
        })?;
        if crc32fast::hash(data) != crc {
            return Err(DepotError::Storage(format!(
                "ledger record {} CRC mismatch",
                path.display()
            )));
        }
        Ok(Some(bincode::deserialize(data)?))
    }

    /// Atomically replace the record on disk
    pub fn store(&self, path: &Path) -> Result<()> {
        let data = bincode::serialize(self)?;
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&crc32fast::hash(&data).to_le_bytes())?;
            file.write_all(&(data.len() as u32).to_le_bytes())?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
