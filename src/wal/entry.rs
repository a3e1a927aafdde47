//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{DepotError, Result};

/// Header size: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// Mutations applied atomically by this entry
    pub operations: Vec<Operation>,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Index mutations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Insert or replace a row (binary key, encoded value)
    Upsert { key: Vec<u8>, value: Vec<u8> },

    /// Remove a row
    Delete { key: Vec<u8> },
}

#[derive(Serialize, Deserialize)]
struct EntryBody {
    operations: Vec<Operation>,
    timestamp: u64,
}

impl WalEntry {
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            lsn,
            operations,
            timestamp,
        }
    }

    /// Serialize to `[lsn][crc][len][data]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let body = EntryBody {
            operations: self.operations.clone(),
            timestamp: self.timestamp,
        };
        let data = bincode::serialize(&body)?;
        let len = u32::try_from(data.len())
            .map_err(|_| DepotError::WalWrite(format!("entry too large: {} bytes", data.len())))?;

        let crc = Self::compute_crc(self.lsn, len, &data);

        let mut out = Vec::with_capacity(HEADER_SIZE + data.len());
        out.extend_from_slice(&self.lsn.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&data);
        Ok(out)
    }

    /// Deserialize one entry from the start of `bytes`
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (lsn, crc, len) = Self::parse_header(bytes)?;

        let total = HEADER_SIZE + len as usize;
        if bytes.len() < total {
            return Err(DepotError::WalCorruption(format!(
                "truncated entry: expected {} bytes, got {}",
                total,
                bytes.len()
            )));
        }

        let data = &bytes[HEADER_SIZE..total];
        if Self::compute_crc(lsn, len, data) != crc {
            return Err(DepotError::WalCorruption(format!(
                "CRC mismatch at lsn {}",
                lsn
            )));
        }

        let body: EntryBody = bincode::deserialize(data)?;
        Ok(Self {
            lsn,
            operations: body.operations,
            timestamp: body.timestamp,
        })
    }

    /// Parse `(lsn, crc, data_len)` from a header
    pub fn parse_header(bytes: &[u8]) -> Result<(u64, u32, u32)> {
        if bytes.len() < HEADER_SIZE {
            return Err(DepotError::WalCorruption(format!(
                "header too small: {} bytes",
                bytes.len()
            )));
        }
        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&bytes[0..8]);
        let crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        Ok((u64::from_le_bytes(lsn), crc, len))
    }

    pub fn compute_crc(lsn: u64, len: u32, data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(&len.to_le_bytes());
        hasher.update(data);
        hasher.finalize()
    }
}
