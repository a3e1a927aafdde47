//! Logical keys
//!
//! A depot is configured either for blob-identity keys (the virtual group
//! looks like a regular blob group to its clients) or for arbitrary binary
//! keys. Both live in the same `Key` enum; ordering is defined per variant and
//! the binary encoding preserves it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DepotError, Result};
use crate::types::GenStep;

/// Encoded size of a [`BlobId`]: tablet (8) + gen (4) + step (4) + channel (1)
/// + cookie (4) + size (4)
pub const BLOB_ID_BINARY_LEN: usize = 25;

/// Identity of a blob as seen by clients of the virtual group
///
/// `tablet_id` is the owning entity: barriers are kept per
/// (tablet_id, channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId {
    pub tablet_id: u64,
    pub generation: u32,
    pub step: u32,
    pub channel: u8,
    pub cookie: u32,
    pub blob_size: u32,
}

impl BlobId {
    pub fn new(
        tablet_id: u64,
        generation: u32,
        step: u32,
        channel: u8,
        cookie: u32,
        blob_size: u32,
    ) -> Self {
        Self {
            tablet_id,
            generation,
            step,
            channel,
            cookie,
            blob_size,
        }
    }

    /// Smallest id owned by `tablet_id`
    pub fn min_for(tablet_id: u64) -> Self {
        Self::new(tablet_id, 0, 0, 0, 0, 0)
    }

    /// Largest id owned by `tablet_id`
    pub fn max_for(tablet_id: u64) -> Self {
        Self::new(tablet_id, u32::MAX, u32::MAX, u8::MAX, u32::MAX, u32::MAX)
    }

    pub fn gen_step(&self) -> GenStep {
        GenStep::new(self.generation, self.step)
    }

    /// Big-endian encoding; byte order equals tuple order
    pub fn to_bytes(&self) -> [u8; BLOB_ID_BINARY_LEN] {
        let mut out = [0u8; BLOB_ID_BINARY_LEN];
        out[0..8].copy_from_slice(&self.tablet_id.to_be_bytes());
        out[8..12].copy_from_slice(&self.generation.to_be_bytes());
        out[12..16].copy_from_slice(&self.step.to_be_bytes());
        out[16] = self.channel;
        out[17..21].copy_from_slice(&self.cookie.to_be_bytes());
        out[21..25].copy_from_slice(&self.blob_size.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BLOB_ID_BINARY_LEN {
            return Err(DepotError::MalformedKey(format!(
                "blob id must be {} bytes, got {}",
                BLOB_ID_BINARY_LEN,
                bytes.len()
            )));
        }
        let u32_at = |pos: usize| {
            u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
        };
        let mut tablet = [0u8; 8];
        tablet.copy_from_slice(&bytes[0..8]);

        Ok(Self {
            tablet_id: u64::from_be_bytes(tablet),
            generation: u32_at(8),
            step: u32_at(12),
            channel: bytes[16],
            cookie: u32_at(17),
            blob_size: u32_at(21),
        })
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}:{}:{}:{}:{}]",
            self.tablet_id, self.generation, self.step, self.channel, self.cookie, self.blob_size
        )
    }
}

/// How binary keys on the wire and on disk are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMode {
    /// Keys are encoded [`BlobId`]s
    #[default]
    BlobIds,
    /// Keys are opaque application bytes
    BinaryKeys,
}

/// A logical key
///
/// Variants compare by their own order; a `Blob` key sorts before any
/// `Binary` key (a depot never mixes the two).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    Blob(BlobId),
    Binary(Vec<u8>),
}

impl Key {
    pub fn from_binary(bytes: &[u8], mode: KeyMode) -> Result<Self> {
        match mode {
            KeyMode::BlobIds => Ok(Key::Blob(BlobId::from_bytes(bytes)?)),
            KeyMode::BinaryKeys => Ok(Key::Binary(bytes.to_vec())),
        }
    }

    pub fn to_binary(&self) -> Vec<u8> {
        match self {
            Key::Blob(id) => id.to_bytes().to_vec(),
            Key::Binary(bytes) => bytes.clone(),
        }
    }

    pub fn blob_id(&self) -> Option<&BlobId> {
        match self {
            Key::Blob(id) => Some(id),
            Key::Binary(_) => None,
        }
    }
}

impl From<BlobId> for Key {
    fn from(id: BlobId) -> Self {
        Key::Blob(id)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Blob(id) => write!(f, "{}", id),
            Key::Binary(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}
