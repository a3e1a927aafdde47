//! Index write-ahead log
//!
//! Every depot transaction lands here as one entry before the memtable sees
//! it. Replaying the log after a crash rebuilds whatever was not yet flushed
//! into a table file.
//!
//! ## Entry Layout
//! ```text
//!   offset  0        8        12       16
//!           ┌────────┬────────┬────────┬──────────────────────┐
//!           │ lsn    │ crc32  │ len    │ bincode Vec<Operation>│
//!           └────────┴────────┴────────┴──────────────────────┘
//! ```
//!
//! The checksum spans lsn, len and payload. Replay stops at the first entry
//! that fails it; a transaction is applied whole or not at all.

mod entry;
mod writer;
mod reader;
mod recovery;

pub use entry::{WalEntry, Operation, HEADER_SIZE};
pub use writer::WalWriter;
pub use reader::{WalReader, WalIterator};
pub use recovery::{WalRecovery, RecoveryResult};
