//! Engine Module
//!
//! The durable key → value index behind the depot.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, and Storage
//! - Apply a transaction's mutations atomically
//! - Point lookups and single-row scan steps that report page faults
//! - Trigger flushes when the MemTable is full
//! - Manage crash recovery on startup
//! - Persist the ledger record next to the index

use std::fs;
use std::ops::Bound;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::Result;
use crate::memtable::{MemTable, MemTableEntry};
use crate::storage::{LedgerRecord, PageRead, StorageManager};
use crate::wal::{Operation, WalRecovery, WalWriter};

/// One step of a directional scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStep {
    /// Next live row in scan direction
    Row(Vec<u8>, Vec<u8>),
    /// Nothing left inside the bounds
    End,
    /// A page must be loaded before the scan can continue
    Fault,
}

/// The durable index
///
/// ## Concurrency Model
/// The depot drives the engine from a single thread; the locks only keep
/// accessors usable from diagnostics.
///
/// - **Writes** (apply/flush): serialized by `write_lock`, which orders
///   write_lock → WAL → memtable → storage
/// - **Reads** (get/next_row): memtable read lock, then storage
pub struct IndexEngine {
    ledger_path: PathBuf,
    memtable_size_limit: usize,

    /// Write-ahead log for durability (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// Mutations since the last flush (internal RwLock)
    memtable: MemTable,

    /// Live table and page cache
    storage: StorageManager,

    /// Serializes write operations (apply/flush)
    write_lock: Mutex<()>,
}

impl IndexEngine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const TABLE_DIR: &'static str = "tables";
    const LEDGER_FILENAME: &'static str = "ledger.meta";

    /// Open or create the index under `config.data_dir`
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Load the live table
    /// 3. Replay the WAL and fold it into a fresh table
    /// 4. Ready to serve requests
    pub fn open(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let storage_dir = config.data_dir.join(Self::TABLE_DIR);
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        let ledger_path = config.data_dir.join(Self::LEDGER_FILENAME);

        let storage = StorageManager::open(
            &storage_dir,
            config.rows_per_page,
            config.page_cache_capacity,
        )?;
        let memtable = MemTable::new();

        if wal_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&wal_path)?;
            if recovery.entries_recovered > 0 || recovery.entries_corrupted > 0 {
                tracing::info!(
                    recovered = recovery.entries_recovered,
                    corrupted = recovery.entries_corrupted,
                    last_lsn = recovery.last_lsn,
                    "WAL recovery"
                );
            }

            for entry in entries {
                Self::apply_to_memtable(&memtable, entry.operations);
            }

            // Recovered mutations become durable in the table before the WAL
            // is reused
            if !memtable.is_empty() {
                tracing::info!(
                    entries = memtable.entry_count(),
                    "flushing recovered entries to table"
                );
                storage.flush(&memtable)?;
                memtable.clear();
            }
        }

        let mut wal = WalWriter::open(&wal_path, config.wal_sync_strategy)?;
        wal.truncate()?;

        Ok(Self {
            ledger_path,
            memtable_size_limit: config.memtable_size_limit,
            wal: Mutex::new(wal),
            memtable,
            storage,
            write_lock: Mutex::new(()),
        })
    }

    /// Point lookup
    ///
    /// Search order:
    /// 1. MemTable (most recent writes, tombstones included)
    /// 2. Live table (may fault)
    pub fn get(&self, key: &[u8]) -> Result<PageRead<Option<Vec<u8>>>> {
        if let Some(entry) = self.memtable.get(key) {
            return Ok(PageRead::Ready(match entry {
                MemTableEntry::Value(value) => Some(value),
                MemTableEntry::Tombstone => None,
            }));
        }
        self.storage.get(key)
    }

    /// Next live row strictly inside `(lower, upper)` in scan direction
    ///
    /// Forward scans return the smallest key, reverse scans the largest.
    pub fn next_row(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        reverse: bool,
    ) -> Result<ScanStep> {
        let mut lower = owned(lower);
        let mut upper = owned(upper);

        loop {
            let mem = self
                .memtable
                .first_in_range(borrowed(&lower), borrowed(&upper), reverse);
            let disk = match self
                .storage
                .seek(borrowed(&lower), borrowed(&upper), reverse)?
            {
                PageRead::Ready(row) => row,
                PageRead::Fault => return Ok(ScanStep::Fault),
            };

            let from_memtable = match (&mem, &disk) {
                (None, None) => return Ok(ScanStep::End),
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some((mkey, _)), Some((dkey, _))) => {
                    if reverse {
                        mkey >= dkey
                    } else {
                        mkey <= dkey
                    }
                }
            };

            if !from_memtable {
                if let Some((key, value)) = disk {
                    return Ok(ScanStep::Row(key, value));
                }
                return Ok(ScanStep::End);
            }

            match mem {
                Some((key, MemTableEntry::Value(value))) => return Ok(ScanStep::Row(key, value)),
                Some((key, MemTableEntry::Tombstone)) => {
                    // Deleted row: step past it
                    if reverse {
                        upper = Bound::Excluded(key);
                    } else {
                        lower = Bound::Excluded(key);
                    }
                }
                None => return Ok(ScanStep::End),
            }
        }
    }

    /// Apply one transaction's mutations atomically
    ///
    /// Steps:
    /// 1. Acquire write lock
    /// 2. Append one WAL entry holding every mutation
    /// 3. Apply to MemTable
    /// 4. Flush if the MemTable is over its limit
    pub fn apply(&self, operations: Vec<Operation>) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }
        let _write_guard = self.write_lock.lock();

        let lsn = self.wal.lock().append(operations.clone())?;
        tracing::trace!(lsn, mutations = operations.len(), "applied index batch");
        Self::apply_to_memtable(&self.memtable, operations);

        if self.memtable.should_flush(self.memtable_size_limit) {
            self.flush_internal()?;
        }
        Ok(())
    }

    fn apply_to_memtable(memtable: &MemTable, operations: Vec<Operation>) {
        for op in operations {
            match op {
                Operation::Upsert { key, value } => {
                    memtable.put(key, value);
                }
                Operation::Delete { key } => {
                    memtable.delete(key);
                }
            }
        }
    }

    /// Load every page a faulted read asked for
    pub fn load_pending(&self) -> Result<usize> {
        self.storage.load_pending()
    }

    /// Flush memtable to disk (public API)
    ///
    /// Forces a flush regardless of memtable size
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.flush_internal()
    }

    /// Internal flush implementation (called with write lock held)
    fn flush_internal(&self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        self.storage.flush(&self.memtable)?;
        self.memtable.clear();

        // Entries are now durable in the table
        self.wal.lock().truncate()?;
        Ok(())
    }

    /// Close the engine gracefully
    pub fn close(self) -> Result<()> {
        self.flush()?;
        self.wal.lock().sync()?;
        Ok(())
    }

    // =========================================================================
    // Ledger Record
    // =========================================================================

    pub fn load_ledger(&self) -> Result<Option<LedgerRecord>> {
        LedgerRecord::load(&self.ledger_path)
    }

    pub fn store_ledger(&self, record: &LedgerRecord) -> Result<()> {
        record.store(&self.ledger_path)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.entry_count()
    }

    pub fn table_count(&self) -> usize {
        self.storage.table_count()
    }

    pub fn table_rows(&self) -> u64 {
        self.storage.row_count()
    }

    pub fn page_count(&self) -> usize {
        self.storage.page_count()
    }

    pub fn resident_pages(&self) -> usize {
        self.storage.resident_pages()
    }

    pub fn fault_count(&self) -> u64 {
        self.storage.fault_count()
    }
}

fn owned(bound: Bound<&[u8]>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(k) => Bound::Included(k.to_vec()),
        Bound::Excluded(k) => Bound::Excluded(k.to_vec()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn borrowed(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
