//! Storage Manager
//!
//! Owns the live table and its page cache and coordinates reads and flushes.
//!
//! ## Responsibilities
//! - Discover the live table on startup (stale tables are removed)
//! - Answer point lookups and directional seeks, faulting on cold pages
//! - Load pending pages
//! - Rewrite the table from the memtable on flush

use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::memtable::{MemTable, MemTableEntry};

use super::{Page, PageCache, PageRead, Row, SSTable, SSTableBuilder, SSTableReader};

/// Manages the storage layer
///
/// ## Concurrency:
/// - `table`: RwLock; page reads take the write lock because the reader
///   seeks its file handle
/// - `cache`: Mutex around the page cache
/// - `next_table_id`: Atomic counter (lock-free)
pub struct StorageManager {
    /// Directory where tables are stored
    data_dir: PathBuf,

    rows_per_page: usize,

    /// Live table, if anything was ever flushed
    table: RwLock<Option<SSTableReader>>,

    cache: Mutex<PageCache>,

    /// Next ID for creating new tables (atomic, lock-free)
    next_table_id: AtomicU64,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Discover existing table files
    /// 3. Open the newest one; delete older leftovers of interrupted flushes
    pub fn open(path: &Path, rows_per_page: usize, cache_capacity: usize) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut table_ids: Vec<u64> = Vec::new();
        for entry in fs::read_dir(path)? {
            let file_path = entry?.path();
            if file_path.is_file() {
                if let Some(id) = Self::parse_table_id(&file_path) {
                    table_ids.push(id);
                }
            }
        }
        table_ids.sort_unstable();

        let table = match table_ids.last() {
            Some(&id) => Some(SSTableReader::open(&Self::table_path_with_dir(path, id))?),
            None => None,
        };
        for &stale in table_ids.iter().rev().skip(1) {
            let stale_path = Self::table_path_with_dir(path, stale);
            tracing::info!(path = %stale_path.display(), "removing stale table");
            fs::remove_file(stale_path)?;
        }

        let next_id = table_ids.last().map(|&id| id + 1).unwrap_or(1);

        Ok(Self {
            data_dir: path.to_path_buf(),
            rows_per_page: rows_per_page.max(1),
            table: RwLock::new(table),
            cache: Mutex::new(PageCache::new(cache_capacity)),
            next_table_id: AtomicU64::new(next_id),
        })
    }

    /// Get a value by key
    ///
    /// Returns `Ready(None)` when the key is not in the table and `Fault`
    /// when the page that would hold it is not resident.
    pub fn get(&self, key: &[u8]) -> Result<PageRead<Option<Vec<u8>>>> {
        let page_no = {
            let table = self.table.read();
            let Some(reader) = table.as_ref() else {
                return Ok(PageRead::Ready(None));
            };
            if reader.page_count() == 0 {
                return Ok(PageRead::Ready(None));
            }
            reader.page_for_forward(Bound::Included(key))
        };

        let Some(page) = self.resident(page_no) else {
            return Ok(PageRead::Fault);
        };
        let found = page
            .rows
            .binary_search_by(|(k, _)| k.as_slice().cmp(key))
            .ok()
            .map(|idx| page.rows[idx].1.clone());
        Ok(PageRead::Ready(found))
    }

    /// First table row inside `(lower, upper)` in scan direction
    pub fn seek(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        reverse: bool,
    ) -> Result<PageRead<Option<Row>>> {
        let (start, page_count) = {
            let table = self.table.read();
            let Some(reader) = table.as_ref() else {
                return Ok(PageRead::Ready(None));
            };
            let start = if reverse {
                reader.page_for_reverse(upper)
            } else {
                Some(reader.page_for_forward(lower))
            };
            (start, reader.page_count())
        };
        let Some(mut page_no) = start else {
            return Ok(PageRead::Ready(None));
        };

        loop {
            if page_no >= page_count {
                return Ok(PageRead::Ready(None));
            }
            let Some(page) = self.resident(page_no) else {
                return Ok(PageRead::Fault);
            };

            if reverse {
                let idx = page
                    .rows
                    .partition_point(|(k, _)| below_upper(k, upper));
                if idx > 0 {
                    let row = &page.rows[idx - 1];
                    return Ok(PageRead::Ready(
                        above_lower(&row.0, lower).then(|| row.clone()),
                    ));
                }
                if page_no == 0 {
                    return Ok(PageRead::Ready(None));
                }
                page_no -= 1;
            } else {
                let idx = page
                    .rows
                    .partition_point(|(k, _)| !above_lower(k, lower));
                if let Some(row) = page.rows.get(idx) {
                    return Ok(PageRead::Ready(
                        below_upper(&row.0, upper).then(|| row.clone()),
                    ));
                }
                page_no += 1;
            }
        }
    }

    /// Resident page or a recorded fault
    fn resident(&self, page_no: usize) -> Option<std::sync::Arc<Page>> {
        let mut cache = self.cache.lock();
        let page = cache.get(page_no);
        if page.is_none() {
            cache.request(page_no);
        }
        page
    }

    /// Load every page a faulted read asked for; returns the number loaded
    pub fn load_pending(&self) -> Result<usize> {
        let pending = self.cache.lock().take_pending();
        if pending.is_empty() {
            return Ok(0);
        }

        let mut table = self.table.write();
        let Some(reader) = table.as_mut() else {
            return Ok(0);
        };
        let mut loaded = Vec::with_capacity(pending.len());
        for page_no in pending {
            if page_no < reader.page_count() {
                loaded.push((page_no, reader.read_page(page_no)?));
            }
        }

        let count = loaded.len();
        self.cache.lock().insert_loaded(loaded);
        tracing::debug!(pages = count, "loaded pending pages");
        Ok(count)
    }

    /// Whether any read is waiting for a page
    pub fn has_pending(&self) -> bool {
        self.cache.lock().has_pending()
    }

    /// Rewrite the live table with the memtable folded in
    ///
    /// Deletes drop rows; upserts replace them. The previous table file is
    /// removed once the new one is in place.
    pub fn flush(&self, memtable: &MemTable) -> Result<SSTable> {
        let id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        let path = self.table_path(id);

        let mut table = self.table.write();
        let mut builder = SSTableBuilder::new(&path, self.rows_per_page)?;
        let mut delta = memtable.iter().into_iter().peekable();

        if let Some(reader) = table.as_mut() {
            for row in reader.iter() {
                let (key, value) = row?;
                while let Some((mkey, _)) = delta.peek() {
                    if mkey.as_slice() >= key.as_slice() {
                        break;
                    }
                    if let Some((mkey, MemTableEntry::Value(v))) = delta.next() {
                        builder.add(&mkey, &v)?;
                    }
                }
                let shadowed = matches!(delta.peek(), Some((mkey, _)) if *mkey == key);
                if !shadowed {
                    builder.add(&key, &value)?;
                } else if let Some((mkey, MemTableEntry::Value(v))) = delta.next() {
                    builder.add(&mkey, &v)?;
                }
            }
        }
        for (mkey, entry) in delta {
            if let MemTableEntry::Value(v) = entry {
                builder.add(&mkey, &v)?;
            }
        }
        let metadata = builder.finish()?;

        let reader = SSTableReader::open(&path)?;
        if let Some(old) = table.replace(reader) {
            fs::remove_file(old.path())?;
        }
        self.cache.lock().clear();

        tracing::debug!(
            rows = metadata.row_count,
            pages = metadata.page_count,
            path = %metadata.path.display(),
            "flushed index table"
        );
        Ok(metadata)
    }

    /// Get the number of live tables (0 or 1)
    pub fn table_count(&self) -> usize {
        usize::from(self.table.read().is_some())
    }

    pub fn row_count(&self) -> u64 {
        self.table.read().as_ref().map_or(0, |t| t.row_count())
    }

    pub fn page_count(&self) -> usize {
        self.table.read().as_ref().map_or(0, |t| t.page_count())
    }

    pub fn resident_pages(&self) -> usize {
        self.cache.lock().resident_count()
    }

    pub fn fault_count(&self) -> u64 {
        self.cache.lock().fault_count()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn table_path(&self, id: u64) -> PathBuf {
        Self::table_path_with_dir(&self.data_dir, id)
    }

    fn table_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("table_{:06}.bpt", id))
    }

    /// Parse table ID from filename
    /// "table_000042.bpt" → Some(42)
    fn parse_table_id(path: &Path) -> Option<u64> {
        if path.extension()? != "bpt" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        name.strip_prefix("table_")?.parse().ok()
    }
}

fn above_lower(key: &[u8], lower: Bound<&[u8]>) -> bool {
    match lower {
        Bound::Included(l) => key >= l,
        Bound::Excluded(l) => key > l,
        Bound::Unbounded => true,
    }
}

fn below_upper(key: &[u8], upper: Bound<&[u8]>) -> bool {
    match upper {
        Bound::Included(u) => key <= u,
        Bound::Excluded(u) => key < u,
        Bound::Unbounded => true,
    }
}
