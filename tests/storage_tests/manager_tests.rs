//! Tests for StorageManager and LedgerRecord

use std::collections::BTreeMap;
use std::ops::Bound;

use blobdepot::memtable::MemTable;
use blobdepot::storage::{LedgerRecord, PageRead, StorageManager};
use blobdepot::DepotError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn key(i: usize) -> Vec<u8> {
    format!("key{:04}", i).into_bytes()
}

fn value(i: usize) -> Vec<u8> {
    format!("value{}", i).into_bytes()
}

/// Storage holding keys 0, 2, 4, .. 2*(rows-1)
fn flushed_storage(dir: &TempDir, rows: usize, rows_per_page: usize, cache: usize) -> StorageManager {
    let storage = StorageManager::open(dir.path(), rows_per_page, cache).unwrap();
    let memtable = MemTable::new();
    for i in 0..rows {
        memtable.put(key(i * 2), value(i * 2));
    }
    storage.flush(&memtable).unwrap();
    storage
}

/// Retry a read until every page it needs is resident
fn read<T>(storage: &StorageManager, mut op: impl FnMut() -> PageRead<T>) -> T {
    for _ in 0..16 {
        match op() {
            PageRead::Ready(v) => return v,
            PageRead::Fault => {
                assert!(storage.load_pending().unwrap() > 0);
            }
        }
    }
    panic!("read kept faulting");
}

// =============================================================================
// Reads
// =============================================================================

#[test]
fn test_empty_storage_answers_without_fault() {
    let dir = TempDir::new().unwrap();
    let storage = StorageManager::open(dir.path(), 4, 2).unwrap();

    assert_eq!(storage.get(b"anything").unwrap(), PageRead::Ready(None));
    assert_eq!(storage.table_count(), 0);
}

#[test]
fn test_cold_page_faults_then_reads() {
    let dir = TempDir::new().unwrap();
    let storage = flushed_storage(&dir, 20, 4, 2);
    assert_eq!(storage.page_count(), 5);
    assert_eq!(storage.resident_pages(), 0);

    assert_eq!(storage.get(&key(10)).unwrap(), PageRead::Fault);
    assert!(storage.has_pending());
    assert_eq!(storage.load_pending().unwrap(), 1);
    assert_eq!(storage.get(&key(10)).unwrap(), PageRead::Ready(Some(value(10))));
    assert_eq!(storage.get(&key(11)).unwrap(), PageRead::Ready(None));
    assert_eq!(storage.fault_count(), 1);
}

#[test]
fn test_cache_is_bounded() {
    let dir = TempDir::new().unwrap();
    let storage = flushed_storage(&dir, 20, 4, 2);

    for i in [0, 8, 16, 24] {
        read(&storage, || storage.get(&key(i)).unwrap());
    }
    assert_eq!(storage.resident_pages(), 2);
}

#[test]
fn test_seek_forward_and_reverse() {
    let dir = TempDir::new().unwrap();
    let storage = flushed_storage(&dir, 20, 4, 8);

    let lower = key(7);
    let row = read(&storage, || {
        storage
            .seek(Bound::Excluded(&lower), Bound::Unbounded, false)
            .unwrap()
    });
    assert_eq!(row, Some((key(8), value(8))));

    let upper = key(8);
    let row = read(&storage, || {
        storage
            .seek(Bound::Unbounded, Bound::Excluded(&upper), true)
            .unwrap()
    });
    assert_eq!(row, Some((key(6), value(6))));

    // nothing between 8 and 10 exclusive
    let (lo, hi) = (key(8), key(10));
    let row = read(&storage, || {
        storage
            .seek(Bound::Excluded(&lo), Bound::Excluded(&hi), false)
            .unwrap()
    });
    assert_eq!(row, None);
}

#[test]
fn test_seek_crosses_page_boundary() {
    let dir = TempDir::new().unwrap();
    let storage = flushed_storage(&dir, 8, 2, 8);

    // key 6 is the last row of page 1; the next row lives on page 2
    let lower = key(6);
    let mut faults = 0;
    let row = loop {
        match storage
            .seek(Bound::Excluded(&lower), Bound::Unbounded, false)
            .unwrap()
        {
            PageRead::Ready(row) => break row,
            PageRead::Fault => {
                faults += 1;
                storage.load_pending().unwrap();
            }
        }
    };
    assert_eq!(row, Some((key(8), value(8))));
    assert_eq!(faults, 2);
}

// =============================================================================
// Flush
// =============================================================================

#[test]
fn test_flush_merges_memtable_into_table() {
    let dir = TempDir::new().unwrap();
    let storage = flushed_storage(&dir, 5, 2, 8);

    let memtable = MemTable::new();
    memtable.put(key(1), value(1));
    memtable.put(key(4), b"replaced".to_vec());
    memtable.delete(key(6));
    storage.flush(&memtable).unwrap();

    assert_eq!(storage.table_count(), 1);
    assert_eq!(storage.row_count(), 5);
    assert_eq!(read(&storage, || storage.get(&key(1)).unwrap()), Some(value(1)));
    assert_eq!(
        read(&storage, || storage.get(&key(4)).unwrap()),
        Some(b"replaced".to_vec())
    );
    assert_eq!(read(&storage, || storage.get(&key(6)).unwrap()), None);

    let tables = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(tables, 1);
}

#[test]
fn test_reopen_keeps_newest_table() {
    let dir = TempDir::new().unwrap();
    {
        let storage = flushed_storage(&dir, 6, 4, 2);
        let memtable = MemTable::new();
        memtable.put(key(100), value(100));
        storage.flush(&memtable).unwrap();
    }

    let storage = StorageManager::open(dir.path(), 4, 2).unwrap();
    assert_eq!(storage.row_count(), 7);
    assert_eq!(read(&storage, || storage.get(&key(100)).unwrap()), Some(value(100)));
}

// =============================================================================
// Ledger Record
// =============================================================================

#[test]
fn test_ledger_record_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.meta");
    assert_eq!(LedgerRecord::load(&path).unwrap(), None);

    let record = LedgerRecord {
        generation: 4,
        next_per_channel: BTreeMap::from([(0, 17), (3, 1 << 40)]),
    };
    record.store(&path).unwrap();
    assert_eq!(LedgerRecord::load(&path).unwrap(), Some(record));
}

#[test]
fn test_ledger_record_crc_mismatch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.meta");
    LedgerRecord {
        generation: 1,
        next_per_channel: BTreeMap::new(),
    }
    .store(&path)
    .unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    assert!(matches!(LedgerRecord::load(&path), Err(DepotError::Storage(_))));
}
