//! Tests for WalWriter, WalReader and WalRecovery on real files

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use blobdepot::config::WalSyncStrategy;
use blobdepot::wal::{Operation, WalReader, WalRecovery, WalWriter};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("test.wal");
    (temp_dir, wal_path)
}

fn upsert(i: usize) -> Vec<Operation> {
    vec![Operation::Upsert {
        key: format!("key{:04}", i).into_bytes(),
        value: format!("value{}", i).into_bytes(),
    }]
}

fn write_entries(path: &PathBuf, count: usize, strategy: WalSyncStrategy) {
    let mut writer = WalWriter::open(path, strategy).unwrap();
    for i in 0..count {
        writer.append(upsert(i)).unwrap();
    }
    writer.sync().unwrap();
}

// =============================================================================
// Writer
// =============================================================================

#[test]
fn test_lsn_is_sequential_from_one() {
    let (_temp, path) = setup_temp_wal();
    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();

    assert_eq!(writer.current_lsn(), 0);
    assert_eq!(writer.append(upsert(0)).unwrap(), 1);
    assert_eq!(writer.append(upsert(1)).unwrap(), 2);
    assert_eq!(writer.current_lsn(), 2);
}

#[test]
fn test_reopen_continues_lsn() {
    let (_temp, path) = setup_temp_wal();
    write_entries(&path, 5, WalSyncStrategy::EveryNEntries { count: 2 });

    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
    assert_eq!(writer.current_lsn(), 5);
    assert_eq!(writer.append(upsert(5)).unwrap(), 6);
}

#[test]
fn test_truncate_empties_log() {
    let (_temp, path) = setup_temp_wal();
    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
    writer.append(upsert(0)).unwrap();
    writer.truncate().unwrap();

    assert_eq!(writer.current_lsn(), 0);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    assert_eq!(writer.append(upsert(1)).unwrap(), 1);
}

// =============================================================================
// Reader
// =============================================================================

#[test]
fn test_reader_returns_entries_in_order() {
    let (_temp, path) = setup_temp_wal();
    write_entries(&path, 10, WalSyncStrategy::EveryWrite);

    let lsns: Vec<u64> = WalReader::open(&path)
        .unwrap()
        .entries()
        .map(|entry| entry.unwrap().lsn)
        .collect();
    assert_eq!(lsns, (1..=10).collect::<Vec<u64>>());
}

#[test]
fn test_reader_on_empty_file() {
    let (_temp, path) = setup_temp_wal();
    File::create(&path).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    assert!(reader.next_entry().unwrap().is_none());
    assert_eq!(reader.position(), 0);
}

// =============================================================================
// Recovery
// =============================================================================

#[test]
fn test_recover_clean_log() {
    let (_temp, path) = setup_temp_wal();
    write_entries(&path, 4, WalSyncStrategy::EveryWrite);

    let (entries, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(result.entries_recovered, 4);
    assert_eq!(result.entries_corrupted, 0);
    assert_eq!(result.last_lsn, 4);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_truncates_partial_tail() {
    let (_temp, path) = setup_temp_wal();
    write_entries(&path, 3, WalSyncStrategy::EveryWrite);
    let clean_len = std::fs::metadata(&path).unwrap().len();

    // torn write: half a header
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[1, 2, 3, 4, 5]).unwrap();
    drop(file);

    let (entries, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(result.entries_corrupted, 1);
    assert!(result.was_truncated);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len);
}

#[test]
fn test_recover_stops_at_first_corrupt_entry() {
    let (_temp, path) = setup_temp_wal();
    write_entries(&path, 3, WalSyncStrategy::EveryWrite);

    let mut reader = WalReader::open(&path).unwrap();
    reader.next_entry().unwrap();
    reader.next_entry().unwrap();
    let second_end = reader.position() as usize;
    drop(reader);

    // damage the last byte of the second entry
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[second_end - 1] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let (entries, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(result.last_lsn, 1);
    assert!(result.was_truncated);

    let verified = WalRecovery::verify(&path).unwrap();
    assert_eq!(verified.entries_recovered, 1);
    assert_eq!(verified.entries_corrupted, 0);
}
