//! Tests for table files

use blobdepot::storage::{SSTableBuilder, SSTableReader};
use blobdepot::DepotError;
use tempfile::TempDir;

fn key(i: usize) -> Vec<u8> {
    format!("key{:04}", i).into_bytes()
}

fn value(i: usize) -> Vec<u8> {
    format!("value{}", i).into_bytes()
}

fn build_table(dir: &TempDir, rows: usize, rows_per_page: usize) -> std::path::PathBuf {
    let path = dir.path().join("table_000001.bpt");
    let mut builder = SSTableBuilder::new(&path, rows_per_page).unwrap();
    for i in 0..rows {
        builder.add(&key(i), &value(i)).unwrap();
    }
    let table = builder.finish().unwrap();
    assert_eq!(table.row_count(), rows as u64);
    path
}

#[test]
fn test_pages_are_cut_by_row_count() {
    let dir = TempDir::new().unwrap();
    let path = build_table(&dir, 10, 4);

    let mut reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.page_count(), 3);
    assert_eq!(reader.row_count(), 10);

    let last = reader.read_page(2).unwrap();
    assert_eq!(last.rows, vec![(key(8), value(8)), (key(9), value(9))]);
}

#[test]
fn test_iter_visits_rows_in_order() {
    let dir = TempDir::new().unwrap();
    let path = build_table(&dir, 25, 3);

    let mut reader = SSTableReader::open(&path).unwrap();
    let keys: Vec<Vec<u8>> = reader.iter().map(|row| row.unwrap().0).collect();
    assert_eq!(keys, (0..25).map(key).collect::<Vec<_>>());
}

#[test]
fn test_rows_out_of_order_are_rejected() {
    let dir = TempDir::new().unwrap();
    let mut builder = SSTableBuilder::new(&dir.path().join("t.bpt"), 4).unwrap();
    builder.add(&key(2), &value(2)).unwrap();

    assert!(matches!(
        builder.add(&key(1), &value(1)),
        Err(DepotError::Storage(_))
    ));
    assert!(builder.add(&key(2), &value(2)).is_err());
}

#[test]
fn test_empty_table_has_no_pages() {
    let dir = TempDir::new().unwrap();
    let path = build_table(&dir, 0, 4);

    let mut reader = SSTableReader::open(&path).unwrap();
    assert_eq!(reader.page_count(), 0);
    assert!(reader.iter().next().is_none());
}

#[test]
fn test_damaged_page_fails_crc() {
    let dir = TempDir::new().unwrap();
    let path = build_table(&dir, 4, 4);

    // first row starts right after the 14 byte header
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[14 + 8] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let mut reader = SSTableReader::open(&path).unwrap();
    assert!(matches!(reader.read_page(0), Err(DepotError::Storage(_))));
}

#[test]
fn test_bad_magic_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = build_table(&dir, 4, 4);

    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0] = b'X';
    std::fs::write(&path, &bytes).unwrap();

    assert!(SSTableReader::open(&path).is_err());
}
