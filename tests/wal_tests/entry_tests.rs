//! Tests for WAL entry framing

use blobdepot::wal::{Operation, WalEntry, HEADER_SIZE};
use blobdepot::DepotError;

fn batch() -> Vec<Operation> {
    vec![
        Operation::Upsert {
            key: b"key-a".to_vec(),
            value: b"value-a".to_vec(),
        },
        Operation::Delete {
            key: b"key-b".to_vec(),
        },
    ]
}

#[test]
fn test_entry_keeps_whole_batch() {
    let entry = WalEntry::new(7, batch());
    let bytes = entry.serialize().unwrap();

    let decoded = WalEntry::deserialize(&bytes).unwrap();
    assert_eq!(decoded.lsn, 7);
    assert_eq!(decoded.operations, batch());
    assert_eq!(decoded.timestamp, entry.timestamp);
}

#[test]
fn test_header_describes_payload() {
    let bytes = WalEntry::new(3, batch()).serialize().unwrap();
    let (lsn, crc, len) = WalEntry::parse_header(&bytes).unwrap();

    assert_eq!(lsn, 3);
    assert_eq!(HEADER_SIZE + len as usize, bytes.len());
    assert_eq!(crc, WalEntry::compute_crc(lsn, len, &bytes[HEADER_SIZE..]));
}

#[test]
fn test_flipped_payload_byte_is_detected() {
    let mut bytes = WalEntry::new(1, batch()).serialize().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    match WalEntry::deserialize(&bytes) {
        Err(DepotError::WalCorruption(reason)) => assert!(reason.contains("CRC")),
        other => panic!("expected corruption, got {:?}", other),
    }
}

#[test]
fn test_lsn_is_covered_by_checksum() {
    let mut bytes = WalEntry::new(1, batch()).serialize().unwrap();
    bytes[0] = 2;
    assert!(matches!(
        WalEntry::deserialize(&bytes),
        Err(DepotError::WalCorruption(_))
    ));
}

#[test]
fn test_truncated_entry_is_corruption() {
    let bytes = WalEntry::new(1, batch()).serialize().unwrap();
    assert!(matches!(
        WalEntry::deserialize(&bytes[..bytes.len() - 3]),
        Err(DepotError::WalCorruption(_))
    ));
    assert!(matches!(
        WalEntry::parse_header(&bytes[..HEADER_SIZE - 1]),
        Err(DepotError::WalCorruption(_))
    ));
}

#[test]
fn test_empty_batch_round_trips() {
    let bytes = WalEntry::new(9, Vec::new()).serialize().unwrap();
    let decoded = WalEntry::deserialize(&bytes).unwrap();
    assert!(decoded.operations.is_empty());
}
