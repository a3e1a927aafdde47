//! Tests for keys, values and channel kinds

use blobdepot::types::{
    BlobId, BlobLocator, ChannelKindEntry, ChannelKindId, KeepState, Key, KeyMode, SequenceId,
    Value, ValueSegment, BLOB_ID_BINARY_LEN,
};

fn locator(index: u32) -> BlobLocator {
    BlobLocator::new(2001, SequenceId::new(2, 1, 0, index), 100)
}

#[test]
fn test_blob_key_binary_round_trip() {
    let id = BlobId::new(72075186224037888, 3, 15, 2, 77, 4096);
    let key = Key::from(id);
    let bytes = key.to_binary();
    assert_eq!(bytes.len(), BLOB_ID_BINARY_LEN);
    assert_eq!(Key::from_binary(&bytes, KeyMode::BlobIds).unwrap(), key);
    assert_eq!(key.blob_id(), Some(&id));
}

#[test]
fn test_tablet_bounds_cover_every_blob() {
    let id = BlobId::new(9, 1, 1, 1, 1, 1);
    assert!(BlobId::min_for(9) <= id && id <= BlobId::max_for(9));
    assert!(BlobId::max_for(8) < BlobId::min_for(9));
}

#[test]
fn test_binary_keys_order_bytewise() {
    let a = Key::Binary(b"abc".to_vec());
    let b = Key::Binary(b"abd".to_vec());
    let c = Key::Binary(b"abda".to_vec());
    assert!(a < b && b < c);
    assert_eq!(a.to_string(), "616263");
    assert_eq!(a.blob_id(), None);
}

#[test]
fn test_value_encoding_round_trips() {
    let mut value = Value::from_locator(locator(1), b"meta".to_vec());
    value.keep_state = KeepState::Keep;
    value.original_blob = Some(BlobId::new(1, 0, 0, 0, 0, 10));

    assert_eq!(Value::decode(&value.encode().unwrap()).unwrap(), value);
}

#[test]
fn test_unreadable_value() {
    assert!(Value::default().is_unreadable());

    let mut value = Value::default();
    value.original_blob = Some(BlobId::new(1, 0, 0, 0, 0, 10));
    assert!(!value.is_unreadable());

    assert!(!Value::from_locator(locator(0), Vec::new()).is_unreadable());
}

#[test]
fn test_merge_loaded_only_raises_keep_state() {
    let mut value = Value::from_locator(locator(1), Vec::new());
    value.keep_state = KeepState::DoNotKeep;

    let mut loaded = Value::from_locator(locator(2), Vec::new());
    loaded.keep_state = KeepState::Keep;
    value.merge_loaded(loaded);

    assert_eq!(value.keep_state, KeepState::DoNotKeep);
    assert_eq!(value.value_chain, vec![ValueSegment::whole(locator(1))]);
}

#[test]
fn test_merge_loaded_fills_empty_chain() {
    let mut value = Value::default();
    value.original_blob = Some(BlobId::new(1, 0, 0, 0, 0, 10));

    let mut loaded = Value::from_locator(locator(3), Vec::new());
    loaded.keep_state = KeepState::Keep;
    value.merge_loaded(loaded);

    assert_eq!(value.keep_state, KeepState::Keep);
    assert_eq!(value.value_chain.len(), 1);
    assert_eq!(value.original_blob, None);
}

#[test]
fn test_channel_kind_parsing() {
    assert_eq!("LOG".parse::<ChannelKindId>().unwrap(), ChannelKindId::Log);
    assert_eq!(ChannelKindId::System.to_string(), "system");

    let entry: ChannelKindEntry = " system = 0@10 , 1@11".parse().unwrap();
    assert_eq!(entry.kind, ChannelKindId::System);
    assert_eq!(entry.channel_groups.len(), 2);
    assert_eq!(entry.channel_groups[1].group_id, 11);

    assert!("data=300@1".parse::<ChannelKindEntry>().is_err());
    assert!("data=2".parse::<ChannelKindEntry>().is_err());
}
