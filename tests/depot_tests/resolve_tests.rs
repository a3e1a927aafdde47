//! Resolve: ranges, paging and resumption over cold pages

use blobdepot::protocol::{DepotMessage, ResolveItem, ResolveStatus};
use blobdepot::types::{BlobId, ChannelKindId};
use blobdepot::Depot;
use tempfile::TempDir;

use super::*;

/// Depot holding keys of steps 1..=count for tablet TABLET_ID
fn populated(depot: &mut Depot, count: u32) -> Vec<Vec<u8>> {
    register(depot, 7, 100);
    let ids = lease(depot, 7, ChannelKindId::Data, count);
    let keys: Vec<Vec<u8>> = (1..=count).map(|step| blob_key(TABLET_ID, step, 0)).collect();
    let items = keys
        .iter()
        .zip(&ids)
        .map(|(key, id)| commit_item(key.clone(), *id))
        .collect();
    assert!(commit(depot, 7, items).iter().all(|s| s.is_ok()));
    keys
}

fn steps(keys: &[Vec<u8>]) -> Vec<u32> {
    keys.iter()
        .map(|bytes| BlobId::from_bytes(bytes).unwrap().step)
        .collect()
}

#[test]
fn test_missing_key_resolves_to_empty_page() {
    let dir = TempDir::new().unwrap();
    let mut depot = open(&dir);
    populated(&mut depot, 3);

    let pages = resolve(&mut depot, 7, vec![ResolveItem::key(blob_key(TABLET_ID, 9, 0))]);
    assert_eq!(pages, vec![(ResolveStatus::Ok, Vec::new())]);
}

#[test]
fn test_range_bounds_and_limits() {
    let dir = TempDir::new().unwrap();
    let mut depot = open(&dir);
    let keys = populated(&mut depot, 5);

    let exclusive = ResolveItem {
        include_beginning: false,
        include_ending: false,
        ..ResolveItem::range(Some(keys[0].clone()), Some(keys[3].clone()))
    };
    let pages = resolve(&mut depot, 7, vec![exclusive]);
    assert_eq!(steps(&resolved_keys(&pages)), vec![2, 3]);

    let newest_two = ResolveItem {
        reverse: true,
        max_keys: 2,
        ..everything()
    };
    let pages = resolve(&mut depot, 7, vec![newest_two]);
    assert_eq!(steps(&resolved_keys(&pages)), vec![5, 4]);

    let oldest_one = ResolveItem {
        max_keys: 1,
        ..everything()
    };
    let pages = resolve(&mut depot, 7, vec![oldest_one]);
    assert_eq!(steps(&resolved_keys(&pages)), vec![1]);
}

#[test]
fn test_items_answer_in_request_order_with_cookies() {
    let dir = TempDir::new().unwrap();
    let mut depot = open(&dir);
    let keys = populated(&mut depot, 4);

    let items = vec![
        ResolveItem {
            cookie: Some(10),
            ..ResolveItem::key(keys[3].clone())
        },
        ResolveItem {
            cookie: Some(20),
            ..ResolveItem::range(Some(keys[0].clone()), Some(keys[1].clone()))
        },
    ];
    let pages = resolve(&mut depot, 7, items);
    assert_eq!(pages.len(), 1);
    let cookies: Vec<Option<u64>> = pages[0].1.iter().map(|k| k.cookie).collect();
    assert_eq!(cookies, vec![Some(10), Some(20), Some(20)]);
    assert_eq!(steps(&resolved_keys(&pages)), vec![4, 1, 2]);
}

#[test]
fn test_large_answers_are_paged() {
    let dir = TempDir::new().unwrap();
    let mut depot = Depot::open(&config(&dir).max_message_size(200).build()).unwrap();
    let keys = populated(&mut depot, 5);

    let pages = resolve(&mut depot, 7, vec![everything()]);
    assert!(pages.len() > 1);

    let (last, rest) = pages.split_last().unwrap();
    assert_eq!(last.0, ResolveStatus::Ok);
    assert!(rest.iter().all(|(status, _)| *status == ResolveStatus::Overrun));
    for (status, resolved_keys) in &pages {
        assert!(!resolved_keys.is_empty());
        let page = DepotMessage::ResolveResult {
            status: status.clone(),
            resolved_keys: resolved_keys.clone(),
        };
        assert!(bincode::serialized_size(&page).unwrap() <= 200);
    }
    assert_eq!(resolved_keys(&pages), keys);
}

#[test]
fn test_malformed_key_fails_whole_request() {
    let dir = TempDir::new().unwrap();
    let mut depot = open(&dir);
    populated(&mut depot, 2);

    let pages = resolve(
        &mut depot,
        7,
        vec![everything(), ResolveItem::key(b"too short".to_vec())],
    );
    assert_eq!(pages.len(), 1);
    match &pages[0].0 {
        ResolveStatus::Error(reason) => assert!(reason.starts_with("malformed key")),
        other => panic!("expected an error, got {:?}", other),
    }
    assert_eq!(depot.running_resolves(), 0);
}

#[test]
fn test_resolve_resumes_over_cold_pages() {
    let dir = TempDir::new().unwrap();
    let small_pages = || config(&dir).rows_per_page(2).page_cache_capacity(1).build();

    let keys = {
        let mut depot = Depot::open(&small_pages()).unwrap();
        let keys = populated(&mut depot, 6);
        depot.close().unwrap();
        keys
    };

    let mut depot = Depot::open(&small_pages()).unwrap();
    assert_eq!(depot.engine().page_count(), 3);
    assert_eq!(depot.engine().resident_pages(), 0);

    let pages = resolve(&mut depot, 7, vec![everything()]);
    assert_eq!(resolved_keys(&pages), keys);
    assert!(depot.executor().restarts() > 0);
    assert!(depot.executor().successors() > 0);
    assert!(depot.engine().fault_count() >= 3);

    let reverse = ResolveItem {
        reverse: true,
        ..everything()
    };
    let pages = resolve(&mut depot, 7, vec![reverse]);
    assert_eq!(steps(&resolved_keys(&pages)), vec![6, 5, 4, 3, 2, 1]);
}

#[test]
fn test_loaded_depot_answers_from_memory() {
    let dir = TempDir::new().unwrap();
    let keys = {
        let mut depot = open(&dir);
        let keys = populated(&mut depot, 4);
        depot.close().unwrap();
        keys
    };

    let mut depot = open(&dir);
    depot.start_load().unwrap();
    assert!(depot.data().is_loaded());
    assert_eq!(depot.data().len(), 4);

    let pages = resolve(&mut depot, 7, vec![everything()]);
    assert_eq!(resolved_keys(&pages), keys);

    let resolved = &pages[0].1[0];
    assert_eq!(resolved.meta, b"meta".to_vec());
    assert_eq!(resolved.value_chain.len(), 1);
    assert_eq!(resolved.value_chain[0].group_id, DATA_GROUP);
    assert_eq!(resolved.value_chain[0].subrange_end, 100);
}
