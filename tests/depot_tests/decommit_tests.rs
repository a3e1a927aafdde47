//! Resolves while a predecessor group is being decommissioned

use std::time::{Duration, Instant};

use blobdepot::depot::{AssimilatedBlob, DepotOutput, RangeQuery, RangeResult};
use blobdepot::protocol::{DepotMessage, ResolveItem, ResolveStatus};
use blobdepot::types::BlobId;
use blobdepot::Depot;
use tempfile::TempDir;

use super::*;

const PREDECESSOR: u32 = 500;

fn open_decommissioning(dir: &TempDir) -> Depot {
    let config = config(dir)
        .decommit_group_id(Some(PREDECESSOR))
        .watchdog_period(Duration::from_secs(5))
        .build();
    let mut depot = Depot::open(&config).unwrap();
    let outputs = register(&mut depot, 7, 100);
    match &messages_to(&outputs, 7)[0].message {
        DepotMessage::RegisterResult {
            decommit_group_id, ..
        } => assert_eq!(*decommit_group_id, Some(PREDECESSOR)),
        other => panic!("unexpected {:?}", other),
    }
    depot
}

fn tablet_item(tablet_id: u64) -> ResolveItem {
    ResolveItem {
        tablet_id: Some(tablet_id),
        ..everything()
    }
}

fn send_resolve(depot: &mut Depot, items: Vec<ResolveItem>) -> Vec<DepotOutput> {
    depot
        .handle(7, Envelope::new(4, AgentMessage::Resolve { items }))
        .unwrap();
    depot.take_outputs()
}

fn range_queries(outputs: &[DepotOutput]) -> Vec<RangeQuery> {
    outputs
        .iter()
        .filter_map(|output| match output {
            DepotOutput::RangeQuery(query) => Some(query.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_resolve_waits_for_every_range_query() {
    let dir = TempDir::new().unwrap();
    let mut depot = open_decommissioning(&dir);

    let outputs = send_resolve(&mut depot, vec![tablet_item(10), tablet_item(11), tablet_item(12)]);
    let queries = range_queries(&outputs);
    assert_eq!(queries.len(), 3);
    assert!(messages_to(&outputs, 7).is_empty());
    assert!(queries.iter().all(|q| q.fan_out_id == queries[0].fan_out_id));
    assert!(queries.iter().all(|q| q.group_id == PREDECESSOR));
    assert_eq!(queries[1].tablet_id, 11);
    assert_eq!(queries[1].min_id, BlobId::min_for(11));
    assert_eq!(queries[1].max_id, BlobId::max_for(11));
    assert_eq!(depot.pending_fan_ins(), 1);

    let fan_out_id = queries[0].fan_out_id;
    depot.on_range_result(RangeResult::ok(fan_out_id, Vec::new())).unwrap();
    depot
        .on_range_result(RangeResult::error(fan_out_id, "group unavailable"))
        .unwrap();
    assert!(depot.take_outputs().is_empty());

    depot.on_range_result(RangeResult::ok(fan_out_id, Vec::new())).unwrap();
    let pages = resolve_pages(&depot.take_outputs(), 7);
    assert_eq!(
        pages,
        vec![(ResolveStatus::Error("errors in range queries".to_string()), Vec::new())]
    );
    assert_eq!(depot.pending_fan_ins(), 0);
    assert_eq!(depot.running_resolves(), 0);
}

#[test]
fn test_imported_blob_resolves_to_predecessor() {
    let dir = TempDir::new().unwrap();
    let mut depot = open_decommissioning(&dir);

    let outputs = send_resolve(&mut depot, vec![tablet_item(10)]);
    let queries = range_queries(&outputs);
    assert_eq!(queries.len(), 1);

    let original = BlobId::new(10, 1, 1, 0, 0, 100);
    depot
        .on_range_result(RangeResult::ok(
            queries[0].fan_out_id,
            vec![AssimilatedBlob {
                id: original,
                keep: true,
                do_not_keep: false,
            }],
        ))
        .unwrap();

    let pages = resolve_pages(&depot.take_outputs(), 7);
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].0, ResolveStatus::Ok);
    let resolved = &pages[0].1[0];
    assert_eq!(resolved.key, original.to_bytes().to_vec());
    assert_eq!(resolved.value_chain.len(), 1);
    assert_eq!(resolved.value_chain[0].group_id, PREDECESSOR);
    assert_eq!(resolved.value_chain[0].blob_id, original);
    assert_eq!(resolved.value_chain[0].subrange_end, 100);

    // a point read of a key that already holds data needs no query
    let point = ResolveItem {
        tablet_id: Some(10),
        ..ResolveItem::key(original.to_bytes().to_vec())
    };
    let outputs = send_resolve(&mut depot, vec![point]);
    assert!(range_queries(&outputs).is_empty());
    assert_eq!(resolved_keys(&resolve_pages(&outputs, 7)).len(), 1);
}

#[test]
fn test_assimilated_ranges_are_not_queried() {
    let dir = TempDir::new().unwrap();
    let mut depot = open_decommissioning(&dir);
    depot.set_last_assimilated(BlobId::max_for(10));

    let outputs = send_resolve(&mut depot, vec![tablet_item(9), tablet_item(10)]);
    assert!(range_queries(&outputs).is_empty());
    assert_eq!(resolve_pages(&outputs, 7).len(), 1);

    let outputs = send_resolve(&mut depot, vec![tablet_item(11)]);
    let queries = range_queries(&outputs);
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].min_id, BlobId::min_for(11));

    depot.finish_decommit();
    let outputs = send_resolve(&mut depot, vec![everything()]);
    assert!(range_queries(&outputs).is_empty());
    assert_eq!(resolve_pages(&outputs, 7).len(), 1);
}

#[test]
fn test_item_without_tablet_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut depot = open_decommissioning(&dir);

    let outputs = send_resolve(&mut depot, vec![tablet_item(10), everything()]);
    assert!(range_queries(&outputs).is_empty());
    assert_eq!(
        resolve_pages(&outputs, 7),
        vec![(ResolveStatus::Error("incorrect request".to_string()), Vec::new())]
    );
    assert_eq!(depot.running_resolves(), 0);
}

#[test]
fn test_watchdog_reports_deferred_resolve_once() {
    let dir = TempDir::new().unwrap();
    let mut depot = open_decommissioning(&dir);

    send_resolve(&mut depot, vec![tablet_item(10)]);
    assert_eq!(depot.running_resolves(), 1);

    let late = Instant::now() + depot.watchdog_period() + Duration::from_secs(1);
    assert_eq!(depot.check_watchdog(late), 1);
    assert_eq!(depot.check_watchdog(late), 0);
    assert_eq!(depot.running_resolves(), 1);
}

#[test]
fn test_late_range_result_is_ignored() {
    let dir = TempDir::new().unwrap();
    let mut depot = open_decommissioning(&dir);

    depot.on_range_result(RangeResult::ok(99, Vec::new())).unwrap();
    assert!(depot.take_outputs().is_empty());
}
