//! Invalidation pushes and agent restarts

use blobdepot::depot::DepotOutput;
use blobdepot::protocol::{AgentMessage, DepotMessage, Envelope, InvalidatedStep};
use blobdepot::types::{ChannelKindId, SequenceId};
use tempfile::TempDir;

use super::*;

fn push_steps(envelope: &Envelope<DepotMessage>) -> Vec<InvalidatedStep> {
    match &envelope.message {
        DepotMessage::PushNotify {
            invalidated_steps, ..
        } => invalidated_steps.clone(),
        other => panic!("expected a push, got {:?}", other),
    }
}

fn acknowledge(depot: &mut Depot, agent_id: AgentId, push_id: u64, writes_in_flight: Vec<SequenceId>) -> Vec<DepotOutput> {
    depot
        .handle(
            agent_id,
            Envelope::new(push_id, AgentMessage::PushNotifyResult { writes_in_flight }),
        )
        .unwrap();
    depot.take_outputs()
}

#[test]
fn test_invalidation_is_pushed_to_connected_agents() {
    let dir = TempDir::new().unwrap();
    let mut depot = open(&dir);
    register(&mut depot, 7, 100);
    register(&mut depot, 8, 200);
    depot.on_agent_disconnected(8);
    lease(&mut depot, 7, ChannelKindId::Data, 5);

    assert!(depot.invalidate_step(2, 0));
    let outputs = depot.take_outputs();

    let pushes = messages_to(&outputs, 7);
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].request_id, 1);
    assert_eq!(
        push_steps(&pushes[0]),
        vec![InvalidatedStep {
            channel: 2,
            generation: 1,
            invalidated_step: 0,
        }]
    );
    assert!(messages_to(&outputs, 8).is_empty());

    // new grants on the channel skip the invalidated step
    assert_eq!(
        depot.ledger().channel(2).unwrap().next_seq,
        SequenceId::new(2, 1, 1, 0).to_sequential_number()
    );
}

#[test]
fn test_acknowledgement_trims_all_but_writes_in_flight() {
    let dir = TempDir::new().unwrap();
    let mut depot = open(&dir);
    register(&mut depot, 7, 100);
    let ids = lease(&mut depot, 7, ChannelKindId::Data, 5);
    assert_eq!(ids[0], SequenceId::new(2, 1, 0, 0));

    depot.invalidate_step(2, 0);
    depot.take_outputs();

    let in_flight = SequenceId::new(2, 1, 0, 3);
    let outputs = acknowledge(&mut depot, 7, 1, vec![in_flight]);
    assert_eq!(least_expected_advances(&outputs), vec![in_flight]);
    assert_eq!(depot.ledger().channel(2).unwrap().given_id_ranges.len(), 1);

    // committing the last write in flight frees the channel up to its next id
    let (statuses, outputs) = commit_with_outputs(
        &mut depot,
        7,
        vec![commit_item(blob_key(TABLET_ID, 1, 0), in_flight)],
    );
    assert!(statuses[0].is_ok());
    assert_eq!(
        least_expected_advances(&outputs),
        vec![SequenceId::new(2, 1, 1, 0)]
    );
}

#[test]
fn test_unknown_push_acknowledgement_is_ignored() {
    let dir = TempDir::new().unwrap();
    let mut depot = open(&dir);
    register(&mut depot, 7, 100);
    lease(&mut depot, 7, ChannelKindId::Data, 5);

    let outputs = acknowledge(&mut depot, 7, 42, Vec::new());
    assert!(outputs.is_empty());
    assert_eq!(depot.ledger().channel(2).unwrap().given_id_ranges.len(), 5);
}

#[test]
fn test_reconnected_agent_is_pushed_again() {
    let dir = TempDir::new().unwrap();
    let mut depot = open(&dir);
    register(&mut depot, 7, 100);
    lease(&mut depot, 7, ChannelKindId::Data, 5);
    depot.invalidate_step(2, 0);
    depot.take_outputs();

    depot.on_agent_disconnected(7);
    let outputs = register(&mut depot, 7, 100);
    let messages = messages_to(&outputs, 7);
    assert_eq!(messages.len(), 2);
    assert!(matches!(messages[0].message, DepotMessage::RegisterResult { .. }));
    assert_eq!(messages[1].request_id, 2);
    assert_eq!(push_steps(&messages[1])[0].invalidated_step, 0);

    // the first push died with the connection
    assert!(acknowledge(&mut depot, 7, 1, Vec::new()).is_empty());
    let outputs = acknowledge(&mut depot, 7, 2, Vec::new());
    assert_eq!(
        least_expected_advances(&outputs),
        vec![SequenceId::new(2, 1, 1, 0)]
    );
}

#[test]
fn test_restarted_agent_forfeits_its_leases() {
    let dir = TempDir::new().unwrap();
    let mut depot = open(&dir);
    register(&mut depot, 7, 100);
    lease(&mut depot, 7, ChannelKindId::Data, 5);

    // same instance: nothing changes
    let outputs = register(&mut depot, 7, 100);
    assert!(least_expected_advances(&outputs).is_empty());

    let outputs = register(&mut depot, 7, 101);
    assert_eq!(
        least_expected_advances(&outputs),
        vec![SequenceId::new(2, 1, 0, 5)]
    );
    assert!(depot.ledger().channel(2).unwrap().given_id_ranges.is_empty());
}

#[test]
fn test_invalidate_unknown_channel() {
    let dir = TempDir::new().unwrap();
    let mut depot = open(&dir);
    register(&mut depot, 7, 100);

    assert!(!depot.invalidate_step(9, 0));
    assert!(depot.take_outputs().is_empty());
}
