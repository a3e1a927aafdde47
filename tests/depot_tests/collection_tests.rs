//! Collection racing writers
//!
//! A real agent and a depot wired through a `QueueLink`, driven by random
//! interleavings of writes, invalidations, message delivery, collection up to
//! the least expected id, and commits. No commit of the current generation
//! may ever find its id handed to collection.

use blobdepot::agent::{Completion, Outcome, QueueLink};
use blobdepot::types::GenStep;
use blobdepot::{Agent, DepotError};
use proptest::prelude::*;

use super::*;

const AGENT: AgentId = 7;

#[derive(Debug, Clone)]
enum Op {
    Write,
    Invalidate { channel: u8, step: u32 },
    Deliver,
    Collect,
    Commit(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Write),
        2 => (2u8..4, 0u32..6).prop_map(|(channel, step)| Op::Invalidate { channel, step }),
        2 => Just(Op::Deliver),
        2 => Just(Op::Collect),
        3 => (0usize..16).prop_map(Op::Commit),
    ]
}

fn group_of(channel: u8) -> u32 {
    if channel == 2 {
        2001
    } else {
        2002
    }
}

/// Hand queued depot outputs to the agent; returns whether any were sent
fn deliver_to_agent(depot: &mut Depot, agent: &mut Agent<QueueLink>) -> bool {
    let mut delivered = false;
    for output in depot.take_outputs() {
        if let DepotOutput::ToAgent { envelope, .. } = output {
            agent.handle_response(envelope).unwrap();
            delivered = true;
        }
    }
    delivered
}

/// Exchange messages both ways until nothing is in flight
fn pump(depot: &mut Depot, agent: &mut Agent<QueueLink>) -> blobdepot::Result<()> {
    loop {
        let sent = agent.link_mut().drain();
        for envelope in &sent {
            depot.handle(AGENT, envelope.clone())?;
        }
        let delivered = deliver_to_agent(depot, agent);
        if sent.is_empty() && !delivered {
            return Ok(());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_current_generation_commit_is_never_collectible(ops in prop::collection::vec(op(), 1..40)) {
        let dir = TempDir::new().unwrap();
        let config = config(&dir).low_watermark(4).allocate_batch(10).build();
        let mut depot = Depot::open(&config).unwrap();
        let mut agent = Agent::new(&config, 100, QueueLink::new());
        agent.connect().unwrap();
        pump(&mut depot, &mut agent).unwrap();

        let mut written: Vec<(SequenceId, u32)> = Vec::new();
        let mut next_key = 0u32;

        for op in ops {
            match op {
                Op::Write => {
                    if let Some(leased) = agent.next_sequence_id(ChannelKindId::Data).unwrap() {
                        written.push((leased.seq_id, leased.group_id));
                    }
                }
                Op::Invalidate { channel, step } => {
                    prop_assert!(depot.invalidate_step(channel, step));
                    // the acknowledgement stays queued behind earlier commits
                    deliver_to_agent(&mut depot, &mut agent);
                }
                Op::Deliver => {
                    let result = pump(&mut depot, &mut agent);
                    prop_assert!(result.is_ok(), "depot failed: {:?}", result);
                }
                Op::Collect => {
                    for channel in [2u8, 3] {
                        let least = depot.ledger().channel(channel).unwrap().least_expected();
                        if least.step > 0 {
                            depot.record_issued_gen_step(
                                channel,
                                group_of(channel),
                                GenStep::new(least.generation, least.step - 1),
                            );
                        }
                    }
                }
                Op::Commit(pick) => {
                    if written.is_empty() {
                        continue;
                    }
                    let (seq_id, group_id) = written.remove(pick % written.len());
                    next_key += 1;
                    let item = CommitItem {
                        key: BlobId::new(TABLET_ID, 1, next_key, 0, 0, 100).to_bytes().to_vec(),
                        locator: BlobLocator::new(group_id, seq_id, 100),
                        meta: Vec::new(),
                    };
                    agent
                        .issue(AgentMessage::CommitBlobSeq { items: vec![item] }, 1)
                        .unwrap();
                }
            }
        }

        let result = pump(&mut depot, &mut agent);
        prop_assert!(
            !matches!(result, Err(DepotError::Invariant(_))),
            "commit found its id collectible: {:?}",
            result
        );
        prop_assert!(result.is_ok(), "depot failed: {:?}", result);

        for Completion { outcome, .. } in agent.take_completions() {
            match outcome {
                Outcome::Response(DepotMessage::CommitBlobSeqResult { items }) => {
                    prop_assert_eq!(items, vec![CommitStatus::Ok]);
                }
                other => prop_assert!(false, "unexpected completion {:?}", other),
            }
        }
    }
}
