//! Agent state machine tests
//!
//! The depot side is played by hand: the test drains what the agent sent
//! over a `QueueLink` and answers with crafted messages.


use blobdepot::agent::{Agent, QueueLink};
use blobdepot::config::Config;
use blobdepot::protocol::{AgentMessage, ChannelRange, DepotMessage, Envelope, GivenIdRange};
use blobdepot::types::{ChannelKindEntry, ChannelKindId, SequenceId};

pub const LOW_WATERMARK: u64 = 4;
pub const BATCH: u32 = 10;

pub fn channel_table() -> Vec<ChannelKindEntry> {
    vec![
        "data=2@2001,3@2002".parse().unwrap(),
        "log=1@1001".parse().unwrap(),
    ]
}

pub fn new_agent() -> Agent<QueueLink> {
    let config = Config::builder()
        .virtual_group_id(9)
        .low_watermark(LOW_WATERMARK)
        .allocate_batch(BATCH)
        .build();
    Agent::new(&config, 77, QueueLink::new())
}

/// Connect and answer the registration; returns what the agent sent after it
pub fn registered_agent(generation: u32) -> (Agent<QueueLink>, Vec<Envelope<AgentMessage>>) {
    let mut agent = new_agent();
    agent.connect().unwrap();
    let sent = agent.link_mut().drain();
    assert_eq!(sent.len(), 1);
    let register_id = sent[0].request_id;

    agent
        .handle_response(Envelope::new(register_id, register_result(generation)))
        .unwrap();
    let refills = agent.link_mut().drain();
    (agent, refills)
}

pub fn register_result(generation: u32) -> DepotMessage {
    DepotMessage::RegisterResult {
        generation,
        decommit_group_id: None,
        channel_kinds: channel_table(),
    }
}

/// Request id of the AllocateIds the agent sent for `kind`
pub fn allocate_request(sent: &[Envelope<AgentMessage>], kind: ChannelKindId) -> u64 {
    sent.iter()
        .find(|e| matches!(e.message, AgentMessage::AllocateIds { kind: k, .. } if k == kind))
        .map(|e| e.request_id)
        .unwrap_or_else(|| panic!("no AllocateIds for {} in {:?}", kind, sent))
}

/// `count` ids of step `step` on `channel`, starting at index 0
pub fn grant(channel: u8, generation: u32, step: u32, count: u64) -> ChannelRange {
    let begin = SequenceId::new(channel, generation, step, 0).to_sequential_number();
    ChannelRange {
        channel,
        begin,
        end: begin + count,
    }
}

pub fn allocate_result(
    kind: ChannelKindId,
    generation: u32,
    ranges: Vec<ChannelRange>,
) -> DepotMessage {
    DepotMessage::AllocateIdsResult {
        kind,
        generation,
        given_id_range: Some(GivenIdRange {
            channel_ranges: ranges,
        }),
    }
}
