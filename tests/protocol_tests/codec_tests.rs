//! Codec Tests
//!
//! Frame encoding/decoding for both message directions.

use std::io::Cursor;

use blobdepot::protocol::{
    decode_frame, encode_frame, read_frame, write_frame, AgentMessage, ChannelRange, CommitItem,
    CommitStatus, DepotMessage, Envelope, GivenIdRange, InvalidatedStep, ResolveItem,
    ResolveStatus, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
use blobdepot::types::{BlobLocator, ChannelKindId, SequenceId};
use blobdepot::DepotError;

// =============================================================================
// Helper Functions
// =============================================================================

fn register() -> Envelope<AgentMessage> {
    Envelope::new(
        1,
        AgentMessage::Register {
            virtual_group_id: 7,
            agent_instance_id: 42,
        },
    )
}

fn commit() -> Envelope<AgentMessage> {
    Envelope::new(
        u64::MAX - 1,
        AgentMessage::CommitBlobSeq {
            items: vec![CommitItem {
                key: b"some-key".to_vec(),
                locator: BlobLocator::new(2001, SequenceId::new(2, 1, 0, 5), 4096),
                meta: b"meta".to_vec(),
            }],
        },
    )
}

fn assert_protocol_error<T: std::fmt::Debug>(result: Result<T, DepotError>, needle: &str) {
    match result {
        Err(DepotError::Protocol(reason)) => {
            assert!(reason.contains(needle), "{} does not mention {}", reason, needle)
        }
        other => panic!("expected protocol error, got {:?}", other),
    }
}

// =============================================================================
// Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_header_layout() {
    let frame = encode_frame(&commit()).unwrap();
    assert_eq!(frame[0], 0x03);
    assert_eq!(&frame[1..9], &(u64::MAX - 1).to_be_bytes());
    let len = u32::from_be_bytes([frame[9], frame[10], frame[11], frame[12]]) as usize;
    assert_eq!(frame.len(), HEADER_SIZE + len);
}

#[test]
fn test_agent_messages_decode() {
    for envelope in [
        register(),
        commit(),
        Envelope::new(
            3,
            AgentMessage::AllocateIds {
                kind: ChannelKindId::Data,
                count: 100,
            },
        ),
        Envelope::new(
            4,
            AgentMessage::Resolve {
                items: vec![ResolveItem::range(Some(b"a".to_vec()), None)],
            },
        ),
        Envelope::new(
            5,
            AgentMessage::PushNotifyResult {
                writes_in_flight: vec![SequenceId::new(1, 2, 3, 4)],
            },
        ),
    ] {
        let frame = encode_frame(&envelope).unwrap();
        let decoded: Envelope<AgentMessage> = decode_frame(&frame).unwrap();
        assert_eq!(decoded, envelope);
    }
}

#[test]
fn test_depot_messages_decode() {
    for envelope in [
        Envelope::new(
            9,
            DepotMessage::AllocateIdsResult {
                kind: ChannelKindId::Log,
                generation: 3,
                given_id_range: Some(GivenIdRange {
                    channel_ranges: vec![ChannelRange {
                        channel: 1,
                        begin: 10,
                        end: 20,
                    }],
                }),
            },
        ),
        Envelope::new(
            10,
            DepotMessage::CommitBlobSeqResult {
                items: vec![CommitStatus::Ok, CommitStatus::Error("generation race".into())],
            },
        ),
        Envelope::new(11, DepotMessage::resolve_error("errors in range queries")),
        Envelope::new(
            12,
            DepotMessage::PushNotify {
                invalidated_steps: vec![InvalidatedStep {
                    channel: 2,
                    generation: 1,
                    invalidated_step: 8,
                }],
                blocked_tablets: Vec::new(),
            },
        ),
    ] {
        let frame = encode_frame(&envelope).unwrap();
        let decoded: Envelope<DepotMessage> = decode_frame(&frame).unwrap();
        assert_eq!(decoded, envelope);
    }
}

// =============================================================================
// Error Cases
// =============================================================================

#[test]
fn test_wrong_direction_is_rejected() {
    let frame = encode_frame(&register()).unwrap();
    assert_protocol_error(decode_frame::<DepotMessage>(&frame), "Unknown message tag");
}

#[test]
fn test_tag_mismatch() {
    let mut frame = encode_frame(&register()).unwrap();
    frame[0] = 0x02;
    assert_protocol_error(decode_frame::<AgentMessage>(&frame), "Tag mismatch");
}

#[test]
fn test_incomplete_frames() {
    let frame = encode_frame(&commit()).unwrap();
    assert_protocol_error(
        decode_frame::<AgentMessage>(&frame[..HEADER_SIZE - 1]),
        "Incomplete header",
    );
    assert_protocol_error(
        decode_frame::<AgentMessage>(&frame[..frame.len() - 1]),
        "Incomplete payload",
    );
}

#[test]
fn test_oversized_length_is_rejected() {
    let mut frame = encode_frame(&register()).unwrap();
    frame[9..13].copy_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());
    assert_protocol_error(decode_frame::<AgentMessage>(&frame), "too large");
}

#[test]
fn test_garbage_payload_is_malformed() {
    let mut frame = encode_frame(&register()).unwrap();
    let len = frame.len();
    for b in &mut frame[HEADER_SIZE..len] {
        *b = 0xFF;
    }
    assert_protocol_error(decode_frame::<AgentMessage>(&frame), "Malformed payload");
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_stream_carries_consecutive_frames() {
    let mut buf = Vec::new();
    write_frame(&mut buf, &register()).unwrap();
    write_frame(&mut buf, &commit()).unwrap();

    let mut cursor = Cursor::new(buf);
    let first: Envelope<AgentMessage> = read_frame(&mut cursor).unwrap();
    let second: Envelope<AgentMessage> = read_frame(&mut cursor).unwrap();
    assert_eq!(first, register());
    assert_eq!(second, commit());

    match read_frame::<_, AgentMessage>(&mut cursor) {
        Err(DepotError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("expected EOF, got {:?}", other),
    }
}

#[test]
fn test_resolve_pages_keep_status() {
    let envelope = Envelope::new(
        77,
        DepotMessage::ResolveResult {
            status: ResolveStatus::Overrun,
            resolved_keys: Vec::new(),
        },
    );
    let mut buf = Vec::new();
    write_frame(&mut buf, &envelope).unwrap();
    let decoded: Envelope<DepotMessage> = read_frame(&mut Cursor::new(buf)).unwrap();
    assert_eq!(decoded, envelope);
}
