//! Tests for SequenceId and GenStep

use blobdepot::types::{GenStep, SequenceId, MAX_GENERATION, MAX_INDEX, MAX_STEP};

#[test]
fn test_sequential_number_layout() {
    let id = SequenceId::new(0, 1, 2, 3);
    assert_eq!(id.to_sequential_number(), (1u64 << 40) | (2u64 << 20) | 3);
}

#[test]
fn test_out_of_range_fields_saturate() {
    let id = SequenceId::new(0, u32::MAX, u32::MAX, u32::MAX);
    let max = SequenceId::new(0, MAX_GENERATION, MAX_STEP, MAX_INDEX);
    assert_eq!(id.to_sequential_number(), max.to_sequential_number());
    assert_eq!(id.to_sequential_number(), u64::MAX);
}

#[test]
fn test_push_trim_bound_is_first_id_of_next_step() {
    let bound = SequenceId::new(4, 9, 17, MAX_INDEX).to_sequential_number() + 1;
    assert_eq!(
        SequenceId::from_sequential_number(4, bound),
        SequenceId::new(4, 9, 18, 0)
    );
}

#[test]
fn test_ordering_matches_sequential_numbers() {
    let mut ids = vec![
        SequenceId::new(1, 2, 0, 5),
        SequenceId::new(1, 1, MAX_STEP, MAX_INDEX),
        SequenceId::new(1, 2, 0, 4),
        SequenceId::first_of(1, 3),
    ];
    ids.sort();
    let numbers: Vec<u64> = ids.iter().map(|id| id.to_sequential_number()).collect();
    let mut sorted = numbers.clone();
    sorted.sort_unstable();
    assert_eq!(numbers, sorted);
}

#[test]
fn test_gen_step_ordering() {
    assert!(GenStep::new(1, MAX_STEP) < GenStep::new(2, 0));
    assert!(GenStep::new(2, 3).as_u64() < GenStep::new(2, 4).as_u64());
    assert_eq!(GenStep::from(SequenceId::new(0, 5, 6, 7)), GenStep::new(5, 6));
    assert_eq!(SequenceId::new(3, 5, 6, 7).to_string(), "{3:5:6:7}");
}
