//! Identifier and value model tests

mod key_value_tests;
mod seq_id_tests;
