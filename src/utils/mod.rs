//! Shared utility functions for circuit-weaver.
//!
//! Text extraction helpers used on model replies and captured process output.

pub mod extraction;

pub use extraction::{
    extract_code_block, extract_json_payload, extract_script, find_matching_close, tail_chars,
};
