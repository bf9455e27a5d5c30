//! Integration tests for repro-cache
//!
//! These tests drive wrapped functions through every mode against real
//! storage files.

#[path = "../common/mod.rs"]
pub mod common;

pub mod async_calls;
pub mod recovery;
