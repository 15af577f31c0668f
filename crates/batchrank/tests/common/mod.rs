//! Shared test utilities for batchrank integration tests.
//!
//! This module provides:
//! - `TestHarness` for engines over a temp database file and blob directory
//! - Scripted collaborators (analyzer, blob store) and input builders

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
