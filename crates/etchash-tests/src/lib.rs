//! # etchash-tests
//!
//! Integration tests for the Etchash workspace.
//!
//! This crate provides:
//! - Fixtures for small working sets and in-memory chains
//! - Property-based tests for the consensus schedules
//! - End-to-end sealing through the solver, worker pool and remote coordinator
//! - Reorg guard scenarios driven by the finality monitor

pub mod generators;
pub mod harness;



#[cfg(test)]
mod mining_tests;


pub use generators::*;
pub use harness::*;
