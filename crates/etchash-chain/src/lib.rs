//! # etchash-chain
//!
//! Chain-tip selection for Etchash chains.
//!
//! This crate provides:
//! - A pluggable tip-acceptance predicate consulted by the storage layer
//! - The heaviest-total-difficulty rule
//! - The antigravity reorg guard gated by an artificial-finality switch
//! - A periodic monitor driving that switch from peer count and head age

mod error;
pub mod finality;
pub mod fork_choice;

pub use error::{ChainError, ChainResult};
pub use finality::{ArtificialFinality, FinalityConfig, FinalityMonitor, SyncStatus};
pub use fork_choice::{AncestorLookup, GuardedTipAcceptance, TipAcceptance, TotalDifficultyRule};
