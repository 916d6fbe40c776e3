//! Event-driven trigger
//!
//! Filters PairCreated notifications on the base asset and runs one
//! lease -> sign -> broadcast flow per match without blocking the feed.

pub mod engine;
pub mod filter;

pub use engine::{EngineConfig, SnipeEngine};
