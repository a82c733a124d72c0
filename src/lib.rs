//! Pattern knowledge base engine
//!
//! A referentially-validated, versioned YAML store of statistically
//! discovered trading patterns. Loading merges fragments, validates every
//! cross-reference, and hands back an immutable graph; classification tiers
//! patterns from mining statistics; the discovery loop drives the pattern
//! lifecycle to a fixed point and commits the result atomically.

pub mod discovery;
pub mod error;
pub mod loader;
pub mod model;
pub mod query;
pub mod scoring;
pub mod validate;
pub mod versioning;

pub use discovery::{DiscoveryConfig, DiscoveryReport, KbHandle, Miner, PassthroughMiner};
pub use error::KbError;
pub use model::{Direction, KnowledgeBase, PatternRule, PatternType, Status};
pub use query::PatternFilter;
pub use scoring::{ScoringConfig, StatsIndex, TierOutcome};
pub use validate::Violation;
pub use versioning::BumpLevel;
