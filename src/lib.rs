//! Event graph and reference resolution for Nostr events.
//!
//! Events arrive in any order, possibly more than once. The [`Engine`] keeps:
//!
//! - a bidirectional reference graph with pending edges for targets not yet seen
//! - a chronological chain, globally and per author
//! - reaction and zap aggregates, flushed in debounced batches
//! - a bounded LRU + TTL cache of titles and backlink sets

pub mod cache;
pub mod chain;
pub mod config;
pub mod engine;
pub mod event;
pub mod persist;
pub mod reactions;
pub mod references;
pub mod service;
pub mod source;
pub mod tags;
pub mod time;

pub use engine::{Engine, EngineConfig, IngestOutcome, IngestSummary};
pub use event::{Event, Tag};
pub use tags::{classify, RefKind, ThreadTags};
