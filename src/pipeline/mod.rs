//! # Vote pipeline
//!
//! Two halves joined by the durable vote queue:
//!
//! ```text
//! EventSource → Ingestion (option filter) → handoff channel → Publisher → queue
//! queue → VoteAggregator (SharedTally) → Flusher (timer) → PollStore
//! ```
//!
//! ## Key invariants
//!
//! - One live `Tally`, guarded by one mutex, never held across I/O
//! - The flusher takes the tally before writing and merges back only the
//!   options whose increment failed
//! - The handoff channel is bounded; a slow publisher stalls ingestion
//!
//! ## Module Organization
//!
//! - `tally` - live tally slot shared by aggregator and flusher
//! - `aggregator` - queue handler counting votes
//! - `flusher` - periodic, non-overlapping flush with per-option retry
//! - `publisher` - handoff channel → queue, with completion signal
//! - `ingestion` - source → option filter → handoff channel

pub mod aggregator;
pub mod flusher;
pub mod ingestion;
pub mod publisher;
pub mod tally;

pub use aggregator::{AggregatorStats, VoteAggregator};
pub use flusher::{FlushOutcome, FlushReport, FlushStats, Flusher, FlusherHandle};
pub use ingestion::{Ingestion, IngestionEnd, IngestionStats};
pub use publisher::{Publisher, PublisherStats};
pub use tally::{SharedTally, Tally};
