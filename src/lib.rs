//! # Flowbin Core
//!
//! A bin-based batching engine for record processing pipelines.
//!
//! This library groups discrete units of work ([`Record`]s) into bounded
//! batches ([`Bin`]s) before handing them to a downstream processing step, and
//! makes batch processing safe under partial failure with a multi-session
//! two-phase commit sequence. It is a library-level component consumed by a
//! host processing framework: sources, sinks and the unit-of-work backend stay
//! outside, behind the [`Session`] and [`SessionFactory`] traits.
//!
//! ## Overview
//!
//! Records arrive one at a time from an upstream queue. [`BinManager`] assigns
//! each to a bin by group key; when a bin satisfies its completion predicate
//! (size, count, or age) it moves to a ready queue. Each [`BatchEngine::tick`]
//! processes at most one ready bin: the processing hook runs against the bin's
//! contents, then the bin's own session is committed *before* the originating
//! sessions of the contained records - so a crash between the commits causes
//! redundant reprocessing rather than data loss.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowbin_core::{
//!     BatchEngine, BinEntry, BinnedRecordProcessor, EngineConfig, EngineResult,
//!     ProcessOutcome, Record, Session, SessionFactory,
//! };
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct MergeByKind;
//!
//! #[async_trait]
//! impl BinnedRecordProcessor for MergeByKind {
//!     fn group_key(&self, record: &Record) -> String {
//!         record.get_attribute("kind").unwrap_or("default").to_string()
//!     }
//!
//!     async fn process_bin(
//!         &self,
//!         entries: &mut [BinEntry],
//!         _bin_session: &mut dyn Session,
//!     ) -> ProcessOutcome {
//!         // merge the records into one output artifact here
//!         println!("merging {} records", entries.len());
//!         ProcessOutcome::completed()
//!     }
//! }
//!
//! # async fn example(sessions: Arc<dyn SessionFactory>) -> EngineResult<()> {
//! let config = EngineConfig::from_env()?;
//! let engine = BatchEngine::new(MergeByKind, sessions, config)?;
//! engine.run().await
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - **At-most-one-concurrent-build per group**: a bin is exclusively owned by
//!   its manager until evicted, then by the ready queue, then by the single
//!   tick that processes it.
//! - **Redundancy-biased commit order**: the bundle's session commits before
//!   the originals' sessions; failure recovery reprocesses, never loses.
//! - **No silent drops**: every record that enters a bin reaches exactly one
//!   of the original or failure destinations, or is redelivered unchanged
//!   after an unrecoverable-failure rollback.

mod binning;
mod config;
mod engine;
mod error;
mod metrics;
mod pool;
mod record;
mod traits;

// Re-export public API
pub use binning::{Bin, BinEntry, BinManager};
pub use config::{BinSettings, EngineConfig, PoolSettings, ProcessingSettings};
pub use engine::{BatchEngine, EngineStatus, TickReport};
pub use error::{EngineError, EngineResult};
pub use metrics::EngineMetrics;
pub use pool::{ClientFactory, ConsumerLease, ConsumerPool, PooledClient, PoolStats};
pub use record::{Destination, Record};
pub use traits::{BinnedRecordProcessor, ProcessOutcome, Session, SessionFactory};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
