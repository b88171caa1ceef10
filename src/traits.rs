//! Core trait definitions.
//!
//! This module defines the contracts between the engine and its collaborators:
//! - `Session`: the narrow unit-of-work interface the engine consumes
//! - `SessionFactory`: creates one session per pulled record and per processed bin
//! - `BinnedRecordProcessor`: the hooks a concrete processor supplies to the driver loop

use crate::binning::BinEntry;
use crate::record::{Destination, Record};
use crate::{EngineError, EngineResult};
use async_trait::async_trait;

/// The minimal unit-of-work contract the engine requires.
///
/// A session represents one transaction. Records obtained through [`next`]
/// belong exclusively to the session until they are transferred to a
/// [`Destination`] and the session is committed, or the session is rolled back
/// (in which case the records are redelivered unchanged).
///
/// # Protocol
///
/// `commit` must fail with [`EngineError::SessionViolation`] if any record
/// obtained from the session was neither transferred nor explicitly removed -
/// the engine never silently loses track of an in-flight record. Transferring
/// the same record twice, or operating on a superseded record version, is
/// likewise a protocol violation. These are programming errors in the
/// surrounding processor code and are surfaced loudly, not recovered from.
///
/// [`next`]: Session::next
#[async_trait]
pub trait Session: Send + Sync {
    /// Pull one record of upstream work into this session.
    ///
    /// Returns `Ok(None)` when no work is available. May block briefly on
    /// upstream I/O, but never indefinitely.
    async fn next(&mut self) -> EngineResult<Option<Record>>;

    /// Route a record owned by this session to a destination
    async fn transfer(&mut self, record: &Record, destination: Destination) -> EngineResult<()>;

    /// Commit the transaction, making all transfers permanent
    async fn commit(&mut self) -> EngineResult<()>;

    /// Roll the transaction back; all records are redelivered unchanged
    async fn rollback(&mut self) -> EngineResult<()>;
}

/// Creates sessions on demand.
///
/// The driver loop creates a fresh session per pulled record during the fill
/// phase and one "bin session" per processed bin.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Create a new session
    async fn create_session(&self) -> EngineResult<Box<dyn Session>>;
}

/// Outcome of processing one bin.
///
/// The three processing outcomes are modeled as an explicit result value
/// returned from [`BinnedRecordProcessor::process_bin`], never as a raised
/// error: the driver loop's commit/rollback sequence depends on which variant
/// it receives.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The bin was processed. If `already_committed` is true, the hook has
    /// itself transferred and committed every originating session (e.g. it
    /// routed the inputs to failure on its own) and the driver skips the
    /// original-routing step.
    Completed { already_committed: bool },

    /// The bin could not be processed but the inputs are still routable:
    /// every contained record is transferred to the failure destination and
    /// its originating session committed individually, while the bin session
    /// is rolled back.
    RecoverableFailure { reason: String },

    /// Something unexpected went wrong: every originating session and the bin
    /// session are rolled back and the inputs redeliver on the next cycle.
    UnrecoverableFailure { source: EngineError },
}

impl ProcessOutcome {
    /// Successful completion where the driver still routes the originals
    pub fn completed() -> Self {
        ProcessOutcome::Completed {
            already_committed: false,
        }
    }

    /// Successful completion where the hook committed all sessions itself
    pub fn already_committed() -> Self {
        ProcessOutcome::Completed {
            already_committed: true,
        }
    }

    /// A recoverable failure with a human-readable reason
    pub fn recoverable(reason: impl Into<String>) -> Self {
        ProcessOutcome::RecoverableFailure {
            reason: reason.into(),
        }
    }

    /// An unrecoverable failure carrying its cause
    pub fn unrecoverable(source: EngineError) -> Self {
        ProcessOutcome::UnrecoverableFailure { source }
    }
}

/// Hooks supplied by a concrete processor to the driver loop.
///
/// Injected at engine construction; no inheritance hierarchy - the engine owns
/// the control flow and calls back into these three points.
#[async_trait]
pub trait BinnedRecordProcessor: Send + Sync {
    /// Compute the group key routing a record to compatible bins
    fn group_key(&self, record: &Record) -> String;

    /// General pre-processing of a record before it is offered to a bin.
    /// Called before `group_key`. The default is the identity.
    async fn preprocess(&self, record: Record) -> EngineResult<Record> {
        Ok(record)
    }

    /// Process a single bin.
    ///
    /// `entries` is the bin's contents in insertion order; `bin_session` is a
    /// fresh session created for the bundle. Implementations that commit the
    /// originating sessions themselves must return
    /// [`ProcessOutcome::already_committed`] so the driver does not commit them
    /// a second time.
    async fn process_bin(
        &self,
        entries: &mut [BinEntry],
        bin_session: &mut dyn Session,
    ) -> ProcessOutcome;
}
