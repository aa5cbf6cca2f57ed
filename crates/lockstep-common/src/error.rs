//! Error handling for lockstep.
//!
//! Provides the unified error type used across all lockstep components.
//! Protocol outcomes (a wait-die death, a detector-selected victim) are not
//! errors and are reported through `AcquireOutcome` and the transaction
//! lifecycle state instead.

use thiserror::Error;

use crate::types::{ResourceId, Timestamp, TxnId};

/// The main error type for lockstep operations.
///
/// Every variant except [`LockError::Internal`] signals a caller-contract
/// violation. `Internal` signals a consistency fault inside the lock manager
/// itself; it is surfaced loudly rather than silently repaired, since silent
/// repair could mask a bug in the mutual-exclusion discipline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// `release` was called by a transaction that does not hold the resource.
    #[error("transaction {txn} is not the holder of resource {resource}")]
    NotHolder {
        /// The resource being released.
        resource: ResourceId,
        /// The transaction that attempted the release.
        txn: TxnId,
    },

    /// The transaction is not registered with the lock manager.
    #[error("transaction not found: {0}")]
    UnknownTransaction(TxnId),

    /// The resource is not part of the configured resource set.
    #[error("resource not found: {0}")]
    UnknownResource(ResourceId),

    /// The operation is not valid for the transaction's current lifecycle
    /// state.
    #[error("transaction {txn} is {state}, expected {expected}")]
    InvalidState {
        /// The transaction.
        txn: TxnId,
        /// The current lifecycle state, rendered for display.
        state: String,
        /// The state(s) the operation requires.
        expected: &'static str,
    },

    /// The transaction already holds or is already waiting on the resource.
    #[error("transaction {txn} already holds or waits on resource {resource}")]
    AlreadyRequested {
        /// The resource.
        resource: ResourceId,
        /// The transaction.
        txn: TxnId,
    },

    /// A transaction with this timestamp already exists. Wait-die requires
    /// timestamps to be unique.
    #[error("timestamp {0} is already assigned to another transaction")]
    DuplicateTimestamp(Timestamp),

    /// Internal consistency fault (a core bug).
    #[error("internal consistency fault: {0}")]
    Internal(String),
}

/// Result type alias for lockstep operations.
pub type LockResult<T> = std::result::Result<T, LockError>;
