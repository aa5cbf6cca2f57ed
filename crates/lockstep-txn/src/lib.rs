//! # lockstep-txn
//!
//! A lock manager for concurrent transactions contending for exclusively-
//! lockable resources under a two-phase-locking-style protocol:
//!
//! - **Wait-die** timestamp ordering for deadlock avoidance: an older
//!   requester blocked by a younger holder waits; a younger requester dies
//!   and retries.
//!
//! - **Wait-for-graph cycle detection** as a secondary safety net, run on
//!   every blocking event. The oldest cycle member is aborted permanently.
//!
//! - **FIFO hand-off**: a released resource goes to the longest-waiting
//!   queued transaction, atomically with the release.
//!
//! All shared state lives behind one global mutex; every public operation is
//! a single atomic step with respect to concurrent callers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      LockManager                         │
//! │            acquire / release / release_all               │
//! │                  (one global mutex)                      │
//! │                                                          │
//! │  ┌──────────────────┐  ┌──────────────────────────────┐  │
//! │  │ ResourceRegistry │  │      DeadlockDetector        │  │
//! │  │ holders + FIFO   │  │ WaitForGraph + victim choice │  │
//! │  │ wait queues      │  │                              │  │
//! │  └──────────────────┘  └──────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use lockstep_common::types::{ResourceId, Timestamp};
//! use lockstep_txn::{AcquireOutcome, LockManager};
//!
//! let lm = LockManager::new(2);
//! let txn = lm.create_transaction(Timestamp::new(1)).unwrap();
//!
//! let outcome = lm.acquire(ResourceId::new(0), txn).unwrap();
//! assert_eq!(outcome, AcquireOutcome::Granted);
//!
//! lm.release(ResourceId::new(0), txn).unwrap();
//! lm.commit(txn).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Lock manager and transaction lifecycle.
pub mod manager;

/// Resource lock state and FIFO wait queues.
pub mod registry;

/// Wait-for graph and deadlock detection.
pub mod deadlock;

// Re-export commonly used types

pub use manager::{
    AbortKind, AcquireOutcome, LockManager, LockStats, Transaction, TxnState,
};

pub use registry::{Resource, ResourceRegistry};

pub use deadlock::{DeadlockDetector, DeadlockInfo, WaitForGraph};
