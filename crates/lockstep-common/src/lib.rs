//! # lockstep-common
//!
//! Common types and errors for the lockstep lock manager.
//!
//! This crate provides the foundational types shared by every lockstep
//! component:
//!
//! - **Types**: Core identifiers (`TxnId`, `ResourceId`) and the `Timestamp`
//!   ordering token used by the wait-die protocol
//! - **Errors**: Unified error handling with `LockError`
//!
//! ## Example
//!
//! ```rust
//! use lockstep_common::types::{ResourceId, Timestamp, TxnId};
//! use lockstep_common::error::LockResult;
//!
//! fn example() -> LockResult<()> {
//!     let txn = TxnId::new(1);
//!     let resource = ResourceId::new(0);
//!     let ts = Timestamp::new(42);
//!     assert!(txn.is_valid());
//!     assert_eq!(resource.as_u32(), 0);
//!     assert_eq!(ts.as_u64(), 42);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use error::{LockError, LockResult};
pub use types::{ResourceId, Timestamp, TxnId};
