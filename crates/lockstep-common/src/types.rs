//! Core identifier types for lockstep.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier - uniquely identifies a transaction for its
/// logical lifetime.
///
/// # Example
///
/// ```rust
/// use lockstep_common::types::TxnId;
///
/// let txn = TxnId::new(42);
/// assert_eq!(txn.as_u64(), 42);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(u64);

impl TxnId {
    /// Invalid transaction ID, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Minimum valid transaction ID.
    pub const MIN: Self = Self(1);

    /// Creates a new `TxnId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid transaction ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "TxnId(INVALID)")
        } else {
            write!(f, "TxnId({})", self.0)
        }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl From<u64> for TxnId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<TxnId> for u64 {
    #[inline]
    fn from(id: TxnId) -> Self {
        id.0
    }
}

/// Resource identifier - names one exclusively-lockable resource.
///
/// The resource set is fixed at lock-manager construction; identifiers are
/// dense small integers.
///
/// # Example
///
/// ```rust
/// use lockstep_common::types::ResourceId;
///
/// let resource = ResourceId::new(3);
/// assert_eq!(resource.as_u32(), 3);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ResourceId(u32);

impl ResourceId {
    /// Creates a new `ResourceId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

impl From<u32> for ResourceId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<ResourceId> for u32 {
    #[inline]
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

/// Transaction timestamp - an immutable, totally-ordered age marker.
///
/// Assigned once at transaction creation and never changed. Smaller value
/// means older transaction, which means higher priority under wait-die.
/// The core requires only total order and per-transaction uniqueness; it
/// never reads a wall clock.
///
/// # Example
///
/// ```rust
/// use lockstep_common::types::Timestamp;
///
/// let older = Timestamp::new(1);
/// let younger = Timestamp::new(2);
/// assert!(older.is_older_than(younger));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Zero timestamp.
    pub const ZERO: Self = Self(0);

    /// Maximum timestamp value.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a timestamp from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this timestamp is strictly older (smaller) than the
    /// other.
    #[inline]
    #[must_use]
    pub const fn is_older_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    #[inline]
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<Timestamp> for u64 {
    #[inline]
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_id_basics() {
        let txn = TxnId::new(42);
        assert_eq!(txn.as_u64(), 42);
        assert_eq!(txn.next(), TxnId::new(43));
        assert!(txn.is_valid());
        assert!(!TxnId::INVALID.is_valid());
    }

    #[test]
    fn test_txn_id_display() {
        assert_eq!(format!("{}", TxnId::new(7)), "T7");
        assert_eq!(format!("{:?}", TxnId::INVALID), "TxnId(INVALID)");
    }

    #[test]
    fn test_resource_id_basics() {
        let resource = ResourceId::new(3);
        assert_eq!(resource.as_u32(), 3);
        assert_eq!(format!("{}", resource), "R3");
        assert_eq!(ResourceId::from(5u32), ResourceId::new(5));
    }

    #[test]
    fn test_timestamp_ordering() {
        let older = Timestamp::new(10);
        let younger = Timestamp::new(20);
        assert!(older.is_older_than(younger));
        assert!(!younger.is_older_than(older));
        assert!(!older.is_older_than(older));
        assert!(older < younger);
    }

    #[test]
    fn test_serde_round_trip() {
        let txn = TxnId::new(9);
        let json = serde_json::to_string(&txn).unwrap();
        assert_eq!(json, "9");
        let back: TxnId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, txn);
    }
}
