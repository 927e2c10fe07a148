//! Core type definitions for Strata.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Surrogate identity of a persisted object.
///
/// Ids are assigned by the store on insert, are monotonically increasing
/// and are never reused while the store lives. `0` marks a transient
/// object that has not been inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The id of an object that is not in a store.
    pub const TRANSIENT: Self = Self(0);

    /// Creates an object id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the transient id.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid:{}", self.0)
    }
}

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Index of a node in the prototype tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Cascade policy of a relation field.
///
/// Flags combine with `|`:
///
/// ```
/// use strata_core::Cascade;
///
/// let policy = Cascade::INSERT | Cascade::REMOVE;
/// assert!(policy.contains(Cascade::REMOVE));
/// assert!(!policy.contains(Cascade::UPDATE));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cascade(u8);

impl Cascade {
    /// Nothing propagates to the related object.
    pub const NONE: Self = Self(0);
    /// Removing the owner removes the related object.
    pub const REMOVE: Self = Self(1);
    /// Reserved. The store keeps the flag but never reads it: updating the
    /// owner does not touch the related object.
    pub const UPDATE: Self = Self(2);
    /// Inserting the owner inserts a transient related object.
    pub const INSERT: Self = Self(4);
    /// All of the above.
    pub const ALL: Self = Self(7);

    /// Returns true if every flag of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Cascade {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Cascade {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Cascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            return write!(f, "Cascade(NONE)");
        }
        let names: Vec<&str> = [
            (Self::INSERT, "INSERT"),
            (Self::UPDATE, "UPDATE"),
            (Self::REMOVE, "REMOVE"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        write!(f, "Cascade({})", names.join(" | "))
    }
}
