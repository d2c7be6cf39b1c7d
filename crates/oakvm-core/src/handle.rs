//! Stable integer handles for classes, objects and threads
//!
//! The VM never hands out pointers to its tables. Every class, object and
//! thread is addressed by a small integer index, and index `0` is reserved
//! as the null sentinel in each table.

use crate::error::FatalReason;
use std::fmt;

/// Handle type that keys a collector side table
pub trait TableHandle: Copy + fmt::Debug {
    /// Reported when the null sentinel is passed where an entity is required
    const NULL_REASON: FatalReason;
    /// Reported when a record is created twice
    const DUPLICATE_REASON: FatalReason;
    /// Reported when a required record does not exist
    const MISSING_REASON: FatalReason;

    /// Side-table index
    fn slot(self) -> usize;

    /// Check if this is the null sentinel
    fn is_null_handle(self) -> bool;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// The null sentinel
            pub const NULL: Self = Self(0);

            /// Create a handle from a raw table index
            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Check if this is the null sentinel
            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Get the raw value
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            /// Get the table index
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_null() {
                    write!(f, concat!($label, "(null)"))
                } else {
                    write!(f, concat!($label, "({})"), self.0)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_handle!(
    /// Index into the class table
    ClassIndex,
    "class"
);

define_handle!(
    /// Hash (index) into the object table
    ObjectHash,
    "object"
);

define_handle!(
    /// Index into the thread table
    ThreadIndex,
    "thread"
);

impl TableHandle for ClassIndex {
    const NULL_REASON: FatalReason = FatalReason::NullClass;
    const DUPLICATE_REASON: FatalReason = FatalReason::DuplicateClassAccounting;
    const MISSING_REASON: FatalReason = FatalReason::MissingClassAccounting;

    fn slot(self) -> usize {
        self.index()
    }

    fn is_null_handle(self) -> bool {
        self.is_null()
    }
}

impl TableHandle for ObjectHash {
    const NULL_REASON: FatalReason = FatalReason::NullObject;
    const DUPLICATE_REASON: FatalReason = FatalReason::DuplicateObjectAccounting;
    const MISSING_REASON: FatalReason = FatalReason::MissingObjectAccounting;

    fn slot(self) -> usize {
        self.index()
    }

    fn is_null_handle(self) -> bool {
        self.is_null()
    }
}
