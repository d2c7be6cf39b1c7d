//! Collector error types
//!
//! Two disjoint classes of failure exist:
//!
//! - [`GcError`]: recoverable range/state failures (bad field or local
//!   index, delete of a still-referenced entity). Returned as `Err`.
//! - [`FatalReason`]: violations of the VM's internal invariants (null
//!   handle where an entity is required, double allocation of an
//!   accounting record). These never surface as values; [`fatal`] logs the
//!   reason and aborts the current thread of execution with a panic.

use thiserror::Error;

/// Recoverable collector failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcError {
    /// Static or instance field index out of range
    #[error("Field index {index} out of bounds (entity has {count} fields)")]
    FieldOutOfRange {
        /// Requested field index
        index: usize,
        /// Number of tracked fields
        count: usize,
    },

    /// Local-variable slot index out of range
    #[error("Local index {index} out of bounds (frame has {count} locals)")]
    LocalOutOfRange {
        /// Requested slot index
        index: usize,
        /// Number of locals in the frame
        count: usize,
    },

    /// Delete requested while incoming references remain
    #[error("Entity is still referenced (refcount {refcount})")]
    StillReferenced {
        /// Current reference count
        refcount: u32,
    },

    /// The entity has no accounting record (never created, or already deleted)
    #[error("Entity has no accounting record")]
    NoAccounting,
}

/// Collector result type
pub type GcResult<T> = Result<T, GcError>;

/// Unrecoverable internal-invariant violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FatalReason {
    /// Null class index where a live class is required
    #[error("null class index")]
    NullClass,

    /// Null object hash where a live object is required
    #[error("null object hash")]
    NullObject,

    /// Null thread index where a live thread is required
    #[error("null thread index")]
    NullThread,

    /// Class already has an accounting record
    #[error("class accounting record already allocated")]
    DuplicateClassAccounting,

    /// Object already has an accounting record
    #[error("object accounting record already allocated")]
    DuplicateObjectAccounting,

    /// Class has no accounting record
    #[error("class has no accounting record")]
    MissingClassAccounting,

    /// Object has no accounting record
    #[error("object has no accounting record")]
    MissingObjectAccounting,

    /// Accounting record could not be allocated
    #[error("cannot allocate accounting record")]
    AllocationFailed,
}

impl FatalReason {
    /// Process exit code reported for this reason
    pub const fn exit_code(self) -> i32 {
        match self {
            FatalReason::NullClass => 70,
            FatalReason::NullObject => 71,
            FatalReason::NullThread => 72,
            FatalReason::DuplicateClassAccounting => 73,
            FatalReason::DuplicateObjectAccounting => 74,
            FatalReason::MissingClassAccounting => 75,
            FatalReason::MissingObjectAccounting => 76,
            FatalReason::AllocationFailed => 77,
        }
    }
}

/// Report an internal-invariant violation and abort
///
/// # Panics
///
/// Always.
#[cold]
#[track_caller]
pub fn fatal(reason: FatalReason) -> ! {
    tracing::error!(code = reason.exit_code(), %reason, "fatal garbage collector error");
    panic!("fatal GC error {}: {}", reason.exit_code(), reason);
}
