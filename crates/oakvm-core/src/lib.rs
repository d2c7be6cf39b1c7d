//! oakvm Core Runtime
//!
//! This crate provides the memory-management core of the oakvm Java
//! virtual machine:
//! - Reference-counting garbage collector with field and local tracking
//! - Class area and object heap tables
//! - Per-thread call stacks whose frames own their local-slot accounting
//! - A runtime facade wiring the collector into class loading, allocation,
//!   field stores and method invocation

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod gc;
pub mod handle;
pub mod heap;
pub mod object;
pub mod stack;
pub mod value;
pub mod vm;

pub use config::GcConfig;
pub use error::{fatal, FatalReason, GcError, GcResult};
pub use gc::{FrameAccounting, GcHost, GcManager, GcStats, SlotStatus, SweepReport};
pub use handle::{ClassIndex, ObjectHash, ThreadIndex};
pub use heap::{ClassArea, ObjectHeap, ReleasedEdge, VmHeap};
pub use object::{Class, Object};
pub use stack::{CallFrame, Stack, StackStats};
pub use value::Value;
pub use vm::{Runtime, SharedRuntime};

/// VM execution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// Class table has no free slot
    #[error("Class table full")]
    ClassTableFull,

    /// Object heap has no free slot
    #[error("Object heap full")]
    ObjectTableFull,

    /// Class index does not name a loaded class
    #[error("No such class: {0}")]
    NoSuchClass(ClassIndex),

    /// Object hash does not name a live object
    #[error("No such object: {0}")]
    NoSuchObject(ObjectHash),

    /// Field index out of bounds
    #[error("Field index {index} out of bounds (entity has {count} fields)")]
    FieldOutOfRange {
        /// Requested index
        index: usize,
        /// Number of fields
        count: usize,
    },

    /// Stack overflow
    #[error("Stack overflow")]
    StackOverflow,

    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Local access with no active frame
    #[error("No active call frame")]
    NoActiveFrame,

    /// Thread index does not name a running thread
    #[error("No such thread: {0}")]
    NoSuchThread(ThreadIndex),

    /// Collector rejected the operation
    #[error(transparent)]
    Gc(#[from] GcError),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
