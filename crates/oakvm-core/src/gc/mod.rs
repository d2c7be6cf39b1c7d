//! Reference-counting garbage collection
//!
//! This module tracks incoming references to classes and objects and
//! reclaims entities whose count falls to zero.
//!
//! # Architecture
//!
//! - **Accounting**: per-entity refcount plus one status bit per field
//! - **AccountingStore**: side table of records keyed by class index or object hash
//! - **GcHost**: the VM's class/object tables, slot flags and finalizer
//! - **FrameAccounting**: local-slot status bits owned by a call frame
//! - **GcManager**: reference transitions, explicit deletion and the sweep
//!
//! # Lifecycle
//!
//! ```text
//! class_new / object_new      refcount 0, no marked fields
//!        │
//!   mkref / rmref             count moves; reaching 0 sets GCREQ,
//!        │                    a later mkref clears it again
//!        ▼
//!   run (sweep)               GCREQ + refcount 0: finalize, release
//!                             marked fields, destroy, free the slot
//! ```
//!
//! Reference cycles never drop to zero and are never reclaimed.
//!
//! # Example
//!
//! ```
//! use oakvm_core::gc::GcManager;
//! use oakvm_core::heap::VmHeap;
//! use oakvm_core::handle::ObjectHash;
//! use oakvm_core::object::{Class, Object};
//!
//! let mut gc = GcManager::default();
//! let mut heap = VmHeap::new(4, 4);
//!
//! let class = heap.classes.insert(Class::new("demo/Point", 0, 2)).unwrap();
//! gc.class_new(&mut heap, class);
//! let obj = heap.objects.insert(Object::new(class, 2)).unwrap();
//! gc.object_new(&mut heap, obj);
//!
//! gc.object_mkref_from_object(&mut heap, ObjectHash::NULL, obj);
//! gc.object_rmref_from_object(&mut heap, ObjectHash::NULL, obj);
//!
//! let report = gc.run(&mut heap, true);
//! assert_eq!(report.objects_reclaimed, 1);
//! ```

mod accounting;
mod class;
mod collector;
mod frame;
mod host;
mod object;
mod sweep;

pub use accounting::{Accounting, AccountingStore};
pub use collector::{GcManager, GcStats, SweepReport};
pub use frame::FrameAccounting;
pub use host::{GcHost, SlotStatus};
