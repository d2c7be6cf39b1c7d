//! Collaborator interface consumed by the collector
//!
//! The class table, object table, allocator and finalizer belong to the
//! VM. The collector only sees them through [`GcHost`], addressed by
//! stable handles.

use crate::handle::{ClassIndex, ObjectHash};
use crate::value::Value;

/// Status flags kept on every class and object table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SlotStatus(u8);

impl SlotStatus {
    /// Slot is free
    pub const EMPTY: Self = Self(0x00);
    /// Slot holds a live entity
    pub const IN_USE: Self = Self(0x01);
    /// Slot is the null entity
    pub const NULL: Self = Self(0x02);
    /// Entity's refcount reached zero; reclaim at next sweep
    pub const GCREQ: Self = Self(0x04);

    /// Create from raw bits
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Get raw bits
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Check if all flags in `other` are set
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union of flags
    pub const fn union(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set the flags in `other`
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the flags in `other`
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Slot is in use, not the null entity, and flagged for collection
    pub const fn is_collectible(&self) -> bool {
        self.contains(Self::IN_USE) && !self.contains(Self::NULL) && self.contains(Self::GCREQ)
    }
}

/// Tables and hooks the collector needs from the VM
///
/// Implementations must answer for any handle below the reported
/// capacity; out-of-range handles report [`SlotStatus::EMPTY`] and no
/// field values.
pub trait GcHost {
    /// Number of class table slots (bound for the sweep)
    fn class_capacity(&self) -> usize;

    /// Number of object table slots (bound for the sweep)
    fn object_capacity(&self) -> usize;

    /// Status of a class table slot
    fn class_status(&self, class: ClassIndex) -> SlotStatus;

    /// Mutable status of a class table slot
    fn class_status_mut(&mut self, class: ClassIndex) -> Option<&mut SlotStatus>;

    /// Status of an object table slot
    fn object_status(&self, object: ObjectHash) -> SlotStatus;

    /// Mutable status of an object table slot
    fn object_status_mut(&mut self, object: ObjectHash) -> Option<&mut SlotStatus>;

    /// Number of static fields declared by a class
    fn static_field_count(&self, class: ClassIndex) -> usize;

    /// Current value of a class-static field
    fn static_field(&self, class: ClassIndex, index: usize) -> Option<Value>;

    /// Number of instance fields carried by an object
    fn instance_field_count(&self, object: ObjectHash) -> usize;

    /// Current value of an object instance field
    fn instance_field(&self, object: ObjectHash, index: usize) -> Option<Value>;

    /// Run the object's finalizer
    fn finalize_object(&mut self, object: ObjectHash);

    /// Release the object's heap data and table slot
    fn free_object(&mut self, object: ObjectHash);

    /// Unload the class and release its table slot
    fn unload_class(&mut self, class: ClassIndex);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_status_flags() {
        let mut status = SlotStatus::IN_USE;
        assert!(!status.is_collectible());

        status.insert(SlotStatus::GCREQ);
        assert!(status.is_collectible());
        assert_eq!(status.bits(), 0x05);

        status.remove(SlotStatus::GCREQ);
        assert!(!status.contains(SlotStatus::GCREQ));
        assert!(status.contains(SlotStatus::IN_USE));
    }

    #[test]
    fn test_null_slot_never_collectible() {
        let status = SlotStatus::from_bits(0x07);
        assert!(!status.is_collectible());
        assert!(!SlotStatus::GCREQ.is_collectible());
    }
}
