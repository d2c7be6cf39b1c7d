//! Class and object tables
//!
//! Fixed-capacity tables addressed by [`ClassIndex`] and [`ObjectHash`].
//! Slot `0` of each table is the permanently reserved null entity. Every
//! slot carries a [`SlotStatus`] that the collector uses to flag entities
//! for reclamation.
//!
//! [`VmHeap`] bundles both tables with the finalizer hook and implements
//! [`GcHost`] for the collector.

use std::fmt;

use tracing::debug;

use crate::gc::{GcHost, SlotStatus};
use crate::handle::{ClassIndex, ObjectHash};
use crate::object::{Class, Object};
use crate::value::Value;
use crate::{VmError, VmResult};

/// Table slot
#[derive(Debug, Clone)]
struct Slot<T> {
    status: SlotStatus,
    entry: Option<T>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            status: SlotStatus::EMPTY,
            entry: None,
        }
    }
}

/// Bounded table with a reserved null slot and a free list
#[derive(Debug, Clone)]
struct Table<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    in_use: usize,
}

impl<T> Table<T> {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots: Vec<Slot<T>> = (0..capacity).map(|_| Slot::empty()).collect();
        slots[0].status = SlotStatus::IN_USE.union(SlotStatus::NULL);

        // Pop order hands out the lowest index first
        let free = (1..capacity as u32).rev().collect();

        Self {
            slots,
            free,
            in_use: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn insert(&mut self, entry: T) -> Option<u32> {
        let index = self.free.pop()?;
        let slot = &mut self.slots[index as usize];
        slot.status = SlotStatus::IN_USE;
        slot.entry = Some(entry);
        self.in_use += 1;
        Some(index)
    }

    fn remove(&mut self, index: usize) -> Option<T> {
        if index == 0 {
            return None;
        }
        let slot = self.slots.get_mut(index)?;
        let entry = slot.entry.take()?;
        slot.status = SlotStatus::EMPTY;
        self.free.push(index as u32);
        self.in_use -= 1;
        Some(entry)
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.entry.as_ref()
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.entry.as_mut()
    }

    fn status(&self, index: usize) -> SlotStatus {
        self.slots
            .get(index)
            .map_or(SlotStatus::EMPTY, |slot| slot.status)
    }

    fn entries_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.slots.iter_mut().filter_map(|slot| slot.entry.as_mut())
    }

    fn status_mut(&mut self, index: usize) -> Option<&mut SlotStatus> {
        self.slots.get_mut(index).map(|slot| &mut slot.status)
    }
}

/// Loaded classes
#[derive(Debug, Clone)]
pub struct ClassArea {
    table: Table<Class>,
}

impl ClassArea {
    /// Create a class area with `capacity` slots (including the null slot)
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Table::new(capacity),
        }
    }

    /// Place a class in the first free slot
    pub fn insert(&mut self, class: Class) -> VmResult<ClassIndex> {
        self.table
            .insert(class)
            .map(ClassIndex::new)
            .ok_or(VmError::ClassTableFull)
    }

    /// Remove a class, freeing its slot
    pub fn remove(&mut self, index: ClassIndex) -> Option<Class> {
        self.table.remove(index.index())
    }

    /// Look up a class
    pub fn get(&self, index: ClassIndex) -> Option<&Class> {
        self.table.get(index.index())
    }

    /// Look up a class mutably
    pub fn get_mut(&mut self, index: ClassIndex) -> Option<&mut Class> {
        self.table.get_mut(index.index())
    }

    /// Slot status
    pub fn status(&self, index: ClassIndex) -> SlotStatus {
        self.table.status(index.index())
    }

    /// Find a loaded class by name
    pub fn find(&self, name: &str) -> Option<ClassIndex> {
        (1..self.table.capacity())
            .find(|&i| self.table.get(i).is_some_and(|c| c.name == name))
            .map(|i| ClassIndex::new(i as u32))
    }

    /// Point every subclass of `old` at `new`; returns the number moved
    pub fn retarget_superclass(&mut self, old: ClassIndex, new: ClassIndex) -> usize {
        let mut moved = 0;
        for class in self.table.entries_mut().filter(|c| c.superclass == old) {
            class.superclass = new;
            moved += 1;
        }
        moved
    }

    /// Number of loaded classes
    pub fn len(&self) -> usize {
        self.table.in_use
    }

    /// Check if no classes are loaded
    pub fn is_empty(&self) -> bool {
        self.table.in_use == 0
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }
}

/// Allocated objects
#[derive(Debug, Clone)]
pub struct ObjectHeap {
    table: Table<Object>,
}

impl ObjectHeap {
    /// Create an object heap with `capacity` slots (including the null slot)
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Table::new(capacity),
        }
    }

    /// Place an object in the first free slot
    pub fn insert(&mut self, object: Object) -> VmResult<ObjectHash> {
        self.table
            .insert(object)
            .map(ObjectHash::new)
            .ok_or(VmError::ObjectTableFull)
    }

    /// Remove an object, freeing its slot
    pub fn remove(&mut self, hash: ObjectHash) -> Option<Object> {
        self.table.remove(hash.index())
    }

    /// Look up an object
    pub fn get(&self, hash: ObjectHash) -> Option<&Object> {
        self.table.get(hash.index())
    }

    /// Look up an object mutably
    pub fn get_mut(&mut self, hash: ObjectHash) -> Option<&mut Object> {
        self.table.get_mut(hash.index())
    }

    /// Slot status
    pub fn status(&self, hash: ObjectHash) -> SlotStatus {
        self.table.status(hash.index())
    }

    /// Point every instance of `old` at `new`; returns the number moved
    pub fn retarget_class(&mut self, old: ClassIndex, new: ClassIndex) -> usize {
        let mut moved = 0;
        for object in self.table.entries_mut().filter(|o| o.class == old) {
            object.class = new;
            moved += 1;
        }
        moved
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.table.in_use
    }

    /// Check if the heap holds no objects
    pub fn is_empty(&self) -> bool {
        self.table.in_use == 0
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }
}

/// Finalizer callback
pub type Finalizer = Box<dyn FnMut(ObjectHash, &Object) + Send>;

/// Structural edge left dangling when the collector frees an entity
///
/// The collector does not know that an object points at its class or a
/// class at its superclass. The owner of those edges drains these with
/// [`VmHeap::take_released_edges`] and drops the matching references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasedEdge {
    /// A freed object's link to its defining class
    Instance(ObjectHash, ClassIndex),
    /// An unloaded class's link to its superclass
    Superclass(ClassIndex, ClassIndex),
}

/// Class area, object heap and finalizer, as seen by the collector
pub struct VmHeap {
    /// Loaded classes
    pub classes: ClassArea,
    /// Allocated objects
    pub objects: ObjectHeap,
    finalizer: Option<Finalizer>,
    finalized: Vec<ObjectHash>,
    unloaded: Vec<ClassIndex>,
    released: Vec<ReleasedEdge>,
}

impl VmHeap {
    /// Create tables with the given slot counts
    pub fn new(max_classes: usize, max_objects: usize) -> Self {
        Self {
            classes: ClassArea::new(max_classes),
            objects: ObjectHeap::new(max_objects),
            finalizer: None,
            finalized: Vec::new(),
            unloaded: Vec::new(),
            released: Vec::new(),
        }
    }

    /// Install the finalizer callback
    pub fn set_finalizer(&mut self, finalizer: Finalizer) {
        self.finalizer = Some(finalizer);
    }

    /// Objects finalized since the log was last cleared, in order
    pub fn finalized(&self) -> &[ObjectHash] {
        &self.finalized
    }

    /// Classes unloaded since the log was last cleared, in order
    pub fn unloaded(&self) -> &[ClassIndex] {
        &self.unloaded
    }

    /// Drain the finalized-object log
    pub fn take_finalized(&mut self) -> Vec<ObjectHash> {
        std::mem::take(&mut self.finalized)
    }

    /// Drain the unloaded-class log
    pub fn take_unloaded(&mut self) -> Vec<ClassIndex> {
        std::mem::take(&mut self.unloaded)
    }

    /// Forget finalized and unloaded entities, keeping allocated capacity
    pub fn clear_reclaim_log(&mut self) {
        self.finalized.clear();
        self.unloaded.clear();
    }

    /// Drain the edges released by frees and unloads since the last call
    pub fn take_released_edges(&mut self) -> Vec<ReleasedEdge> {
        std::mem::take(&mut self.released)
    }
}

impl fmt::Debug for VmHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmHeap")
            .field("classes", &self.classes.len())
            .field("objects", &self.objects.len())
            .field("finalized", &self.finalized.len())
            .field("unloaded", &self.unloaded.len())
            .field("released", &self.released.len())
            .finish()
    }
}

impl Default for VmHeap {
    fn default() -> Self {
        let config = crate::config::GcConfig::default();
        Self::new(config.max_classes, config.max_objects)
    }
}

impl GcHost for VmHeap {
    fn class_capacity(&self) -> usize {
        self.classes.capacity()
    }

    fn object_capacity(&self) -> usize {
        self.objects.capacity()
    }

    fn class_status(&self, class: ClassIndex) -> SlotStatus {
        self.classes.status(class)
    }

    fn class_status_mut(&mut self, class: ClassIndex) -> Option<&mut SlotStatus> {
        self.classes.table.status_mut(class.index())
    }

    fn object_status(&self, object: ObjectHash) -> SlotStatus {
        self.objects.status(object)
    }

    fn object_status_mut(&mut self, object: ObjectHash) -> Option<&mut SlotStatus> {
        self.objects.table.status_mut(object.index())
    }

    fn static_field_count(&self, class: ClassIndex) -> usize {
        self.classes.get(class).map_or(0, Class::static_field_count)
    }

    fn static_field(&self, class: ClassIndex, index: usize) -> Option<Value> {
        self.classes.get(class)?.get_static(index)
    }

    fn instance_field_count(&self, object: ObjectHash) -> usize {
        self.objects.get(object).map_or(0, Object::field_count)
    }

    fn instance_field(&self, object: ObjectHash, index: usize) -> Option<Value> {
        self.objects.get(object)?.get_field(index)
    }

    fn finalize_object(&mut self, object: ObjectHash) {
        if let (Some(finalizer), Some(obj)) = (self.finalizer.as_mut(), self.objects.get(object)) {
            finalizer(object, obj);
        }
        self.finalized.push(object);
    }

    fn free_object(&mut self, object: ObjectHash) {
        if let Some(removed) = self.objects.remove(object) {
            debug!(%object, class = %removed.class, "object freed");
            if !removed.class.is_null() {
                self.released.push(ReleasedEdge::Instance(object, removed.class));
            }
        }
    }

    fn unload_class(&mut self, class: ClassIndex) {
        if let Some(removed) = self.classes.remove(class) {
            debug!(%class, name = %removed.name, "class unloaded");
            self.unloaded.push(class);
            if !removed.superclass.is_null() {
                self.released.push(ReleasedEdge::Superclass(class, removed.superclass));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_slot_reserved() {
        let heap = ObjectHeap::new(4);
        let status = heap.status(ObjectHash::NULL);
        assert!(status.contains(SlotStatus::IN_USE));
        assert!(status.contains(SlotStatus::NULL));
        assert!(heap.is_empty());
    }

    #[test]
    fn test_insert_lowest_first() {
        let mut heap = ObjectHeap::new(4);
        let a = heap.insert(Object::new(ClassIndex::new(1), 0)).unwrap();
        let b = heap.insert(Object::new(ClassIndex::new(1), 0)).unwrap();
        assert_eq!(a, ObjectHash::new(1));
        assert_eq!(b, ObjectHash::new(2));
        assert_eq!(heap.status(a), SlotStatus::IN_USE);
    }

    #[test]
    fn test_table_full() {
        let mut heap = ObjectHeap::new(2);
        heap.insert(Object::new(ClassIndex::new(1), 0)).unwrap();
        let err = heap.insert(Object::new(ClassIndex::new(1), 0)).unwrap_err();
        assert!(matches!(err, VmError::ObjectTableFull));
    }

    #[test]
    fn test_remove_recycles_slot() {
        let mut classes = ClassArea::new(3);
        let a = classes.insert(Class::new("A", 0, 0)).unwrap();
        assert!(classes.remove(a).is_some());
        assert_eq!(classes.status(a), SlotStatus::EMPTY);
        assert!(classes.remove(a).is_none());

        let b = classes.insert(Class::new("B", 0, 0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(classes.find("B"), Some(b));
        assert_eq!(classes.find("A"), None);
    }

    #[test]
    fn test_retarget_class() {
        let mut heap = ObjectHeap::new(4);
        let a = heap.insert(Object::new(ClassIndex::new(1), 0)).unwrap();
        let b = heap.insert(Object::new(ClassIndex::new(2), 0)).unwrap();

        assert_eq!(heap.retarget_class(ClassIndex::new(1), ClassIndex::new(3)), 1);
        assert_eq!(heap.get(a).unwrap().class, ClassIndex::new(3));
        assert_eq!(heap.get(b).unwrap().class, ClassIndex::new(2));
    }

    #[test]
    fn test_null_slot_never_removed() {
        let mut classes = ClassArea::new(3);
        assert!(classes.remove(ClassIndex::NULL).is_none());
        assert!(classes.status(ClassIndex::NULL).contains(SlotStatus::NULL));
    }

    #[test]
    fn test_host_hooks() {
        let mut heap = VmHeap::new(4, 4);
        let class = heap.classes.insert(Class::new("A", 1, 2)).unwrap();
        let obj = heap.objects.insert(Object::new(class, 2)).unwrap();

        assert_eq!(heap.static_field_count(class), 1);
        assert_eq!(heap.instance_field_count(obj), 2);
        assert_eq!(heap.instance_field(obj, 5), None);

        heap.finalize_object(obj);
        heap.free_object(obj);
        heap.unload_class(class);

        assert_eq!(heap.finalized(), &[obj]);
        assert_eq!(heap.unloaded(), &[class]);
        assert!(heap.objects.is_empty());
        assert!(heap.classes.is_empty());
        assert_eq!(
            heap.take_released_edges(),
            vec![ReleasedEdge::Instance(obj, class)]
        );
        assert!(heap.take_released_edges().is_empty());
    }

    #[test]
    fn test_reclaim_log_drains() {
        let mut heap = VmHeap::new(4, 4);
        let class = heap.classes.insert(Class::new("demo/Logged", 0, 0)).unwrap();
        let a = heap.objects.insert(Object::new(class, 0)).unwrap();
        let b = heap.objects.insert(Object::new(class, 0)).unwrap();

        heap.finalize_object(a);
        assert_eq!(heap.take_finalized(), vec![a]);
        assert!(heap.finalized().is_empty());

        heap.finalize_object(b);
        heap.unload_class(class);
        heap.clear_reclaim_log();
        assert!(heap.finalized().is_empty());
        assert!(heap.take_unloaded().is_empty());
    }

    #[test]
    fn test_unload_releases_superclass_edge() {
        let mut heap = VmHeap::new(4, 1);
        let base = heap.classes.insert(Class::new("demo/Base", 0, 0)).unwrap();
        let derived = heap
            .classes
            .insert(Class::with_superclass("demo/Derived", 0, 0, base))
            .unwrap();

        heap.unload_class(derived);
        heap.unload_class(base);
        assert_eq!(
            heap.take_released_edges(),
            vec![ReleasedEdge::Superclass(derived, base)]
        );
    }

    #[test]
    fn test_finalizer_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        let mut heap = VmHeap::new(2, 2);
        heap.set_finalizer(Box::new(move |_, _| {
            seen.fetch_add(1, Ordering::Relaxed);
        }));
        let obj = heap.objects.insert(Object::new(ClassIndex::new(1), 0)).unwrap();
        heap.finalize_object(obj);

        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
