//! Object lifecycle and instance field tracking

use tracing::{debug, trace, warn};

use super::collector::GcManager;
use super::host::{GcHost, SlotStatus};
use crate::error::{fatal, FatalReason, GcError, GcResult};
use crate::handle::{ClassIndex, ObjectHash};

impl GcManager {
    /// Start tracking a newly allocated object
    ///
    /// # Panics
    ///
    /// Fatal if `object` is null or already tracked.
    pub fn object_new(&mut self, host: &mut dyn GcHost, object: ObjectHash) {
        let field_count = host.instance_field_count(object);
        self.objects.create(object, field_count);
        trace!(%object, field_count, "object accounting created");
    }

    /// Finalize and delete an object if nothing references it
    ///
    /// Runs the finalizer, releases instance-field references still held,
    /// destroys the record and frees the object's heap slot.
    ///
    /// # Errors
    ///
    /// `StillReferenced` if the refcount is positive (nothing changes);
    /// `NoAccounting` if the object is not tracked.
    ///
    /// # Panics
    ///
    /// Fatal if `object` is null.
    pub fn object_delete(&mut self, host: &mut dyn GcHost, object: ObjectHash) -> GcResult<()> {
        if object.is_null() {
            fatal(FatalReason::NullObject);
        }
        let refcount = self
            .objects
            .get(object)
            .ok_or(GcError::NoAccounting)?
            .refcount();
        if refcount > 0 {
            return Err(GcError::StillReferenced { refcount });
        }

        self.reclaim_object(host, object, true);
        Ok(())
    }

    /// Count a reference from a class to an object
    ///
    /// `from` is recorded in diagnostics only.
    pub fn object_mkref_from_class(&mut self, host: &mut dyn GcHost, from: ClassIndex, to: ObjectHash) {
        trace!(%from, %to, "class -> object reference");
        self.retain_object(host, to);
    }

    /// Count a reference from one object to another
    ///
    /// `from` is recorded in diagnostics only.
    pub fn object_mkref_from_object(&mut self, host: &mut dyn GcHost, from: ObjectHash, to: ObjectHash) {
        trace!(%from, %to, "object -> object reference");
        self.retain_object(host, to);
    }

    /// Drop a reference from a class to an object
    pub fn object_rmref_from_class(&mut self, host: &mut dyn GcHost, from: ClassIndex, to: ObjectHash) {
        trace!(%from, %to, "class -> object reference dropped");
        self.release_object(host, to);
    }

    /// Drop a reference from one object to another
    pub fn object_rmref_from_object(&mut self, host: &mut dyn GcHost, from: ObjectHash, to: ObjectHash) {
        trace!(%from, %to, "object -> object reference dropped");
        self.release_object(host, to);
    }

    /// Count the object referenced by an instance field
    ///
    /// Returns `Ok(true)` if a reference was established, `Ok(false)` if
    /// the field holds no reference or is already counted.
    ///
    /// # Errors
    ///
    /// `FieldOutOfRange` if `field` is not an instance field of `object`.
    pub fn object_field_mkref(
        &mut self,
        host: &mut dyn GcHost,
        object: ObjectHash,
        field: usize,
    ) -> GcResult<bool> {
        let record = self.objects.expect_mut(object);
        match record.is_marked(field) {
            None => {
                return Err(GcError::FieldOutOfRange {
                    index: field,
                    count: record.field_count(),
                })
            }
            Some(true) => return Ok(false),
            Some(false) => {}
        }

        let Some(target) = host.instance_field(object, field).and_then(|v| v.as_reference()) else {
            return Ok(false);
        };

        record.set_marked(field, true);
        self.retain_object(host, target);
        Ok(true)
    }

    /// Drop the reference counted for an instance field
    ///
    /// Honored only if the field's status bit is set. Call before the
    /// field is overwritten.
    ///
    /// # Errors
    ///
    /// `FieldOutOfRange` if `field` is not an instance field of `object`.
    pub fn object_field_rmref(
        &mut self,
        host: &mut dyn GcHost,
        object: ObjectHash,
        field: usize,
    ) -> GcResult<bool> {
        let record = self.objects.expect_mut(object);
        match record.set_marked(field, false) {
            None => Err(GcError::FieldOutOfRange {
                index: field,
                count: record.field_count(),
            }),
            Some(false) => Ok(false),
            Some(true) => match host.instance_field(object, field).and_then(|v| v.as_reference()) {
                Some(target) => {
                    self.release_object(host, target);
                    Ok(true)
                }
                None => {
                    warn!(%object, field, "counted instance field no longer holds a reference");
                    Ok(false)
                }
            },
        }
    }

    /// Finalize (optionally) and destroy an object record that has reached zero
    pub(super) fn reclaim_object(&mut self, host: &mut dyn GcHost, object: ObjectHash, finalize: bool) {
        if !self.objects.contains(object) {
            return;
        }

        if finalize {
            host.finalize_object(object);
            self.stats.objects_finalized += 1;
        }

        let Some(record) = self.objects.destroy(object) else {
            return;
        };
        for field in record.marked_fields() {
            if let Some(target) = host.instance_field(object, field).and_then(|v| v.as_reference()) {
                self.release_object(host, target);
            }
        }

        if let Some(status) = host.object_status_mut(object) {
            status.remove(SlotStatus::GCREQ);
        }
        host.free_object(object);

        self.stats.objects_reclaimed += 1;
        debug!(%object, finalize, "object reclaimed");
    }
}

#[cfg(test)]
mod tests {
    use crate::gc::{GcHost, GcManager, SlotStatus};
    use crate::handle::{ClassIndex, ObjectHash};
    use crate::heap::VmHeap;
    use crate::object::{Class, Object};
    use crate::value::Value;
    use crate::GcError;

    struct Fixture {
        gc: GcManager,
        heap: VmHeap,
        class: ClassIndex,
    }

    impl Fixture {
        fn new() -> Self {
            let mut gc = GcManager::default();
            let mut heap = VmHeap::new(4, 16);
            let class = heap.classes.insert(Class::new("demo/Node", 0, 3)).unwrap();
            gc.class_new(&mut heap, class);
            Self { gc, heap, class }
        }

        fn alloc(&mut self) -> ObjectHash {
            let obj = self.heap.objects.insert(Object::new(self.class, 3)).unwrap();
            self.gc.object_new(&mut self.heap, obj);
            obj
        }

        fn store(&mut self, obj: ObjectHash, field: usize, target: ObjectHash) {
            self.heap
                .objects
                .get_mut(obj)
                .unwrap()
                .set_field(field, Value::reference(target))
                .unwrap();
        }
    }

    #[test]
    fn test_object_new_starts_clear() {
        let mut fx = Fixture::new();
        let obj = fx.alloc();

        assert_eq!(fx.gc.object_refcount(obj), Some(0));
        assert_eq!(fx.gc.object_field_marked(obj, 0), Some(false));
        assert_eq!(fx.gc.object_field_marked(obj, 3), None);
        assert!(!fx.heap.object_status(obj).contains(SlotStatus::GCREQ));
    }

    #[test]
    #[should_panic(expected = "null object hash")]
    fn test_object_new_null_is_fatal() {
        let mut fx = Fixture::new();
        fx.gc.object_new(&mut fx.heap, ObjectHash::NULL);
    }

    #[test]
    #[should_panic(expected = "object has no accounting record")]
    fn test_mkref_untracked_is_fatal() {
        let mut fx = Fixture::new();
        fx.gc
            .object_mkref_from_object(&mut fx.heap, ObjectHash::NULL, ObjectHash::new(9));
    }

    #[test]
    fn test_edges_and_revival() {
        let mut fx = Fixture::new();
        let obj = fx.alloc();

        fx.gc.object_mkref_from_object(&mut fx.heap, ObjectHash::NULL, obj);
        fx.gc.object_mkref_from_class(&mut fx.heap, fx.class, obj);
        assert_eq!(fx.gc.object_refcount(obj), Some(2));

        fx.gc.object_rmref_from_class(&mut fx.heap, fx.class, obj);
        fx.gc.object_rmref_from_object(&mut fx.heap, ObjectHash::NULL, obj);
        assert_eq!(fx.gc.object_refcount(obj), Some(0));
        assert!(fx.heap.object_status(obj).contains(SlotStatus::GCREQ));

        // An edge recreated before the sweep revives the object
        fx.gc.object_mkref_from_object(&mut fx.heap, ObjectHash::NULL, obj);
        assert_eq!(fx.gc.object_refcount(obj), Some(1));
        assert!(!fx.heap.object_status(obj).contains(SlotStatus::GCREQ));
    }

    #[test]
    fn test_instance_field_tracking() {
        let mut fx = Fixture::new();
        let parent = fx.alloc();
        let child = fx.alloc();
        fx.store(parent, 1, child);

        assert_eq!(fx.gc.object_field_mkref(&mut fx.heap, parent, 1), Ok(true));
        assert_eq!(fx.gc.object_refcount(child), Some(1));
        assert_eq!(fx.gc.object_field_marked(parent, 1), Some(true));

        assert_eq!(fx.gc.object_field_rmref(&mut fx.heap, parent, 1), Ok(true));
        assert_eq!(fx.gc.object_refcount(child), Some(0));
        assert_eq!(fx.gc.object_field_marked(parent, 1), Some(false));

        assert_eq!(fx.gc.object_field_rmref(&mut fx.heap, parent, 1), Ok(false));
        assert_eq!(fx.gc.object_refcount(child), Some(0));
        assert_eq!(fx.gc.stats().clamped_releases, 0);
    }

    #[test]
    fn test_instance_field_out_of_range() {
        let mut fx = Fixture::new();
        let obj = fx.alloc();
        assert_eq!(
            fx.gc.object_field_mkref(&mut fx.heap, obj, 3),
            Err(GcError::FieldOutOfRange { index: 3, count: 3 })
        );
    }

    #[test]
    fn test_object_delete_requires_zero() {
        let mut fx = Fixture::new();
        let obj = fx.alloc();
        fx.gc.object_mkref_from_object(&mut fx.heap, ObjectHash::NULL, obj);

        assert_eq!(
            fx.gc.object_delete(&mut fx.heap, obj),
            Err(GcError::StillReferenced { refcount: 1 })
        );
        assert!(fx.heap.objects.get(obj).is_some());
        assert!(fx.heap.finalized().is_empty());

        fx.gc.object_rmref_from_object(&mut fx.heap, ObjectHash::NULL, obj);
        assert_eq!(fx.gc.object_delete(&mut fx.heap, obj), Ok(()));
        assert_eq!(fx.heap.finalized(), &[obj]);
        assert!(fx.heap.objects.get(obj).is_none());
        assert!(!fx.gc.has_object_accounting(obj));

        assert_eq!(fx.gc.object_delete(&mut fx.heap, obj), Err(GcError::NoAccounting));
        assert_eq!(fx.heap.finalized().len(), 1);
    }

    #[test]
    fn test_object_delete_releases_fields() {
        let mut fx = Fixture::new();
        let parent = fx.alloc();
        let child = fx.alloc();
        fx.store(parent, 0, child);
        fx.gc.object_field_mkref(&mut fx.heap, parent, 0).unwrap();

        fx.gc.object_delete(&mut fx.heap, parent).unwrap();
        assert_eq!(fx.gc.object_refcount(child), Some(0));
        assert!(fx.heap.object_status(child).contains(SlotStatus::GCREQ));
        assert_eq!(fx.gc.stats().objects_reclaimed, 1);
        assert_eq!(fx.gc.stats().objects_finalized, 1);
    }
}
