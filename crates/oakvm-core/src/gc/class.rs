//! Class lifecycle and class-static field tracking

use tracing::{debug, trace, warn};

use super::accounting::Accounting;
use super::collector::GcManager;
use super::host::{GcHost, SlotStatus};
use crate::error::{fatal, FatalReason, GcError, GcResult};
use crate::handle::{ClassIndex, ObjectHash};

impl GcManager {
    /// Start tracking a newly loaded class
    ///
    /// The record starts with a zero refcount and one cleared bit per
    /// static field.
    ///
    /// # Panics
    ///
    /// Fatal if `class` is null or already tracked.
    pub fn class_new(&mut self, host: &mut dyn GcHost, class: ClassIndex) {
        let field_count = host.static_field_count(class);
        self.classes.create(class, field_count);
        trace!(%class, field_count, "class accounting created");
    }

    /// Move a class's accounting to its replacement definition
    ///
    /// The refcount carries over. Static-field references held by the old
    /// definition are released; the new definition starts with no marked
    /// fields. Call before `old` is unloaded from the class table.
    ///
    /// # Panics
    ///
    /// Fatal if either index is null, `old` is not tracked, or `new`
    /// already is.
    pub fn class_reload(&mut self, host: &mut dyn GcHost, old: ClassIndex, new: ClassIndex) {
        if old.is_null() || new.is_null() {
            fatal(FatalReason::NullClass);
        }
        if self.classes.contains(new) {
            fatal(FatalReason::DuplicateClassAccounting);
        }
        let record = match self.classes.destroy(old) {
            Some(record) => record,
            None => fatal(FatalReason::MissingClassAccounting),
        };

        self.release_static_fields(host, old, &record);

        let collect_requested = match host.class_status_mut(old) {
            Some(status) => {
                let requested = status.contains(SlotStatus::GCREQ);
                status.remove(SlotStatus::GCREQ);
                requested
            }
            None => false,
        };

        let field_count = host.static_field_count(new);
        self.classes
            .install(new, Accounting::with_refcount(record.refcount(), field_count));
        if collect_requested {
            if let Some(status) = host.class_status_mut(new) {
                status.insert(SlotStatus::GCREQ);
            }
        }

        debug!(%old, %new, refcount = record.refcount(), "class reloaded");
    }

    /// Delete a class's accounting if nothing references it
    ///
    /// Releases any static-field references still held, destroys the
    /// record, and unloads the class when `also_unload` is set.
    ///
    /// # Errors
    ///
    /// `StillReferenced` if the refcount is positive (nothing changes);
    /// `NoAccounting` if the class is not tracked.
    ///
    /// # Panics
    ///
    /// Fatal if `class` is null.
    pub fn class_delete(
        &mut self,
        host: &mut dyn GcHost,
        class: ClassIndex,
        also_unload: bool,
    ) -> GcResult<()> {
        if class.is_null() {
            fatal(FatalReason::NullClass);
        }
        let refcount = self
            .classes
            .get(class)
            .ok_or(GcError::NoAccounting)?
            .refcount();
        if refcount > 0 {
            return Err(GcError::StillReferenced { refcount });
        }

        self.reclaim_class(host, class, also_unload);
        Ok(())
    }

    /// Count a reference from one class to another
    ///
    /// `from` is recorded in diagnostics only.
    pub fn class_mkref_from_class(&mut self, host: &mut dyn GcHost, from: ClassIndex, to: ClassIndex) {
        trace!(%from, %to, "class -> class reference");
        self.retain_class(host, to);
    }

    /// Drop a reference from one class to another
    pub fn class_rmref_from_class(&mut self, host: &mut dyn GcHost, from: ClassIndex, to: ClassIndex) {
        trace!(%from, %to, "class -> class reference dropped");
        self.release_class(host, to);
    }

    /// Count an object's link to its class
    ///
    /// `from` is recorded in diagnostics only.
    pub fn class_mkref_from_object(&mut self, host: &mut dyn GcHost, from: ObjectHash, to: ClassIndex) {
        trace!(%from, %to, "object -> class reference");
        self.retain_class(host, to);
    }

    /// Drop an object's link to its class
    pub fn class_rmref_from_object(&mut self, host: &mut dyn GcHost, from: ObjectHash, to: ClassIndex) {
        trace!(%from, %to, "object -> class reference dropped");
        self.release_class(host, to);
    }

    /// Count the object referenced by a class-static field
    ///
    /// Returns `Ok(true)` if a reference was established, `Ok(false)` if
    /// the field holds no reference or is already counted.
    ///
    /// # Errors
    ///
    /// `FieldOutOfRange` if `field` is not a static field of `class`.
    pub fn class_field_mkref(
        &mut self,
        host: &mut dyn GcHost,
        class: ClassIndex,
        field: usize,
    ) -> GcResult<bool> {
        let record = self.classes.expect_mut(class);
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

        let Some(target) = host.static_field(class, field).and_then(|v| v.as_reference()) else {
            return Ok(false);
        };

        record.set_marked(field, true);
        self.retain_object(host, target);
        Ok(true)
    }

    /// Drop the reference counted for a class-static field
    ///
    /// Honored only if the field's status bit is set. Call before the
    /// field is overwritten.
    ///
    /// # Errors
    ///
    /// `FieldOutOfRange` if `field` is not a static field of `class`.
    pub fn class_field_rmref(
        &mut self,
        host: &mut dyn GcHost,
        class: ClassIndex,
        field: usize,
    ) -> GcResult<bool> {
        let record = self.classes.expect_mut(class);
        match record.set_marked(field, false) {
            None => Err(GcError::FieldOutOfRange {
                index: field,
                count: record.field_count(),
            }),
            Some(false) => Ok(false),
            Some(true) => match host.static_field(class, field).and_then(|v| v.as_reference()) {
                Some(target) => {
                    self.release_object(host, target);
                    Ok(true)
                }
                None => {
                    warn!(%class, field, "counted static field no longer holds a reference");
                    Ok(false)
                }
            },
        }
    }

    /// Destroy a class record that has reached zero
    pub(super) fn reclaim_class(&mut self, host: &mut dyn GcHost, class: ClassIndex, unload: bool) {
        let Some(record) = self.classes.destroy(class) else {
            return;
        };
        self.release_static_fields(host, class, &record);

        if let Some(status) = host.class_status_mut(class) {
            status.remove(SlotStatus::GCREQ);
        }
        if unload {
            host.unload_class(class);
        }

        self.stats.classes_reclaimed += 1;
        debug!(%class, unload, "class reclaimed");
    }

    fn release_static_fields(&mut self, host: &mut dyn GcHost, class: ClassIndex, record: &Accounting) {
        for field in record.marked_fields() {
            if let Some(target) = host.static_field(class, field).and_then(|v| v.as_reference()) {
                self.release_object(host, target);
            }
        }
    }
}
