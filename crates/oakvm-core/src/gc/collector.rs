//! Reference-counting collector state
//!
//! [`GcManager`] owns the class and object accounting stores and is owned
//! by the VM instance. Every entry point borrows the VM's tables through
//! [`GcHost`] for the duration of the call.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::accounting::{AccountingStore, Release};
use super::host::{GcHost, SlotStatus};
use crate::config::GcConfig;
use crate::handle::{ClassIndex, ObjectHash};

/// Cumulative collector statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcStats {
    /// Number of sweeps run
    pub sweeps: usize,

    /// Classes reclaimed (explicit delete + sweep)
    pub classes_reclaimed: usize,

    /// Objects reclaimed (explicit delete + sweep)
    pub objects_reclaimed: usize,

    /// Finalizers invoked
    pub objects_finalized: usize,

    /// Releases ignored because the count was already zero
    pub clamped_releases: usize,

    /// Stack frames pushed
    pub frames_pushed: usize,

    /// Stack frames popped
    pub frames_popped: usize,

    /// Total pause time across all sweeps
    pub total_pause_time: Duration,

    /// Last sweep duration
    pub last_pause_time: Duration,

    /// Class accounting records currently allocated
    pub live_classes: usize,

    /// Object accounting records currently allocated
    pub live_objects: usize,
}

/// Outcome of a single [`GcManager::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Whether a sweep actually ran (false while the collector is disabled)
    pub ran: bool,

    /// Table passes performed
    pub passes: usize,

    /// Classes reclaimed
    pub classes_reclaimed: usize,

    /// Objects reclaimed
    pub objects_reclaimed: usize,

    /// Finalizers invoked
    pub objects_finalized: usize,

    /// Sweep duration
    pub pause_time: Duration,
}

impl SweepReport {
    /// Total entities reclaimed
    pub fn reclaimed(&self) -> usize {
        self.classes_reclaimed + self.objects_reclaimed
    }

    /// Fold a follow-up sweep into this report
    pub fn absorb(&mut self, other: &SweepReport) {
        self.ran |= other.ran;
        self.passes += other.passes;
        self.classes_reclaimed += other.classes_reclaimed;
        self.objects_reclaimed += other.objects_reclaimed;
        self.objects_finalized += other.objects_finalized;
        self.pause_time += other.pause_time;
    }
}

/// Reference-counting garbage collector
///
/// Tracks incoming references to classes and objects, and which static
/// fields, instance fields and local slots currently count as references.
/// Reference cycles never reach a zero count and are never reclaimed.
#[derive(Debug)]
pub struct GcManager {
    pub(super) config: GcConfig,
    pub(super) classes: AccountingStore<ClassIndex>,
    pub(super) objects: AccountingStore<ObjectHash>,
    pub(super) live_frames: usize,
    pub(super) enabled: bool,
    pub(super) stats: GcStats,
}

impl GcManager {
    /// Create a collector
    pub fn new(config: GcConfig) -> Self {
        Self {
            classes: AccountingStore::with_capacity(config.max_classes),
            objects: AccountingStore::with_capacity(config.max_objects),
            live_frames: 0,
            enabled: config.enabled,
            stats: GcStats::default(),
            config,
        }
    }

    /// Reset all accounting and statistics
    pub fn init(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// Get the configuration
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Snapshot of the statistics, including current live record counts
    pub fn stats(&self) -> GcStats {
        GcStats {
            live_classes: self.classes.len(),
            live_objects: self.objects.len(),
            ..self.stats.clone()
        }
    }

    /// Allow sweeps; returns the previous state
    pub fn enable(&mut self) -> bool {
        std::mem::replace(&mut self.enabled, true)
    }

    /// Suppress sweeps (accounting continues); returns the previous state
    pub fn disable(&mut self) -> bool {
        std::mem::replace(&mut self.enabled, false)
    }

    /// Check whether sweeps run
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Refcount of a class, if it has an accounting record
    pub fn class_refcount(&self, class: ClassIndex) -> Option<u32> {
        self.classes.get(class).map(|r| r.refcount())
    }

    /// Refcount of an object, if it has an accounting record
    pub fn object_refcount(&self, object: ObjectHash) -> Option<u32> {
        self.objects.get(object).map(|r| r.refcount())
    }

    /// Status bit of a class-static field
    pub fn class_field_marked(&self, class: ClassIndex, field: usize) -> Option<bool> {
        self.classes.get(class)?.is_marked(field)
    }

    /// Status bit of an object instance field
    pub fn object_field_marked(&self, object: ObjectHash, field: usize) -> Option<bool> {
        self.objects.get(object)?.is_marked(field)
    }

    /// Check whether a class has an accounting record
    pub fn has_class_accounting(&self, class: ClassIndex) -> bool {
        self.classes.contains(class)
    }

    /// Check whether an object has an accounting record
    pub fn has_object_accounting(&self, object: ObjectHash) -> bool {
        self.objects.contains(object)
    }

    /// Number of live class records
    pub fn live_classes(&self) -> usize {
        self.classes.len()
    }

    /// Number of live object records
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// Number of frames pushed and not yet popped
    pub fn live_frames(&self) -> usize {
        self.live_frames
    }

    // ========================================================================
    // Count transitions
    // ========================================================================

    pub(super) fn retain_class(&mut self, host: &mut dyn GcHost, class: ClassIndex) {
        let count = self.classes.expect_mut(class).retain();
        if let Some(status) = host.class_status_mut(class) {
            status.remove(SlotStatus::GCREQ);
        }
        trace!(%class, refcount = count, "class retained");
    }

    pub(super) fn release_class(&mut self, host: &mut dyn GcHost, class: ClassIndex) {
        match self.classes.expect_mut(class).release() {
            Release::Live(count) => trace!(%class, refcount = count, "class released"),
            Release::ReachedZero => {
                if let Some(status) = host.class_status_mut(class) {
                    status.insert(SlotStatus::GCREQ);
                }
                trace!(%class, "class collect requested");
            }
            Release::Clamped => {
                self.stats.clamped_releases += 1;
                warn!(%class, "release of unreferenced class ignored");
            }
        }
    }

    pub(super) fn retain_object(&mut self, host: &mut dyn GcHost, object: ObjectHash) {
        let count = self.objects.expect_mut(object).retain();
        if let Some(status) = host.object_status_mut(object) {
            status.remove(SlotStatus::GCREQ);
        }
        trace!(%object, refcount = count, "object retained");
    }

    pub(super) fn release_object(&mut self, host: &mut dyn GcHost, object: ObjectHash) {
        match self.objects.expect_mut(object).release() {
            Release::Live(count) => trace!(%object, refcount = count, "object released"),
            Release::ReachedZero => {
                if let Some(status) = host.object_status_mut(object) {
                    status.insert(SlotStatus::GCREQ);
                }
                trace!(%object, "object collect requested");
            }
            Release::Clamped => {
                self.stats.clamped_releases += 1;
                warn!(%object, "release of unreferenced object ignored");
            }
        }
    }
}

impl Default for GcManager {
    fn default() -> Self {
        Self::new(GcConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_creation() {
        let gc = GcManager::default();
        assert!(gc.is_enabled());
        assert_eq!(gc.live_classes(), 0);
        assert_eq!(gc.live_objects(), 0);
        assert_eq!(gc.live_frames(), 0);
        assert_eq!(gc.stats(), GcStats::default());
    }

    #[test]
    fn test_enable_disable() {
        let mut gc = GcManager::new(GcConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(!gc.is_enabled());
        assert!(!gc.enable());
        assert!(gc.disable());
        assert!(!gc.is_enabled());
    }

    #[test]
    fn test_queries_on_unknown_entities() {
        let gc = GcManager::default();
        assert_eq!(gc.class_refcount(ClassIndex::new(1)), None);
        assert_eq!(gc.object_refcount(ObjectHash::new(1)), None);
        assert_eq!(gc.object_field_marked(ObjectHash::new(1), 0), None);
        assert!(!gc.has_class_accounting(ClassIndex::new(1)));
    }

    #[test]
    fn test_stats_track_live_records() {
        let mut gc = GcManager::default();
        let mut heap = crate::heap::VmHeap::new(4, 4);
        let class = heap
            .classes
            .insert(crate::object::Class::new("demo/Counted", 0, 0))
            .unwrap();
        gc.class_new(&mut heap, class);
        let obj = heap
            .objects
            .insert(crate::object::Object::new(class, 0))
            .unwrap();
        gc.object_new(&mut heap, obj);

        let stats = gc.stats();
        assert_eq!(stats.live_classes, 1);
        assert_eq!(stats.live_objects, 1);

        gc.object_delete(&mut heap, obj).unwrap();
        assert_eq!(gc.stats().live_objects, 0);
        assert_eq!(gc.stats().objects_reclaimed, 1);
    }

    #[test]
    fn test_sweep_report_total() {
        let report = SweepReport {
            classes_reclaimed: 2,
            objects_reclaimed: 5,
            ..Default::default()
        };
        assert_eq!(report.reclaimed(), 7);

        let mut total = SweepReport::default();
        total.absorb(&report);
        total.absorb(&SweepReport {
            ran: true,
            passes: 1,
            ..Default::default()
        });
        assert!(total.ran);
        assert_eq!(total.passes, 1);
        assert_eq!(total.reclaimed(), 7);
    }
}
