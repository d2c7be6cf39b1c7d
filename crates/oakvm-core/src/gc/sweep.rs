//! Sweep pass
//!
//! Scans the class table and then the object table, reclaiming every
//! in-use, non-null slot flagged collect-requested. Reclaiming an entity
//! releases the references its fields held, which may flag further
//! entities; passes repeat until one reclaims nothing, so no flagged entity
//! survives a completed sweep.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::collector::{GcManager, SweepReport};
use super::host::{GcHost, SlotStatus};
use crate::handle::{ClassIndex, ObjectHash};

impl GcManager {
    /// Reclaim all collect-requested classes and objects
    ///
    /// Objects are finalized before deletion when `finalize` is set; the
    /// final sweep at VM shutdown passes `false`. Does nothing while the
    /// collector is disabled.
    pub fn run(&mut self, host: &mut dyn GcHost, finalize: bool) -> SweepReport {
        if !self.enabled {
            debug!("sweep skipped: collector disabled");
            return SweepReport::default();
        }

        let start = Instant::now();
        let mut report = SweepReport {
            ran: true,
            ..Default::default()
        };

        loop {
            report.passes += 1;
            let finalized_before = self.stats.objects_finalized;

            let classes = self.sweep_classes(host);
            let objects = self.sweep_objects(host, finalize);

            report.classes_reclaimed += classes;
            report.objects_reclaimed += objects;
            report.objects_finalized += self.stats.objects_finalized - finalized_before;

            if classes + objects == 0 {
                break;
            }
        }

        let pause = start.elapsed();
        report.pause_time = pause;
        self.stats.sweeps += 1;
        self.stats.last_pause_time = pause;
        self.stats.total_pause_time += pause;

        info!(
            passes = report.passes,
            classes = report.classes_reclaimed,
            objects = report.objects_reclaimed,
            finalized = report.objects_finalized,
            pause_us = pause.as_micros() as u64,
            "sweep complete"
        );
        report
    }

    fn sweep_classes(&mut self, host: &mut dyn GcHost) -> usize {
        let mut reclaimed = 0;
        for index in 1..host.class_capacity() {
            let class = ClassIndex::new(index as u32);
            if !host.class_status(class).is_collectible() {
                continue;
            }
            match self.class_refcount(class) {
                Some(0) => {
                    self.reclaim_class(host, class, true);
                    reclaimed += 1;
                }
                refcount => {
                    warn!(%class, ?refcount, "stale collect request cleared");
                    if let Some(status) = host.class_status_mut(class) {
                        status.remove(SlotStatus::GCREQ);
                    }
                }
            }
        }
        reclaimed
    }

    fn sweep_objects(&mut self, host: &mut dyn GcHost, finalize: bool) -> usize {
        let mut reclaimed = 0;
        for index in 1..host.object_capacity() {
            let object = ObjectHash::new(index as u32);
            if !host.object_status(object).is_collectible() {
                continue;
            }
            match self.object_refcount(object) {
                Some(0) => {
                    self.reclaim_object(host, object, finalize);
                    reclaimed += 1;
                }
                refcount => {
                    warn!(%object, ?refcount, "stale collect request cleared");
                    if let Some(status) = host.object_status_mut(object) {
                        status.remove(SlotStatus::GCREQ);
                    }
                }
            }
        }
        reclaimed
    }
}
