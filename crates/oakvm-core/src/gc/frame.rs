//! Stack-frame local-variable tracking
//!
//! Each method invocation owns one [`FrameAccounting`]. The interpreter
//! marks a local slot when it stores an object reference there and unmarks
//! it before overwriting. Popping the frame releases whatever is still
//! marked, synchronously and completely; frames are never left to a sweep.

use tracing::{trace, warn};

use super::accounting::zeroed_bitmap;
use super::collector::GcManager;
use super::host::GcHost;
use crate::error::{fatal, FatalReason, GcError, GcResult};
use crate::handle::ThreadIndex;
use crate::value::Value;

/// Local-slot status for one active method invocation
#[derive(Debug, PartialEq, Eq)]
pub struct FrameAccounting {
    thread: ThreadIndex,
    slot_status: Vec<bool>,
}

impl FrameAccounting {
    /// Thread that pushed this frame
    pub fn thread(&self) -> ThreadIndex {
        self.thread
    }

    /// Number of local-variable slots
    pub fn num_locals(&self) -> usize {
        self.slot_status.len()
    }

    /// Check a slot's status bit; `None` if out of range
    pub fn is_marked(&self, local: usize) -> Option<bool> {
        self.slot_status.get(local).copied()
    }

    /// Number of slots currently counted as references
    pub fn marked_count(&self) -> usize {
        self.slot_status.iter().filter(|&&marked| marked).count()
    }

    fn check(&self, local: usize) -> GcResult<()> {
        if local < self.slot_status.len() {
            Ok(())
        } else {
            Err(GcError::LocalOutOfRange {
                index: local,
                count: self.slot_status.len(),
            })
        }
    }
}

impl GcManager {
    /// Allocate local-slot accounting for a new call frame
    ///
    /// # Panics
    ///
    /// Fatal if `thread` is null.
    pub fn frame_push(&mut self, thread: ThreadIndex, num_locals: usize) -> FrameAccounting {
        if thread.is_null() {
            fatal(FatalReason::NullThread);
        }
        self.live_frames += 1;
        self.stats.frames_pushed += 1;
        trace!(%thread, num_locals, "frame accounting pushed");

        FrameAccounting {
            thread,
            slot_status: zeroed_bitmap(num_locals),
        }
    }

    /// Count the object referenced by a local slot
    ///
    /// `locals` is the frame's local-variable vector. Returns `Ok(true)` if
    /// a reference was established, `Ok(false)` if the slot holds no
    /// reference or is already counted.
    ///
    /// # Errors
    ///
    /// `LocalOutOfRange` if `local` is not a slot of this frame.
    pub fn frame_mkref(
        &mut self,
        host: &mut dyn GcHost,
        frame: &mut FrameAccounting,
        locals: &[Value],
        local: usize,
    ) -> GcResult<bool> {
        frame.check(local)?;
        if frame.slot_status[local] {
            return Ok(false);
        }
        let Some(target) = locals.get(local).and_then(|v| v.as_reference()) else {
            return Ok(false);
        };

        frame.slot_status[local] = true;
        self.retain_object(host, target);
        Ok(true)
    }

    /// Drop the reference counted for a local slot
    ///
    /// Honored only if the slot's status bit is set. Call before the slot
    /// is overwritten.
    ///
    /// # Errors
    ///
    /// `LocalOutOfRange` if `local` is not a slot of this frame.
    pub fn frame_rmref(
        &mut self,
        host: &mut dyn GcHost,
        frame: &mut FrameAccounting,
        locals: &[Value],
        local: usize,
    ) -> GcResult<bool> {
        frame.check(local)?;
        if !std::mem::replace(&mut frame.slot_status[local], false) {
            return Ok(false);
        }

        match locals.get(local).and_then(|v| v.as_reference()) {
            Some(target) => {
                self.release_object(host, target);
                Ok(true)
            }
            None => {
                warn!(thread = %frame.thread, local, "counted local no longer holds a reference");
                Ok(false)
            }
        }
    }

    /// Tear down a frame's accounting
    ///
    /// Every slot still marked releases the object held in the matching
    /// entry of `locals`, which must be the frame's local-variable vector as
    /// it stood at return.
    pub fn frame_pop(&mut self, host: &mut dyn GcHost, frame: FrameAccounting, locals: &[Value]) {
        let mut released = 0usize;
        let marked = frame
            .slot_status
            .iter()
            .enumerate()
            .filter_map(|(local, &marked)| marked.then_some(local));
        for local in marked {
            match locals.get(local).and_then(|v| v.as_reference()) {
                Some(target) => {
                    self.release_object(host, target);
                    released += 1;
                }
                None => warn!(thread = %frame.thread, local, "counted local lost at frame pop"),
            }
        }

        self.live_frames = self.live_frames.saturating_sub(1);
        self.stats.frames_popped += 1;
        trace!(thread = %frame.thread, released, "frame accounting popped");
    }
}
