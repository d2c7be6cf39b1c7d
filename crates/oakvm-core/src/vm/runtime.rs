//! VM call sites
//!
//! [`Runtime`] owns the collector, the class and object tables and one
//! stack per VM thread. Its methods are the points where bytecode
//! execution touches reference state: class loading, `new`, `putstatic`,
//! `putfield`, local stores, method invocation and return, `System.gc()`
//! and shutdown.
//!
//! The collector counts field and local edges. The runtime additionally
//! counts two structural edges the collector cannot see: each object's link
//! to its defining class and each class's link to its superclass. When the
//! collector frees an entity those edges come back through
//! [`VmHeap::take_released_edges`] and are dropped here.

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::config::GcConfig;
use crate::gc::{GcHost, GcManager, SweepReport};
use crate::handle::{ClassIndex, ObjectHash, ThreadIndex};
use crate::heap::{Finalizer, ReleasedEdge, VmHeap};
use crate::object::{Class, Object};
use crate::stack::Stack;
use crate::value::Value;
use crate::{GcError, VmError, VmResult};

/// Single VM instance
#[derive(Debug)]
pub struct Runtime {
    gc: GcManager,
    heap: VmHeap,
    threads: FxHashMap<ThreadIndex, Stack>,
    next_thread: u32,
    max_stack: usize,
}

impl Runtime {
    /// Default per-thread stack size (in slots)
    pub const DEFAULT_STACK_SIZE: usize = 1024 * 64;

    /// Create a runtime with tables sized from `config`
    pub fn new(config: GcConfig) -> Self {
        let heap = VmHeap::new(config.max_classes, config.max_objects);
        Self {
            gc: GcManager::new(config),
            heap,
            threads: FxHashMap::default(),
            next_thread: 0,
            max_stack: Self::DEFAULT_STACK_SIZE,
        }
    }

    /// Create a runtime configured from `OAKVM_GC_*` environment variables
    pub fn from_env() -> Self {
        Self::new(GcConfig::from_env())
    }

    /// Set the stack size used for threads spawned from now on
    pub fn with_stack_size(mut self, max_stack: usize) -> Self {
        self.max_stack = max_stack;
        self
    }

    /// Get the collector
    pub fn gc(&self) -> &GcManager {
        &self.gc
    }

    /// Get the collector mutably
    pub fn gc_mut(&mut self) -> &mut GcManager {
        &mut self.gc
    }

    /// Get the class and object tables
    ///
    /// [`VmHeap::finalized`] and [`VmHeap::unloaded`] cover only the most
    /// recent collection, delete, unload or reload.
    pub fn heap(&self) -> &VmHeap {
        &self.heap
    }

    /// Install the finalizer run on objects reclaimed by [`collect`](Self::collect)
    pub fn set_finalizer(&mut self, finalizer: Finalizer) {
        self.heap.set_finalizer(finalizer);
    }

    // ========================================================================
    // Classes
    // ========================================================================

    /// Load a class and start tracking it
    ///
    /// A non-null superclass gains one reference from the new class.
    pub fn load_class(&mut self, class: Class) -> VmResult<ClassIndex> {
        let superclass = class.superclass;
        self.require_class(superclass)?;

        let name = class.name.clone();
        let index = self.heap.classes.insert(class)?;
        self.gc.class_new(&mut self.heap, index);
        if !superclass.is_null() {
            self.gc.class_mkref_from_class(&mut self.heap, index, superclass);
        }

        debug!(class = %index, %name, "class loaded");
        Ok(index)
    }

    /// Delete and unload a class nothing references
    pub fn unload_class(&mut self, class: ClassIndex) -> VmResult<()> {
        if class.is_null() || self.heap.classes.get(class).is_none() {
            return Err(VmError::NoSuchClass(class));
        }
        self.heap.clear_reclaim_log();
        self.gc.class_delete(&mut self.heap, class, true)?;
        self.release_edges();
        Ok(())
    }

    /// Replace a loaded class with a new definition
    ///
    /// Existing instances and subclasses move to the new definition, which
    /// inherits the old one's refcount. Static-field references held by the
    /// old definition are dropped.
    pub fn reload_class(&mut self, old: ClassIndex, replacement: Class) -> VmResult<ClassIndex> {
        if old.is_null() || self.heap.classes.get(old).is_none() {
            return Err(VmError::NoSuchClass(old));
        }
        let superclass = replacement.superclass;
        self.require_class(superclass)?;

        let new = self.heap.classes.insert(replacement)?;
        self.heap.clear_reclaim_log();
        self.gc.class_reload(&mut self.heap, old, new);

        let instances = self.heap.objects.retarget_class(old, new);
        let subclasses = self.heap.classes.retarget_superclass(old, new);
        if !superclass.is_null() {
            self.gc.class_mkref_from_class(&mut self.heap, new, superclass);
        }

        self.heap.unload_class(old);
        self.release_edges();

        debug!(%old, %new, instances, subclasses, "class redefined");
        Ok(new)
    }

    /// Read a static field
    pub fn get_static(&self, class: ClassIndex, field: usize) -> VmResult<Value> {
        let entry = self.heap.classes.get(class).ok_or(VmError::NoSuchClass(class))?;
        entry.get_static(field).ok_or(VmError::FieldOutOfRange {
            index: field,
            count: entry.static_field_count(),
        })
    }

    /// Store to a static field (`putstatic`), returning the previous value
    pub fn put_static(&mut self, class: ClassIndex, field: usize, value: Value) -> VmResult<Value> {
        if class.is_null() || self.heap.classes.get(class).is_none() {
            return Err(VmError::NoSuchClass(class));
        }
        self.require_referent(value)?;

        self.gc.class_field_rmref(&mut self.heap, class, field)?;
        let previous = self
            .heap
            .classes
            .get_mut(class)
            .ok_or(VmError::NoSuchClass(class))?
            .set_static(field, value)?;
        self.gc.class_field_mkref(&mut self.heap, class, field)?;
        Ok(previous)
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Allocate an instance of `class` (`new`)
    ///
    /// The object starts with no incoming references; it is not collected
    /// until a reference to it has been made and dropped again.
    pub fn new_object(&mut self, class: ClassIndex) -> VmResult<ObjectHash> {
        if class.is_null() {
            return Err(VmError::NoSuchClass(class));
        }
        let field_count = self
            .heap
            .classes
            .get(class)
            .ok_or(VmError::NoSuchClass(class))?
            .instance_field_count;

        let object = self.heap.objects.insert(Object::new(class, field_count))?;
        self.gc.object_new(&mut self.heap, object);
        self.gc.class_mkref_from_object(&mut self.heap, object, class);
        Ok(object)
    }

    /// Finalize and free an object nothing references
    pub fn delete_object(&mut self, object: ObjectHash) -> VmResult<()> {
        if object.is_null() || self.heap.objects.get(object).is_none() {
            return Err(VmError::NoSuchObject(object));
        }
        self.heap.clear_reclaim_log();
        self.gc.object_delete(&mut self.heap, object)?;
        self.release_edges();
        Ok(())
    }

    /// Read an instance field
    pub fn get_field(&self, object: ObjectHash, field: usize) -> VmResult<Value> {
        let entry = self.heap.objects.get(object).ok_or(VmError::NoSuchObject(object))?;
        entry.get_field(field).ok_or(VmError::FieldOutOfRange {
            index: field,
            count: entry.field_count(),
        })
    }

    /// Store to an instance field (`putfield`), returning the previous value
    pub fn put_field(&mut self, object: ObjectHash, field: usize, value: Value) -> VmResult<Value> {
        if object.is_null() || self.heap.objects.get(object).is_none() {
            return Err(VmError::NoSuchObject(object));
        }
        self.require_referent(value)?;

        self.gc.object_field_rmref(&mut self.heap, object, field)?;
        let previous = self
            .heap
            .objects
            .get_mut(object)
            .ok_or(VmError::NoSuchObject(object))?
            .set_field(field, value)?;
        self.gc.object_field_mkref(&mut self.heap, object, field)?;
        Ok(previous)
    }

    // ========================================================================
    // Threads and frames
    // ========================================================================

    /// Start a VM thread with an empty stack
    pub fn spawn_thread(&mut self) -> ThreadIndex {
        self.next_thread += 1;
        let thread = ThreadIndex::new(self.next_thread);
        self.threads
            .insert(thread, Stack::with_capacity(thread, self.max_stack));
        debug!(%thread, "thread started");
        thread
    }

    /// Terminate a thread, popping any frames it still has
    ///
    /// Returns the number of frames unwound.
    pub fn exit_thread(&mut self, thread: ThreadIndex) -> VmResult<usize> {
        let mut stack = self
            .threads
            .remove(&thread)
            .ok_or(VmError::NoSuchThread(thread))?;
        let unwound = stack.unwind(&mut self.gc, &mut self.heap);
        debug!(%thread, unwound, "thread exited");
        Ok(unwound)
    }

    /// Get a thread's stack
    pub fn stack(&self, thread: ThreadIndex) -> Option<&Stack> {
        self.threads.get(&thread)
    }

    /// Number of live threads
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Invoke a method on `thread`
    ///
    /// Pushes a frame of `local_count` locals and stores `args` into the
    /// leading slots, counting each reference argument.
    pub fn invoke(
        &mut self,
        thread: ThreadIndex,
        method_class: ClassIndex,
        return_ip: usize,
        local_count: usize,
        args: &[Value],
    ) -> VmResult<()> {
        if args.len() > local_count {
            return Err(GcError::LocalOutOfRange {
                index: args.len() - 1,
                count: local_count,
            }
            .into());
        }
        for &arg in args {
            self.require_referent(arg)?;
        }

        let stack = self
            .threads
            .get_mut(&thread)
            .ok_or(VmError::NoSuchThread(thread))?;
        stack.push_frame(&mut self.gc, method_class, return_ip, local_count)?;
        for (index, &arg) in args.iter().enumerate() {
            stack.store_local(&mut self.gc, &mut self.heap, index, arg)?;
        }
        Ok(())
    }

    /// Return from the current method on `thread`
    ///
    /// Releases the frame's counted locals and yields its return
    /// instruction pointer.
    pub fn return_from(&mut self, thread: ThreadIndex) -> VmResult<usize> {
        self.threads
            .get_mut(&thread)
            .ok_or(VmError::NoSuchThread(thread))?
            .pop_frame(&mut self.gc, &mut self.heap)
    }

    /// Store to a local of the current frame, returning the previous value
    pub fn store_local(&mut self, thread: ThreadIndex, index: usize, value: Value) -> VmResult<Value> {
        self.require_referent(value)?;
        self.threads
            .get_mut(&thread)
            .ok_or(VmError::NoSuchThread(thread))?
            .store_local(&mut self.gc, &mut self.heap, index, value)
    }

    /// Load a local of the current frame
    pub fn load_local(&self, thread: ThreadIndex, index: usize) -> VmResult<Value> {
        self.threads
            .get(&thread)
            .ok_or(VmError::NoSuchThread(thread))?
            .load_local(index)
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Explicit collection (`System.gc()`)
    ///
    /// Finalizes reclaimed objects unless disabled in the configuration.
    pub fn collect(&mut self) -> SweepReport {
        let finalize = self.gc.config().finalize_on_collect;
        self.sweep(finalize)
    }

    /// Tear the VM down
    ///
    /// Unwinds every thread and runs a final sweep without finalization.
    pub fn shutdown(&mut self) -> SweepReport {
        let mut threads: Vec<ThreadIndex> = self.threads.keys().copied().collect();
        threads.sort_unstable();
        for thread in threads {
            if let Some(mut stack) = self.threads.remove(&thread) {
                stack.unwind(&mut self.gc, &mut self.heap);
            }
        }

        let report = self.sweep(false);
        info!(
            classes = self.gc.live_classes(),
            objects = self.gc.live_objects(),
            "runtime shut down"
        );
        report
    }

    fn sweep(&mut self, finalize: bool) -> SweepReport {
        self.heap.clear_reclaim_log();
        let mut report = self.gc.run(&mut self.heap, finalize);
        while report.ran && self.release_edges() > 0 {
            let next = self.gc.run(&mut self.heap, finalize);
            report.absorb(&next);
        }
        report
    }

    fn release_edges(&mut self) -> usize {
        let edges = self.heap.take_released_edges();
        for &edge in &edges {
            match edge {
                ReleasedEdge::Instance(object, class) => {
                    self.gc.class_rmref_from_object(&mut self.heap, object, class)
                }
                ReleasedEdge::Superclass(class, superclass) => {
                    self.gc.class_rmref_from_class(&mut self.heap, class, superclass)
                }
            }
        }
        edges.len()
    }

    /// A stored reference must name a live, tracked object
    fn require_referent(&self, value: Value) -> VmResult<()> {
        match value.as_reference() {
            Some(object)
                if self.heap.objects.get(object).is_none()
                    || !self.gc.has_object_accounting(object) =>
            {
                Err(VmError::NoSuchObject(object))
            }
            _ => Ok(()),
        }
    }

    fn require_class(&self, class: ClassIndex) -> VmResult<()> {
        if class.is_null() || self.heap.classes.get(class).is_some() {
            Ok(())
        } else {
            Err(VmError::NoSuchClass(class))
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(GcConfig::default())
    }
}
