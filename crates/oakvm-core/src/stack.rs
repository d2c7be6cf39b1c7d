//! Stack and call frame management
//!
//! This module provides the per-thread operand stack and call frames.
//!
//! # Architecture
//!
//! The stack is a unified structure that holds both:
//! - Operand values (temporary computation results)
//! - Call frames (method activation records with locals)
//!
//! Every call frame owns the [`FrameAccounting`] for its local slots. Stores
//! to a local go through [`Stack::store_local`], which drops the reference
//! held by the old value before counting the new one. Popping a frame hands
//! its local slice to the collector, which releases every slot still
//! counted.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ Operand Stack (top)                 │  ← sp (stack pointer)
//! │   value₁                            │
//! │   value₀                            │
//! ├─────────────────────────────────────┤
//! │ Call Frame N (current)              │  ← fp (frame pointer)
//! │   local₂                            │
//! │   local₁                            │
//! │   local₀                            │
//! ├─────────────────────────────────────┤
//! │ Call Frame N-1                      │
//! │   ...                               │
//! └─────────────────────────────────────┘
//! ```

use tracing::trace;

use crate::gc::{FrameAccounting, GcHost, GcManager};
use crate::handle::{ClassIndex, ThreadIndex};
use crate::{value::Value, GcError, VmError, VmResult};

/// Default maximum stack size (in slots)
const DEFAULT_MAX_STACK_SIZE: usize = 1024 * 64;

/// Call frame for method invocation
#[derive(Debug)]
pub struct CallFrame {
    /// Class declaring the executing method
    pub method_class: ClassIndex,

    /// Return instruction pointer
    pub return_ip: usize,

    /// Base pointer (start of locals in stack)
    pub base_pointer: usize,

    /// Number of local variables
    pub local_count: usize,

    accounting: FrameAccounting,
}

impl CallFrame {
    /// Get the starting index of locals in the stack
    #[inline]
    pub fn locals_start(&self) -> usize {
        self.base_pointer
    }

    /// Get the number of local variables
    #[inline]
    pub fn locals_count(&self) -> usize {
        self.local_count
    }

    /// Local-slot accounting for this frame
    #[inline]
    pub fn accounting(&self) -> &FrameAccounting {
        &self.accounting
    }
}

/// Operand and call frame stack for one VM thread
pub struct Stack {
    /// Owning thread
    thread: ThreadIndex,

    /// Stack slots (operands + locals)
    slots: Vec<Value>,

    /// Call frames
    frames: Vec<CallFrame>,

    /// Stack pointer (points to next free slot)
    sp: usize,

    /// Frame pointer (points to current frame base)
    fp: usize,

    /// Maximum stack size (in slots)
    max_size: usize,
}

impl Stack {
    /// Create a new stack with default size
    pub fn new(thread: ThreadIndex) -> Self {
        Self::with_capacity(thread, DEFAULT_MAX_STACK_SIZE)
    }

    /// Create a stack with specific capacity
    pub fn with_capacity(thread: ThreadIndex, max_size: usize) -> Self {
        Self {
            thread,
            slots: Vec::with_capacity(max_size.min(1024)),
            frames: Vec::with_capacity(64),
            sp: 0,
            fp: 0,
            max_size,
        }
    }

    /// Owning thread
    #[inline]
    pub fn thread(&self) -> ThreadIndex {
        self.thread
    }

    // ========================================================================
    // Operand Stack Operations
    // ========================================================================

    /// Push a value onto the stack
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if the stack is full.
    #[inline]
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.sp >= self.max_size {
            return Err(VmError::StackOverflow);
        }

        if self.sp >= self.slots.len() {
            self.slots.push(value);
        } else {
            self.slots[self.sp] = value;
        }

        self.sp += 1;
        Ok(())
    }

    /// Pop a value from the stack
    ///
    /// Operands cannot be popped below the current frame's locals.
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackUnderflow` if no operand is available.
    #[inline]
    pub fn pop(&mut self) -> VmResult<Value> {
        if self.sp <= self.operand_base() {
            return Err(VmError::StackUnderflow);
        }

        self.sp -= 1;
        Ok(self.slots[self.sp])
    }

    /// Peek at the top value without popping
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackUnderflow` if no operand is available.
    #[inline]
    pub fn peek(&self) -> VmResult<Value> {
        if self.sp <= self.operand_base() {
            return Err(VmError::StackUnderflow);
        }

        Ok(self.slots[self.sp - 1])
    }

    /// Get current stack depth
    #[inline]
    pub fn depth(&self) -> usize {
        self.sp
    }

    /// Check if stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sp == 0
    }

    /// Get maximum stack size
    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn operand_base(&self) -> usize {
        self.frames
            .last()
            .map_or(0, |frame| frame.base_pointer + frame.local_count)
    }

    // ========================================================================
    // Call Frame Management
    // ========================================================================

    /// Push a new call frame
    ///
    /// Allocates the frame's locals (initialized to null) and its
    /// local-slot accounting.
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if not enough stack space for locals.
    pub fn push_frame(
        &mut self,
        gc: &mut GcManager,
        method_class: ClassIndex,
        return_ip: usize,
        local_count: usize,
    ) -> VmResult<()> {
        match self.sp.checked_add(local_count) {
            Some(top) if top <= self.max_size => {}
            _ => return Err(VmError::StackOverflow),
        }

        let accounting = gc.frame_push(self.thread, local_count);
        let base_pointer = self.sp;
        for _ in 0..local_count {
            self.push(Value::null())?;
        }

        self.frames.push(CallFrame {
            method_class,
            return_ip,
            base_pointer,
            local_count,
            accounting,
        });
        self.fp = base_pointer;

        trace!(thread = %self.thread, depth = self.frames.len(), local_count, "frame pushed");
        Ok(())
    }

    /// Pop the current call frame, returning its return instruction pointer
    ///
    /// Every local still counted as a reference is released. Operands left
    /// above the locals are discarded.
    ///
    /// # Errors
    ///
    /// Returns `VmError::NoActiveFrame` if no frames to pop.
    pub fn pop_frame(&mut self, gc: &mut GcManager, host: &mut dyn GcHost) -> VmResult<usize> {
        let frame = self.frames.pop().ok_or(VmError::NoActiveFrame)?;
        let CallFrame {
            return_ip,
            base_pointer,
            local_count,
            accounting,
            ..
        } = frame;

        gc.frame_pop(host, accounting, &self.slots[base_pointer..base_pointer + local_count]);

        self.sp = base_pointer;
        self.fp = self.frames.last().map_or(0, |prev| prev.base_pointer);

        trace!(thread = %self.thread, depth = self.frames.len(), "frame popped");
        Ok(return_ip)
    }

    /// Pop every frame, innermost first
    ///
    /// Used when a thread terminates abnormally.
    pub fn unwind(&mut self, gc: &mut GcManager, host: &mut dyn GcHost) -> usize {
        let mut popped = 0;
        while self.pop_frame(gc, host).is_ok() {
            popped += 1;
        }
        popped
    }

    /// Get the current call frame
    #[inline]
    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Get the number of active frames
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Iterate over all call frames, outermost first
    pub fn frames(&self) -> impl Iterator<Item = &CallFrame> + '_ {
        self.frames.iter()
    }

    // ========================================================================
    // Local Variable Access
    // ========================================================================

    /// Load a local variable by index
    ///
    /// # Errors
    ///
    /// Returns error if no active frame or index out of bounds.
    #[inline]
    pub fn load_local(&self, index: usize) -> VmResult<Value> {
        let frame = self.current_frame().ok_or(VmError::NoActiveFrame)?;
        self.locals(frame)
            .get(index)
            .copied()
            .ok_or(VmError::Gc(GcError::LocalOutOfRange {
                index,
                count: frame.local_count,
            }))
    }

    /// Store a value to a local variable, returning the previous value
    ///
    /// The reference held by the previous value (if counted) is dropped
    /// before the store and the new value's reference is counted after it.
    ///
    /// # Errors
    ///
    /// Returns error if no active frame or index out of bounds.
    pub fn store_local(
        &mut self,
        gc: &mut GcManager,
        host: &mut dyn GcHost,
        index: usize,
        value: Value,
    ) -> VmResult<Value> {
        let frame = self.frames.last_mut().ok_or(VmError::NoActiveFrame)?;
        let locals = &mut self.slots[frame.base_pointer..frame.base_pointer + frame.local_count];

        gc.frame_rmref(host, &mut frame.accounting, locals, index)?;
        let previous = std::mem::replace(&mut locals[index], value);
        gc.frame_mkref(host, &mut frame.accounting, locals, index)?;

        Ok(previous)
    }

    fn locals(&self, frame: &CallFrame) -> &[Value] {
        &self.slots[frame.base_pointer..frame.base_pointer + frame.local_count]
    }

    // ========================================================================
    // Debugging & Inspection
    // ========================================================================

    /// Get stack statistics
    pub fn stats(&self) -> StackStats {
        StackStats {
            depth: self.sp,
            capacity: self.slots.capacity(),
            max_size: self.max_size,
            frame_count: self.frames.len(),
            counted_locals: self
                .frames
                .iter()
                .map(|frame| frame.accounting.marked_count())
                .sum(),
        }
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("thread", &self.thread)
            .field("sp", &self.sp)
            .field("fp", &self.fp)
            .field("frames", &self.frames.len())
            .finish()
    }
}

/// Stack statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackStats {
    /// Current stack depth
    pub depth: usize,

    /// Allocated capacity
    pub capacity: usize,

    /// Maximum allowed size
    pub max_size: usize,

    /// Number of active call frames
    pub frame_count: usize,

    /// Local slots currently counted as object references
    pub counted_locals: usize,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::SlotStatus;
    use crate::handle::ObjectHash;
    use crate::heap::VmHeap;
    use crate::object::{Class, Object};

    const THREAD: ThreadIndex = ThreadIndex::new(1);

    fn setup() -> (GcManager, VmHeap, ClassIndex, ObjectHash) {
        let mut gc = GcManager::default();
        let mut heap = VmHeap::new(4, 8);
        let class = heap.classes.insert(Class::new("demo/Main", 0, 0)).unwrap();
        gc.class_new(&mut heap, class);
        let obj = heap.objects.insert(Object::new(class, 0)).unwrap();
        gc.object_new(&mut heap, obj);
        (gc, heap, class, obj)
    }

    #[test]
    fn test_stack_creation() {
        let stack = Stack::new(THREAD);
        assert_eq!(stack.depth(), 0);
        assert!(stack.is_empty());
        assert_eq!(stack.frame_count(), 0);
        assert_eq!(stack.thread(), THREAD);
    }

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::new(THREAD);

        stack.push(Value::int(42)).unwrap();
        stack.push(Value::int(100)).unwrap();

        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.peek().unwrap(), Value::int(100));
        assert_eq!(stack.pop().unwrap(), Value::int(100));
        assert_eq!(stack.pop().unwrap(), Value::int(42));
        assert!(stack.is_empty());
        assert!(matches!(stack.pop(), Err(VmError::StackUnderflow)));
    }

    #[test]
    fn test_stack_overflow() {
        let mut gc = GcManager::default();
        let mut stack = Stack::with_capacity(THREAD, 2);

        stack.push(Value::int(1)).unwrap();
        stack.push(Value::int(2)).unwrap();
        assert!(matches!(stack.push(Value::int(3)), Err(VmError::StackOverflow)));

        let result = stack.push_frame(&mut gc, ClassIndex::new(1), 0, 1);
        assert!(matches!(result, Err(VmError::StackOverflow)));
        assert_eq!(gc.live_frames(), 0);
    }

    #[test]
    fn test_huge_frame_is_overflow() {
        let mut gc = GcManager::default();
        let mut stack = Stack::with_capacity(THREAD, 8);
        stack.push(Value::int(1)).unwrap();

        let result = stack.push_frame(&mut gc, ClassIndex::new(1), 0, usize::MAX);
        assert!(matches!(result, Err(VmError::StackOverflow)));
        assert_eq!(gc.live_frames(), 0);
        assert_eq!(stack.frame_count(), 0);
    }

    #[test]
    fn test_operands_do_not_reach_locals() {
        let (mut gc, _heap, class, _) = setup();
        let mut stack = Stack::new(THREAD);

        stack.push_frame(&mut gc, class, 0, 2).unwrap();
        assert!(matches!(stack.pop(), Err(VmError::StackUnderflow)));

        stack.push(Value::bool(true)).unwrap();
        assert_eq!(stack.pop().unwrap(), Value::bool(true));
    }

    #[test]
    fn test_store_local_tracks_references() {
        let (mut gc, mut heap, class, obj) = setup();
        let mut stack = Stack::new(THREAD);
        stack.push_frame(&mut gc, class, 0, 2).unwrap();

        stack
            .store_local(&mut gc, &mut heap, 0, Value::reference(obj))
            .unwrap();
        assert_eq!(gc.object_refcount(obj), Some(1));
        assert_eq!(stack.load_local(0).unwrap(), Value::reference(obj));
        assert_eq!(stack.stats().counted_locals, 1);

        // Same reference again: released then re-counted
        stack
            .store_local(&mut gc, &mut heap, 0, Value::reference(obj))
            .unwrap();
        assert_eq!(gc.object_refcount(obj), Some(1));

        let previous = stack.store_local(&mut gc, &mut heap, 0, Value::int(5)).unwrap();
        assert_eq!(previous, Value::reference(obj));
        assert_eq!(gc.object_refcount(obj), Some(0));
        assert!(heap.object_status(obj).contains(SlotStatus::GCREQ));
    }

    #[test]
    fn test_local_errors() {
        let (mut gc, mut heap, class, _) = setup();
        let mut stack = Stack::new(THREAD);

        assert!(matches!(stack.load_local(0), Err(VmError::NoActiveFrame)));
        assert!(matches!(
            stack.store_local(&mut gc, &mut heap, 0, Value::null()),
            Err(VmError::NoActiveFrame)
        ));

        stack.push_frame(&mut gc, class, 0, 1).unwrap();
        assert_eq!(
            stack.store_local(&mut gc, &mut heap, 3, Value::null()),
            Err(VmError::Gc(GcError::LocalOutOfRange { index: 3, count: 1 }))
        );
        assert!(stack.load_local(1).is_err());
    }

    #[test]
    fn test_pop_frame_releases_locals() {
        let (mut gc, mut heap, class, obj) = setup();
        let mut stack = Stack::new(THREAD);

        stack.push_frame(&mut gc, class, 7, 1).unwrap();
        stack
            .store_local(&mut gc, &mut heap, 0, Value::reference(obj))
            .unwrap();
        stack.push_frame(&mut gc, class, 11, 1).unwrap();
        stack
            .store_local(&mut gc, &mut heap, 0, Value::reference(obj))
            .unwrap();
        assert_eq!(gc.object_refcount(obj), Some(2));
        assert_eq!(gc.live_frames(), 2);

        assert_eq!(stack.pop_frame(&mut gc, &mut heap).unwrap(), 11);
        assert_eq!(gc.object_refcount(obj), Some(1));
        assert_eq!(stack.depth(), 1);

        assert_eq!(stack.pop_frame(&mut gc, &mut heap).unwrap(), 7);
        assert_eq!(gc.object_refcount(obj), Some(0));
        assert!(stack.is_empty());
        assert_eq!(gc.live_frames(), 0);

        assert!(matches!(
            stack.pop_frame(&mut gc, &mut heap),
            Err(VmError::NoActiveFrame)
        ));
    }

    #[test]
    fn test_unwind() {
        let (mut gc, mut heap, class, obj) = setup();
        let mut stack = Stack::new(THREAD);

        for ip in 0..3 {
            stack.push_frame(&mut gc, class, ip, 1).unwrap();
            stack
                .store_local(&mut gc, &mut heap, 0, Value::reference(obj))
                .unwrap();
        }
        assert_eq!(gc.object_refcount(obj), Some(3));

        assert_eq!(stack.unwind(&mut gc, &mut heap), 3);
        assert_eq!(gc.object_refcount(obj), Some(0));
        assert_eq!(stack.frame_count(), 0);
        assert_eq!(gc.stats().frames_popped, 3);
    }
}
