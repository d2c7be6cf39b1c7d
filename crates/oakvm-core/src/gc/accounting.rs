//! Accounting store
//!
//! One [`Accounting`] record per live class and per live object, kept in a
//! side table indexed by the same handle the VM uses for its own tables.
//! A record holds the entity's incoming reference count and one status bit
//! per field, set while that field counts as a reference to its pointee.

use std::marker::PhantomData;

use crate::error::{fatal, FatalReason};
use crate::handle::TableHandle;

/// Result of dropping one reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    /// Count dropped and is still positive
    Live(u32),
    /// Count dropped to zero
    ReachedZero,
    /// Count was already zero; nothing changed
    Clamped,
}

/// Per-entity refcount and field status bitmap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accounting {
    refcount: u32,
    field_status: Vec<bool>,
}

impl Accounting {
    /// Create a record with no references and no marked fields
    pub fn new(field_count: usize) -> Self {
        Self {
            refcount: 0,
            field_status: zeroed_bitmap(field_count),
        }
    }

    /// Create a record carrying an existing refcount, with no marked fields
    pub(crate) fn with_refcount(refcount: u32, field_count: usize) -> Self {
        Self {
            refcount,
            field_status: zeroed_bitmap(field_count),
        }
    }

    /// Incoming reference count
    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Number of tracked fields
    #[inline]
    pub fn field_count(&self) -> usize {
        self.field_status.len()
    }

    /// Check a field's status bit; `None` if out of range
    #[inline]
    pub fn is_marked(&self, field: usize) -> Option<bool> {
        self.field_status.get(field).copied()
    }

    /// Set or clear a field's status bit; returns the previous state
    pub(crate) fn set_marked(&mut self, field: usize, marked: bool) -> Option<bool> {
        self.field_status
            .get_mut(field)
            .map(|bit| std::mem::replace(bit, marked))
    }

    /// Indices of all marked fields
    pub fn marked_fields(&self) -> impl Iterator<Item = usize> + '_ {
        self.field_status
            .iter()
            .enumerate()
            .filter_map(|(i, &marked)| marked.then_some(i))
    }

    /// Add one reference; returns the new count
    #[inline]
    pub(crate) fn retain(&mut self) -> u32 {
        self.refcount = self.refcount.saturating_add(1);
        self.refcount
    }

    /// Drop one reference, clamping at zero
    #[inline]
    pub(crate) fn release(&mut self) -> Release {
        match self.refcount {
            0 => Release::Clamped,
            1 => {
                self.refcount = 0;
                Release::ReachedZero
            }
            n => {
                self.refcount = n - 1;
                Release::Live(n - 1)
            }
        }
    }
}

/// Side table of accounting records keyed by handle
#[derive(Debug)]
pub struct AccountingStore<H> {
    records: Vec<Option<Accounting>>,
    live: usize,
    _handle: PhantomData<H>,
}

impl<H: TableHandle> AccountingStore<H> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            live: 0,
            _handle: PhantomData,
        }
    }

    /// Create an empty store with room for `capacity` handles
    pub fn with_capacity(capacity: usize) -> Self {
        let mut store = Self::new();
        store.grow_to(capacity);
        store
    }

    /// Allocate the record for `handle`
    ///
    /// # Panics
    ///
    /// Fatal if `handle` is null, already has a record, or the record
    /// cannot be allocated.
    pub fn create(&mut self, handle: H, field_count: usize) -> &mut Accounting {
        self.install(handle, Accounting::new(field_count))
    }

    /// Install an existing record under `handle` (same checks as [`create`])
    ///
    /// [`create`]: AccountingStore::create
    pub(crate) fn install(&mut self, handle: H, record: Accounting) -> &mut Accounting {
        if handle.is_null_handle() {
            fatal(H::NULL_REASON);
        }

        let slot = handle.slot();
        if slot >= self.records.len() {
            self.grow_to(slot + 1);
        }

        let entry = &mut self.records[slot];
        if entry.is_some() {
            fatal(H::DUPLICATE_REASON);
        }

        self.live += 1;
        entry.insert(record)
    }

    /// Release the record for `handle`, returning it
    pub fn destroy(&mut self, handle: H) -> Option<Accounting> {
        let record = self.records.get_mut(handle.slot())?.take();
        if record.is_some() {
            self.live -= 1;
        }
        record
    }

    /// Look up a record
    #[inline]
    pub fn get(&self, handle: H) -> Option<&Accounting> {
        self.records.get(handle.slot())?.as_ref()
    }

    /// Look up a record mutably
    #[inline]
    pub fn get_mut(&mut self, handle: H) -> Option<&mut Accounting> {
        self.records.get_mut(handle.slot())?.as_mut()
    }

    /// Look up a record that must exist
    ///
    /// # Panics
    ///
    /// Fatal if `handle` is null or has no record.
    pub fn expect_mut(&mut self, handle: H) -> &mut Accounting {
        if handle.is_null_handle() {
            fatal(H::NULL_REASON);
        }
        match self.get_mut(handle) {
            Some(record) => record,
            None => fatal(H::MISSING_REASON),
        }
    }

    /// Check whether `handle` has a record
    #[inline]
    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live records
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check if no records are live
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn grow_to(&mut self, len: usize) {
        if len <= self.records.len() {
            return;
        }
        if self.records.try_reserve(len - self.records.len()).is_err() {
            fatal(FatalReason::AllocationFailed);
        }
        self.records.resize_with(len, || None);
    }
}

impl<H: TableHandle> Default for AccountingStore<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a cleared status bitmap
pub(crate) fn zeroed_bitmap(len: usize) -> Vec<bool> {
    let mut bits = Vec::new();
    if bits.try_reserve_exact(len).is_err() {
        fatal(FatalReason::AllocationFailed);
    }
    bits.resize(len, false);
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{ClassIndex, ObjectHash};

    #[test]
    fn test_new_record_is_clear() {
        let record = Accounting::new(4);
        assert_eq!(record.refcount(), 0);
        assert_eq!(record.field_count(), 4);
        assert_eq!(record.marked_fields().count(), 0);
        assert_eq!(record.is_marked(4), None);
    }

    #[test]
    fn test_release_clamps_at_zero() {
        let mut record = Accounting::new(0);
        assert_eq!(record.release(), Release::Clamped);
        assert_eq!(record.refcount(), 0);

        record.retain();
        record.retain();
        assert_eq!(record.release(), Release::Live(1));
        assert_eq!(record.release(), Release::ReachedZero);
        assert_eq!(record.release(), Release::Clamped);
        assert_eq!(record.refcount(), 0);
    }

    #[test]
    fn test_set_marked_returns_previous() {
        let mut record = Accounting::new(3);
        assert_eq!(record.set_marked(1, true), Some(false));
        assert_eq!(record.set_marked(1, true), Some(true));
        assert_eq!(record.set_marked(3, true), None);
        assert_eq!(record.marked_fields().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_store_create_destroy() {
        let mut store: AccountingStore<ObjectHash> = AccountingStore::new();
        let hash = ObjectHash::new(12);

        store.create(hash, 2);
        assert!(store.contains(hash));
        assert_eq!(store.len(), 1);

        let record = store.destroy(hash).unwrap();
        assert_eq!(record.field_count(), 2);
        assert!(!store.contains(hash));
        assert!(store.is_empty());
        assert!(store.destroy(hash).is_none());
    }

    #[test]
    fn test_store_recreate_after_destroy() {
        let mut store: AccountingStore<ClassIndex> = AccountingStore::with_capacity(8);
        let class = ClassIndex::new(3);
        store.create(class, 1).retain();
        store.destroy(class);
        assert_eq!(store.create(class, 1).refcount(), 0);
    }

    #[test]
    #[should_panic(expected = "null class index")]
    fn test_store_rejects_null() {
        let mut store: AccountingStore<ClassIndex> = AccountingStore::new();
        store.create(ClassIndex::NULL, 0);
    }

    #[test]
    #[should_panic(expected = "object accounting record already allocated")]
    fn test_store_rejects_double_create() {
        let mut store: AccountingStore<ObjectHash> = AccountingStore::new();
        store.create(ObjectHash::new(1), 0);
        store.create(ObjectHash::new(1), 0);
    }

    #[test]
    #[should_panic(expected = "class has no accounting record")]
    fn test_expect_mut_missing() {
        let mut store: AccountingStore<ClassIndex> = AccountingStore::new();
        store.expect_mut(ClassIndex::new(5));
    }
}
