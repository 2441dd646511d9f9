//! Fixed-stride slot pools.
//!
//! A pool is one contiguous allocation holding `capacity` slots, each a
//! `(ControlBlock<T>, T)` pair. [`Shared`](crate::Shared) references built
//! from a slot destroy their object in place and hand the slot back to
//! the pool instead of freeing memory; the pool frees its single backing
//! allocation once every scope handle and every occupied slot is gone.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{size_of, MaybeUninit};
use std::ptr::{self, NonNull};

use bitvec::vec::BitVec;
use tracing::{debug, trace};

use crate::block::{ControlBlock, Placement};
use crate::count::Count;
use crate::error::PoolError;

/// Assertion for the unchecked slot paths: on in debug builds, or always
/// with the `checked-slots` feature.
macro_rules! slot_assert {
    ($($arg:tt)*) => {
        if cfg!(any(debug_assertions, feature = "checked-slots")) {
            assert!($($arg)*);
        }
    };
}

/// One pool slot: control block storage followed by object storage.
#[repr(C)]
pub(crate) struct Slot<T> {
    block: MaybeUninit<ControlBlock<T>>,
    object: MaybeUninit<T>,
}

/// Pool state shared by scope handles and slot-backed control blocks.
pub(crate) struct PoolInner<T> {
    region: NonNull<Slot<T>>,
    capacity: usize,
    /// Scope handles plus occupied slots.
    live: Count,
    occupied: RefCell<BitVec>,
    _marker: PhantomData<Slot<T>>,
}

#[cfg(test)]
thread_local! {
    /// Pool regions currently allocated on this thread.
    pub(crate) static LIVE_REGIONS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

impl<T> PoolInner<T> {
    #[inline]
    fn layout(capacity: usize) -> Result<Layout, PoolError> {
        if capacity >= u32::MAX as usize {
            return Err(PoolError::CapacityOverflow { capacity });
        }
        Layout::array::<Slot<T>>(capacity).map_err(|_| PoolError::CapacityOverflow { capacity })
    }

    fn new(capacity: usize) -> Result<Self, PoolError> {
        let layout = Self::layout(capacity)?;
        let region = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            let ptr = unsafe { alloc(layout) } as *mut Slot<T>;
            match NonNull::new(ptr) {
                Some(region) => region,
                None => handle_alloc_error(layout),
            }
        };

        #[cfg(test)]
        LIVE_REGIONS.with(|n| n.set(n.get() + 1));
        debug!(capacity, stride = size_of::<Slot<T>>(), "pool created");

        Ok(Self {
            region,
            capacity,
            live: Count::new(1),
            occupied: RefCell::new(BitVec::repeat(false, capacity)),
            _marker: PhantomData,
        })
    }

    #[inline]
    unsafe fn slot(&self, index: usize) -> *mut Slot<T> {
        self.region.as_ptr().add(index)
    }

    /// Object storage of slot `index`.
    ///
    /// # Safety
    ///
    /// `index < capacity`.
    #[inline]
    pub(crate) unsafe fn mem(&self, index: usize) -> *mut T {
        ptr::addr_of_mut!((*self.slot(index)).object).cast()
    }

    /// Control block storage of slot `index`.
    ///
    /// # Safety
    ///
    /// `index < capacity`.
    #[inline]
    pub(crate) unsafe fn meta_mem(&self, index: usize) -> *mut ControlBlock<T> {
        ptr::addr_of_mut!((*self.slot(index)).block).cast()
    }

    #[inline]
    pub(crate) fn live_count(&self) -> u32 {
        self.live.get()
    }

    #[inline]
    fn is_occupied(&self, index: usize) -> bool {
        self.occupied.borrow().get(index).is_some_and(|bit| *bit)
    }

    fn check_range(&self, index: usize) -> Result<(), PoolError> {
        if index < self.capacity {
            Ok(())
        } else {
            Err(PoolError::SlotOutOfRange {
                index,
                capacity: self.capacity,
            })
        }
    }

    fn check_vacant(&self, index: usize) -> Result<(), PoolError> {
        self.check_range(index)?;
        if self.is_occupied(index) {
            Err(PoolError::SlotOccupied { index })
        } else {
            Ok(())
        }
    }

    fn assert_vacant(&self, index: usize) {
        slot_assert!(
            index < self.capacity,
            "slot index {index} out of range for pool of {}",
            self.capacity
        );
        slot_assert!(!self.is_occupied(index), "slot {index} is already occupied");
    }

    /// Builds a control block in place at slot `index`, wrapping the
    /// object already written there.
    ///
    /// # Safety
    ///
    /// `this` must be live, `index < capacity`, the slot must be vacant
    /// and its object storage initialized.
    pub(crate) unsafe fn occupy(this: NonNull<Self>, index: usize) -> NonNull<ControlBlock<T>> {
        let pool = this.as_ref();
        let object = NonNull::new_unchecked(pool.mem(index));
        let meta = pool.meta_mem(index);
        meta.write(ControlBlock::new(
            Some(object),
            Placement::Slot { pool: this, index },
        ));
        pool.occupied.borrow_mut().set(index, true);
        pool.live.increment();
        trace!(index, "slot occupied");
        NonNull::new_unchecked(meta)
    }

    /// Returns slot `index` to the pool after its control block was
    /// destroyed.
    ///
    /// # Safety
    ///
    /// `this` must be live and slot `index` occupied by a block that has
    /// just been dropped in place.
    pub(crate) unsafe fn vacate(this: NonNull<Self>, index: usize) {
        this.as_ref().occupied.borrow_mut().set(index, false);
        trace!(index, "slot vacated");
        Self::release(this);
    }

    /// # Safety
    ///
    /// `this` must be live.
    #[inline]
    unsafe fn retain(this: NonNull<Self>) {
        this.as_ref().live.increment();
    }

    /// # Safety
    ///
    /// `this` must be live and the caller must own one live increment.
    unsafe fn release(this: NonNull<Self>) {
        if this.as_ref().live.decrement() == 0 {
            drop(Box::from_raw(this.as_ptr()));
        }
    }
}

impl<T> Drop for PoolInner<T> {
    fn drop(&mut self) {
        debug_assert!(self.occupied.get_mut().not_any());
        if let Ok(layout) = Self::layout(self.capacity) {
            if layout.size() != 0 {
                unsafe { dealloc(self.region.as_ptr().cast(), layout) };
            }
        }

        #[cfg(test)]
        LIVE_REGIONS.with(|n| n.set(n.get() - 1));
        debug!(capacity = self.capacity, "pool released");
    }
}

/// A counted handle to a slot pool.
///
/// Cloning a scope, and every `Shared` built from one of its slots, keeps
/// the pool's backing allocation alive. Slot addressing is unchecked on
/// the fast paths ([`mem`](Self::mem)); the `try_` variants check bounds.
///
/// # Example
///
/// ```
/// use nonatomic_rc::{PoolScope, Shared};
///
/// let scope: PoolScope<u64> = Shared::make_pool(4).unwrap();
/// let a = Shared::try_place(&scope, 0, 10).unwrap();
/// let b = Shared::try_allocate(&scope, 1).unwrap();
/// assert_eq!(*a + *b, 10);
///
/// drop(scope); // slots keep the pool alive
/// assert_eq!(a.pool_live_count(), Some(2));
/// ```
pub struct PoolScope<T> {
    inner: NonNull<PoolInner<T>>,
    _marker: PhantomData<PoolInner<T>>,
}

impl<T> PoolScope<T> {
    /// Allocates a pool of `capacity` slots with a live count of one.
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        let inner = PoolInner::new(capacity)?;
        Ok(Self {
            inner: NonNull::from(Box::leak(Box::new(inner))),
            _marker: PhantomData,
        })
    }

    #[inline]
    fn pool(&self) -> &PoolInner<T> {
        unsafe { self.inner.as_ref() }
    }

    #[inline]
    pub(crate) fn inner(&self) -> NonNull<PoolInner<T>> {
        self.inner
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool().capacity
    }

    /// Distance in bytes between consecutive slots.
    #[inline]
    pub fn stride(&self) -> usize {
        size_of::<Slot<T>>()
    }

    /// Scope handles plus occupied slots.
    #[inline]
    pub fn live_count(&self) -> u32 {
        self.pool().live_count()
    }

    /// Number of slots whose control block is alive.
    pub fn occupied(&self) -> usize {
        self.pool().occupied.borrow().count_ones()
    }

    /// Whether slot `index` currently hosts a control block.
    pub fn is_occupied(&self, index: usize) -> bool {
        self.pool().is_occupied(index)
    }

    /// Object storage of slot `index`.
    ///
    /// The returned pointer may be written with a `T` that is then wrapped
    /// with [`Shared::from_slot`](crate::Shared::from_slot).
    ///
    /// # Safety
    ///
    /// `index` must be less than [`capacity`](Self::capacity).
    #[inline]
    pub unsafe fn mem(&self, index: usize) -> *mut T {
        slot_assert!(
            index < self.capacity(),
            "slot index {index} out of range for pool of {}",
            self.capacity()
        );
        self.pool().mem(index)
    }

    /// Checked form of [`mem`](Self::mem).
    pub fn try_mem(&self, index: usize) -> Result<NonNull<T>, PoolError> {
        self.pool().check_range(index)?;
        Ok(unsafe { NonNull::new_unchecked(self.pool().mem(index)) })
    }

    pub(crate) fn check_vacant(&self, index: usize) -> Result<(), PoolError> {
        self.pool().check_vacant(index)
    }

    pub(crate) fn assert_vacant(&self, index: usize) {
        self.pool().assert_vacant(index)
    }
}

impl<T> Clone for PoolScope<T> {
    fn clone(&self) -> Self {
        unsafe { PoolInner::retain(self.inner) };
        Self {
            inner: self.inner,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for PoolScope<T> {
    fn drop(&mut self) {
        unsafe { PoolInner::release(self.inner) };
    }
}

impl<T> fmt::Debug for PoolScope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolScope")
            .field("capacity", &self.capacity())
            .field("live_count", &self.live_count())
            .field("occupied", &self.occupied())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shared;
    use std::cell::Cell;
    use std::rc::Rc;

    fn live_regions() -> usize {
        LIVE_REGIONS.with(|n| n.get())
    }

    struct DropTracker(Rc<Cell<u32>>);

    impl Drop for DropTracker {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_pool_new() {
        let before = live_regions();
        let scope: PoolScope<u32> = PoolScope::new(8).unwrap();
        assert_eq!(scope.capacity(), 8);
        assert_eq!(scope.live_count(), 1);
        assert_eq!(scope.occupied(), 0);
        assert_eq!(live_regions(), before + 1);
        drop(scope);
        assert_eq!(live_regions(), before);
    }

    #[test]
    fn test_scope_clone_counts() {
        let before = live_regions();
        let scope: PoolScope<u8> = PoolScope::new(2).unwrap();
        let copy = scope.clone();
        assert_eq!(scope.live_count(), 2);
        drop(scope);
        assert_eq!(copy.live_count(), 1);
        assert_eq!(live_regions(), before + 1);
        drop(copy);
        assert_eq!(live_regions(), before);
    }

    #[test]
    fn test_stride_covers_block_and_object() {
        let scope: PoolScope<u64> = PoolScope::new(3).unwrap();
        assert!(scope.stride() >= size_of::<ControlBlock<u64>>() + size_of::<u64>());
        let a = scope.try_mem(0).unwrap().as_ptr() as usize;
        let b = scope.try_mem(1).unwrap().as_ptr() as usize;
        assert_eq!(b - a, scope.stride());
    }

    #[test]
    fn test_object_follows_block_in_slot() {
        let scope: PoolScope<u32> = PoolScope::new(2).unwrap();
        unsafe {
            let meta = scope.pool().meta_mem(1) as usize;
            let object = scope.mem(1) as usize;
            assert!(object >= meta + size_of::<ControlBlock<u32>>());
            assert!(object < meta + scope.stride());
        }
    }

    #[test]
    fn test_try_mem_out_of_range() {
        let scope: PoolScope<u32> = PoolScope::new(2).unwrap();
        assert_eq!(
            scope.try_mem(2),
            Err(PoolError::SlotOutOfRange {
                index: 2,
                capacity: 2
            })
        );
    }

    #[test]
    fn test_zero_capacity_pool() {
        let before = live_regions();
        let scope: PoolScope<String> = PoolScope::new(0).unwrap();
        assert!(scope.try_mem(0).is_err());
        drop(scope);
        assert_eq!(live_regions(), before);
    }

    #[test]
    fn test_capacity_overflow() {
        let result = PoolScope::<u64>::new(usize::MAX);
        assert_eq!(
            result.unwrap_err(),
            PoolError::CapacityOverflow {
                capacity: usize::MAX
            }
        );
    }

    #[test]
    fn test_slot_occupancy_tracks_block() {
        let scope: PoolScope<u32> = PoolScope::new(4).unwrap();
        let s = Shared::try_place(&scope, 2, 5).unwrap();
        assert!(scope.is_occupied(2));
        assert_eq!(scope.occupied(), 1);
        assert_eq!(scope.live_count(), 2);

        let w = s.downgrade();
        drop(s);
        // Weak keeps the block, so the slot stays occupied.
        assert!(scope.is_occupied(2));
        drop(w);
        assert!(!scope.is_occupied(2));
        assert_eq!(scope.live_count(), 1);
    }

    #[test]
    fn test_region_freed_after_last_slot() {
        let before = live_regions();
        let drops = Rc::new(Cell::new(0));
        let scope: PoolScope<DropTracker> = PoolScope::new(5).unwrap();
        let items: Vec<_> = (0..5)
            .map(|i| Shared::try_place(&scope, i, DropTracker(drops.clone())).unwrap())
            .collect();
        drop(scope);
        assert_eq!(live_regions(), before + 1);

        let mut items = items;
        while items.len() > 1 {
            items.pop();
            assert_eq!(live_regions(), before + 1);
        }
        assert_eq!(items[0].pool_live_count(), Some(1));
        items.pop();
        assert_eq!(drops.get(), 5);
        assert_eq!(live_regions(), before);
    }

    #[test]
    fn test_weak_into_slot_keeps_region() {
        let before = live_regions();
        let scope: PoolScope<u32> = PoolScope::new(1).unwrap();
        let w = Shared::try_place(&scope, 0, 1).unwrap().downgrade();
        drop(scope);
        assert!(w.expired());
        assert_eq!(live_regions(), before + 1);
        drop(w);
        assert_eq!(live_regions(), before);
    }

    #[test]
    fn test_debug() {
        let scope: PoolScope<u32> = PoolScope::new(2).unwrap();
        let text = format!("{scope:?}");
        assert!(text.contains("capacity: 2"));
        assert!(text.contains("live_count: 1"));
    }
}
