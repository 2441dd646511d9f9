//! Owning reference.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::block::{ControlBlock, Placement};
use crate::error::PoolError;
use crate::pool::{PoolInner, PoolScope};
use crate::weak::Weak;

/// A non-atomic, reference-counted owning pointer.
///
/// Every clone shares one control block. The object is destroyed when the
/// last `Shared` is dropped or reset; the control block survives until the
/// last [`Weak`] is gone as well.
///
/// A `Shared` may be empty (see [`Shared::empty`]). Dereferencing an empty
/// reference panics, so check [`is_some`](Self::is_some) or use
/// [`get`](Self::get) first.
///
/// # Example
///
/// ```
/// use nonatomic_rc::Shared;
///
/// let data = Shared::new(vec![1, 2, 3]);
/// let shared = data.clone();
///
/// assert_eq!(*shared, vec![1, 2, 3]);
/// assert_eq!(data.use_count(), 2);
/// ```
pub struct Shared<T> {
    block: NonNull<ControlBlock<T>>,
    _marker: PhantomData<T>,
}

impl<T> Shared<T> {
    /// Wraps `value` in a fresh heap control block.
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// Wraps an already boxed value.
    pub fn from_box(value: Box<T>) -> Self {
        Self::from_owned_block(ControlBlock::boxed(Some(value)))
    }

    /// A reference with a live control block but no object.
    pub fn empty() -> Self {
        Self::from_owned_block(ControlBlock::boxed(None))
    }

    #[inline]
    fn from_owned_block(block: NonNull<ControlBlock<T>>) -> Self {
        Self {
            block,
            _marker: PhantomData,
        }
    }

    /// Adds a strong reference to `block`.
    ///
    /// # Safety
    ///
    /// `block` must be live and its object not yet destroyed.
    #[inline]
    pub(crate) unsafe fn from_block(block: NonNull<ControlBlock<T>>) -> Self {
        ControlBlock::retain_strong(block);
        Self::from_owned_block(block)
    }

    #[inline]
    pub(crate) fn block(&self) -> NonNull<ControlBlock<T>> {
        self.block
    }

    #[inline]
    fn control(&self) -> &ControlBlock<T> {
        unsafe { self.block.as_ref() }
    }

    /// The object, or `None` for an empty reference.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.control()
            .object()
            .map(|object| unsafe { &*object.as_ptr() })
    }

    /// Mutable access when this is the only reference of either kind.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.is_unique() {
            self.control()
                .object()
                .map(|object| unsafe { &mut *object.as_ptr() })
        } else {
            None
        }
    }

    /// Returns true if this reference holds an object.
    #[inline]
    pub fn is_some(&self) -> bool {
        self.control().object().is_some()
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        !self.is_some()
    }

    /// Returns true if no other `Shared` or `Weak` shares the block.
    #[inline]
    pub fn is_unique(&self) -> bool {
        self.control().strong_count() == 1 && self.control().weak_count() == 0
    }

    /// Number of `Shared` references to the block.
    #[inline]
    pub fn use_count(&self) -> u32 {
        self.control().strong_count()
    }

    /// Number of `Weak` references to the block.
    #[inline]
    pub fn weak_count(&self) -> u32 {
        self.control().weak_count()
    }

    /// Pointer to the object, null when empty.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.control()
            .object()
            .map_or(ptr::null(), |object| object.as_ptr().cast_const())
    }

    /// Returns true if both references share one control block.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }

    /// Creates a [`Weak`] observing this reference's block.
    #[inline]
    pub fn downgrade(&self) -> Weak<T> {
        Weak::from(self)
    }

    /// Replaces the held object with `value` in a fresh heap block, or with
    /// the empty state. The previous object is released afterwards and
    /// destroyed if this was its last owner.
    pub fn reset(&mut self, value: Option<T>) {
        let next = match value {
            Some(value) => Self::new(value),
            None => Self::empty(),
        };
        drop(mem::replace(self, next));
    }

    /// Live count of the pool this reference was carved from.
    pub fn pool_live_count(&self) -> Option<u32> {
        match self.control().placement() {
            Placement::Heap => None,
            Placement::Slot { pool, .. } => Some(unsafe { pool.as_ref() }.live_count()),
        }
    }

    /// Slot index this reference was carved from.
    pub fn slot_index(&self) -> Option<usize> {
        match self.control().placement() {
            Placement::Heap => None,
            Placement::Slot { index, .. } => Some(index),
        }
    }
}

// Pool construction paths.
impl<T> Shared<T> {
    /// Allocates a pool of `capacity` slots for `T`.
    pub fn make_pool(capacity: usize) -> Result<PoolScope<T>, PoolError> {
        PoolScope::new(capacity)
    }

    /// Wraps the object already written at slot `index`.
    ///
    /// # Safety
    ///
    /// `index` must be in range for `scope`, the slot must be vacant, and
    /// its object storage ([`PoolScope::mem`]) must hold an initialized `T`
    /// that nothing else owns.
    pub unsafe fn from_slot(scope: &PoolScope<T>, index: usize) -> Self {
        scope.assert_vacant(index);
        Self::from_owned_block(PoolInner::occupy(scope.inner(), index))
    }

    /// Moves `value` into slot `index` and wraps it.
    ///
    /// # Safety
    ///
    /// `index` must be in range for `scope` and the slot must be vacant.
    pub unsafe fn place(scope: &PoolScope<T>, index: usize, value: T) -> Self {
        scope.assert_vacant(index);
        scope.mem(index).write(value);
        Self::from_owned_block(PoolInner::occupy(scope.inner(), index))
    }

    /// Checked form of [`place`](Self::place).
    pub fn try_place(scope: &PoolScope<T>, index: usize, value: T) -> Result<Self, PoolError> {
        scope.check_vacant(index)?;
        Ok(unsafe { Self::place(scope, index, value) })
    }
}

impl<T: Default> Shared<T> {
    /// Builds `T::default()` in slot `index` and wraps it.
    ///
    /// # Safety
    ///
    /// Same as [`place`](Self::place).
    pub unsafe fn allocate(scope: &PoolScope<T>, index: usize) -> Self {
        Self::place(scope, index, T::default())
    }

    /// Checked form of [`allocate`](Self::allocate).
    pub fn try_allocate(scope: &PoolScope<T>, index: usize) -> Result<Self, PoolError> {
        Self::try_place(scope, index, T::default())
    }
}

impl<T> Clone for Shared<T> {
    #[inline]
    fn clone(&self) -> Self {
        unsafe { Self::from_block(self.block) }
    }

    fn clone_from(&mut self, source: &Self) {
        if self.block == source.block {
            return;
        }
        unsafe { ControlBlock::retain_strong(source.block) };
        let previous = mem::replace(&mut self.block, source.block);
        unsafe { ControlBlock::release_strong(previous) };
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        unsafe { ControlBlock::release_strong(self.block) };
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(value) => value,
            None => empty_deref(),
        }
    }
}

#[cold]
#[track_caller]
#[allow(clippy::panic)]
fn empty_deref() -> ! {
    panic!("dereferenced an empty Shared")
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T> From<Box<T>> for Shared<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("value", &self.get())
            .field("use_count", &self.use_count())
            .finish()
    }
}

impl<T: PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl<T: Eq> Eq for Shared<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct DropTracker(Rc<Cell<u32>>);

    impl Drop for DropTracker {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_shared_new() {
        let s = Shared::new(42);
        assert_eq!(*s, 42);
        assert_eq!(s.use_count(), 1);
        assert!(s.is_some());
    }

    #[test]
    fn test_shared_clone() {
        let s1 = Shared::new(42);
        let s2 = s1.clone();

        assert_eq!(s1.use_count(), 2);
        assert!(Shared::ptr_eq(&s1, &s2));
        assert_eq!(s1.as_ptr(), s2.as_ptr());
    }

    #[test]
    fn test_empty() {
        let s: Shared<String> = Shared::default();
        assert!(s.is_none());
        assert_eq!(s.get(), None);
        assert_eq!(s.use_count(), 1);
        assert!(s.as_ptr().is_null());
    }

    #[test]
    #[should_panic(expected = "dereferenced an empty Shared")]
    fn test_empty_deref_panics() {
        let s: Shared<i32> = Shared::empty();
        let _value: i32 = *s;
    }

    #[test]
    fn test_drop_on_last_clone() {
        let drops = Rc::new(Cell::new(0));
        let s1 = Shared::new(DropTracker(drops.clone()));
        let s2 = s1.clone();
        let s3 = s2.clone();

        drop(s1);
        drop(s3);
        assert_eq!(drops.get(), 0);
        drop(s2);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_reset() {
        let drops = Rc::new(Cell::new(0));
        let mut s = Shared::new(DropTracker(drops.clone()));
        let keep = s.clone();

        s.reset(Some(DropTracker(drops.clone())));
        assert_eq!(drops.get(), 0);
        assert!(!Shared::ptr_eq(&s, &keep));
        assert_eq!(keep.use_count(), 1);

        s.reset(None);
        assert_eq!(drops.get(), 1);
        assert!(s.is_none());

        drop(keep);
        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn test_clone_from() {
        let drops = Rc::new(Cell::new(0));
        let mut a = Shared::new(DropTracker(drops.clone()));
        let b = Shared::new(DropTracker(drops.clone()));

        a.clone_from(&b);
        assert_eq!(drops.get(), 1);
        assert!(Shared::ptr_eq(&a, &b));
        assert_eq!(b.use_count(), 2);
    }

    #[test]
    fn test_clone_from_self_is_noop() {
        let mut a = Shared::new(1);
        let same = a.clone();
        a.clone_from(&same);
        assert_eq!(a.use_count(), 2);
        assert_eq!(*a, 1);
    }

    #[test]
    fn test_get_mut_unique() {
        let mut s = Shared::new(vec![1, 2, 3]);
        s.get_mut().unwrap().push(4);
        assert_eq!(*s, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_get_mut_shared_or_observed() {
        let mut s = Shared::new(1);
        let other = s.clone();
        assert!(s.get_mut().is_none());
        drop(other);

        let w = s.downgrade();
        assert!(s.get_mut().is_none());
        drop(w);
        assert!(s.get_mut().is_some());
    }

    #[test]
    fn test_heap_has_no_pool() {
        let s = Shared::new(1);
        assert_eq!(s.pool_live_count(), None);
        assert_eq!(s.slot_index(), None);
    }

    #[test]
    fn test_debug_and_eq() {
        let a = Shared::new(3);
        let b = Shared::new(3);
        assert_eq!(a, b);
        assert_eq!(format!("{a:?}"), "Shared { value: Some(3), use_count: 1 }");
    }

    #[test]
    fn test_place_into_occupied_slot_is_refused() {
        let scope: PoolScope<u8> = Shared::make_pool(2).unwrap();
        let _first = Shared::try_place(&scope, 0, 1).unwrap();
        assert_eq!(
            Shared::try_place(&scope, 0, 2).unwrap_err(),
            PoolError::SlotOccupied { index: 0 }
        );
    }

    #[test]
    fn test_from_slot_after_mem_write() {
        let scope: PoolScope<String> = Shared::make_pool(3).unwrap();
        let s = unsafe {
            scope.mem(1).write("in place".to_string());
            Shared::from_slot(&scope, 1)
        };
        assert_eq!(*s, "in place");
        assert_eq!(s.slot_index(), Some(1));
        assert_eq!(s.as_ptr(), scope.try_mem(1).unwrap().as_ptr().cast_const());
    }

    #[test]
    fn test_slot_reissued_after_vacate() {
        let scope: PoolScope<u32> = Shared::make_pool(1).unwrap();
        let first = Shared::try_place(&scope, 0, 1).unwrap();
        drop(first);
        let second = Shared::try_place(&scope, 0, 2).unwrap();
        assert_eq!(*second, 2);
    }
}
