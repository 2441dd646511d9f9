//! Weak references for observing without ownership.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

use crate::block::ControlBlock;
use crate::shared::Shared;

/// A weak (non-owning) reference to a [`Shared`] object.
///
/// A `Weak` keeps the control block alive but not the object. It can be
/// promoted back to a `Shared` with [`lock`](Self::lock) or
/// [`upgrade`](Self::upgrade) while the object is still alive, and stays
/// safe to query after the object is gone.
///
/// # Example
///
/// ```
/// use nonatomic_rc::{Shared, Weak};
///
/// let shared = Shared::new(42);
/// let weak = Weak::from(&shared);
///
/// assert!(!weak.expired());
/// assert_eq!(*weak.lock(), 42);
///
/// drop(shared);
///
/// assert!(weak.expired());
/// assert!(weak.lock().is_none());
/// ```
pub struct Weak<T> {
    block: Option<NonNull<ControlBlock<T>>>,
    _marker: PhantomData<T>,
}

impl<T> Weak<T> {
    /// A weak reference that observes nothing.
    #[inline]
    pub const fn new() -> Self {
        Self {
            block: None,
            _marker: PhantomData,
        }
    }

    /// Adds a weak reference to `block`.
    ///
    /// # Safety
    ///
    /// `block` must be live.
    #[inline]
    pub(crate) unsafe fn from_block(block: NonNull<ControlBlock<T>>) -> Self {
        ControlBlock::retain_weak(block);
        Self {
            block: Some(block),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn control(&self) -> Option<&ControlBlock<T>> {
        self.block.map(|block| unsafe { &*block.as_ptr() })
    }

    /// Returns true if there is no block or its object was destroyed.
    #[inline]
    pub fn expired(&self) -> bool {
        self.control().map_or(true, |block| block.object().is_none())
    }

    /// Promotes to a `Shared`, or returns an empty one if expired.
    pub fn lock(&self) -> Shared<T> {
        self.upgrade().unwrap_or_default()
    }

    /// Promotes to a `Shared` if the object is still alive.
    pub fn upgrade(&self) -> Option<Shared<T>> {
        match self.block {
            Some(block) if !self.expired() => Some(unsafe { Shared::from_block(block) }),
            _ => None,
        }
    }

    /// Observes `shared`'s block instead of the current one.
    pub fn assign(&mut self, shared: &Shared<T>) {
        let next = unsafe { Self::from_block(shared.block()) };
        drop(mem::replace(self, next));
    }

    /// Number of `Shared` references to the block, zero once expired.
    #[inline]
    pub fn use_count(&self) -> u32 {
        self.control().map_or(0, ControlBlock::strong_count)
    }

    /// Number of `Weak` references to the block, this one included.
    #[inline]
    pub fn weak_count(&self) -> u32 {
        self.control().map_or(0, ControlBlock::weak_count)
    }

    /// Returns true if both observe the same block, or both observe none.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        match self.block {
            Some(block) => unsafe { Self::from_block(block) },
            None => Self::new(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if self.block != source.block {
            *self = source.clone();
        }
    }
}

impl<T> Drop for Weak<T> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe { ControlBlock::release_weak(block) };
        }
    }
}

impl<T> Default for Weak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<&Shared<T>> for Weak<T> {
    fn from(shared: &Shared<T>) -> Self {
        unsafe { Self::from_block(shared.block()) }
    }
}

impl<T> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Weak")
            .field("expired", &self.expired())
            .field("use_count", &self.use_count())
            .finish()
    }
}
