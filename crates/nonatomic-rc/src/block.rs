//! Control block and the strong/weak counting protocol.
//!
//! A control block is shared by every [`Shared`](crate::Shared) and
//! [`Weak`](crate::Weak) that descends from one construction. It lives
//! either in its own heap allocation or in a pool slot; the protocol is
//! identical for both and only the two destruction primitives differ.

use std::cell::Cell;
use std::fmt;
use std::ptr::{self, NonNull};

use tracing::trace;

use crate::count::Count;
use crate::pool::PoolInner;

/// Where a control block and its object were placed.
pub(crate) enum Placement<T> {
    /// Block and object are separate heap allocations.
    Heap,
    /// Block and object live in slot `index` of a pool.
    Slot {
        pool: NonNull<PoolInner<T>>,
        index: usize,
    },
}

// Manual Clone/Copy that doesn't require T: Copy
impl<T> Clone for Placement<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Placement<T> {}

impl<T> fmt::Debug for Placement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Heap => write!(f, "heap"),
            Placement::Slot { index, .. } => write!(f, "slot {index}"),
        }
    }
}

/// Shared metadata behind one object: counts, the object pointer, and
/// the placement the memory came from.
///
/// `strong == 0` implies `object == None`. The object is destroyed on the
/// strong transition 1 -> 0; the block itself once both counts are zero.
pub(crate) struct ControlBlock<T> {
    strong: Count,
    weak: Count,
    object: Cell<Option<NonNull<T>>>,
    placement: Placement<T>,
}

impl<T> fmt::Debug for ControlBlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("strong", &self.strong)
            .field("weak", &self.weak)
            .field("placement", &self.placement)
            .finish()
    }
}

impl<T> ControlBlock<T> {
    /// A block owned by exactly one strong reference.
    pub(crate) fn new(object: Option<NonNull<T>>, placement: Placement<T>) -> Self {
        Self {
            strong: Count::new(1),
            weak: Count::new(0),
            object: Cell::new(object),
            placement,
        }
    }

    /// Heap-allocates a block that takes ownership of `object`.
    pub(crate) fn boxed(object: Option<Box<T>>) -> NonNull<Self> {
        let object = object.map(|value| NonNull::from(Box::leak(value)));
        NonNull::from(Box::leak(Box::new(Self::new(object, Placement::Heap))))
    }

    #[inline]
    pub(crate) fn strong_count(&self) -> u32 {
        self.strong.get()
    }

    #[inline]
    pub(crate) fn weak_count(&self) -> u32 {
        self.weak.get()
    }

    #[inline]
    pub(crate) fn object(&self) -> Option<NonNull<T>> {
        self.object.get()
    }

    #[inline]
    pub(crate) fn placement(&self) -> Placement<T> {
        self.placement
    }

    /// Adds a strong reference to a block whose object is still alive.
    ///
    /// # Safety
    ///
    /// `this` must point to a live control block.
    #[inline]
    pub(crate) unsafe fn retain_strong(this: NonNull<Self>) {
        let block = this.as_ref();
        debug_assert!(
            block.strong.get() > 0,
            "Retaining a block whose object is already destroyed"
        );
        block.strong.increment();
    }

    /// Drops a strong reference, destroying the object on the last one and
    /// the block too when no weak references remain.
    ///
    /// # Safety
    ///
    /// `this` must point to a live control block and the caller must own
    /// one strong increment on it, which is consumed.
    pub(crate) unsafe fn release_strong(this: NonNull<Self>) {
        {
            let block = this.as_ref();
            if block.strong.decrement() > 0 {
                return;
            }
            // Weak references dropped by the object's destructor (its own
            // self reference included) must not free the block under us.
            block.weak.increment();
            if let Some(object) = block.object.take() {
                block.destroy_object(object);
            }
        }
        Self::release_weak(this);
    }

    /// # Safety
    ///
    /// `this` must point to a live control block.
    #[inline]
    pub(crate) unsafe fn retain_weak(this: NonNull<Self>) {
        this.as_ref().weak.increment();
    }

    /// Drops a weak reference, destroying the block if it was the last
    /// reference of either kind.
    ///
    /// # Safety
    ///
    /// `this` must point to a live control block and the caller must own
    /// one weak increment on it, which is consumed.
    pub(crate) unsafe fn release_weak(this: NonNull<Self>) {
        let destroy = {
            let block = this.as_ref();
            block.weak.decrement() == 0 && block.strong.get() == 0
        };
        if destroy {
            Self::destroy(this);
        }
    }

    unsafe fn destroy_object(&self, object: NonNull<T>) {
        trace!(block = ?self, "object destroyed");
        match self.placement {
            Placement::Heap => drop(Box::from_raw(object.as_ptr())),
            Placement::Slot { .. } => ptr::drop_in_place(object.as_ptr()),
        }
    }

    unsafe fn destroy(this: NonNull<Self>) {
        let placement = this.as_ref().placement;
        debug_assert!(this.as_ref().object.get().is_none());
        trace!(block = ?this.as_ref(), "control block destroyed");
        match placement {
            Placement::Heap => drop(Box::from_raw(this.as_ptr())),
            Placement::Slot { pool, index } => {
                ptr::drop_in_place(this.as_ptr());
                PoolInner::vacate(pool, index);
            }
        }
    }
}
