//! Self-references: letting an object mint a `Shared` to itself.
//!
//! An object type opts in by embedding a [`SelfRef<Self>`] and
//! implementing [`SharedFromThis`]. A `SelfRef` can only be obtained
//! inside the `*_enabled` constructors on [`Shared`], which install it
//! when they first wrap the object, so every opted-in object is reachable
//! from itself.

use std::cell::Cell;
use std::fmt;
use std::ptr::NonNull;

use crate::block::ControlBlock;
use crate::error::PoolError;
use crate::pool::PoolScope;
use crate::shared::Shared;
use crate::weak::Weak;

/// A weak link from an object to its own control block.
///
/// Holding a weak (not a strong) reference keeps the object from owning
/// itself.
///
/// A `SelfRef` is only ever handed out by the `*_enabled` constructors on
/// [`Shared`], which install it as soon as the object is wrapped. There is
/// no public way to make one, so an opted-in object cannot exist outside
/// that path:
///
/// ```compile_fail
/// use nonatomic_rc::SelfRef;
///
/// let this: SelfRef<u8> = SelfRef::new();
/// ```
///
/// ```compile_fail
/// use nonatomic_rc::SelfRef;
///
/// let this: SelfRef<u8> = Default::default();
/// ```
pub struct SelfRef<T> {
    weak: Cell<Weak<T>>,
}

impl<T> SelfRef<T> {
    #[inline]
    pub(crate) const fn new() -> Self {
        Self {
            weak: Cell::new(Weak::new()),
        }
    }

    /// Points this self-reference at `block`.
    fn install(&self, block: NonNull<ControlBlock<T>>) {
        let previous = self.weak.replace(unsafe { Weak::from_block(block) });
        debug_assert!(
            previous.expired(),
            "self reference installed twice on a live object"
        );
    }

    /// Returns true once the owning construction path installed the link.
    pub fn is_installed(&self) -> bool {
        let weak = self.weak.take();
        let installed = !Weak::ptr_eq(&weak, &Weak::new());
        self.weak.set(weak);
        installed
    }

    /// A `Shared` to the enclosing object, empty while the object is being
    /// destroyed.
    pub fn shared(&self) -> Shared<T> {
        let weak = self.weak.take();
        let shared = weak.lock();
        self.weak.set(weak);
        shared
    }

    /// A `Weak` to the enclosing object.
    pub fn weak(&self) -> Weak<T> {
        let weak = self.weak.take();
        let copy = weak.clone();
        self.weak.set(weak);
        copy
    }
}

impl<T> fmt::Debug for SelfRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRef")
            .field("installed", &self.is_installed())
            .finish()
    }
}

/// Opt-in capability for objects that need a `Shared` to themselves.
///
/// The object embeds the [`SelfRef`] it receives from one of the
/// `*_enabled` constructors.
///
/// # Example
///
/// ```
/// use nonatomic_rc::{SelfRef, Shared, SharedFromThis};
///
/// struct Node {
///     this: SelfRef<Node>,
///     value: i32,
/// }
///
/// impl SharedFromThis for Node {
///     fn self_ref(&self) -> &SelfRef<Self> {
///         &self.this
///     }
/// }
///
/// let node = Shared::new_enabled(|this| Node { this, value: 7 });
/// let again = node.shared_from_this();
///
/// assert!(Shared::ptr_eq(&node, &again));
/// assert_eq!(again.value, 7);
/// ```
pub trait SharedFromThis: Sized {
    fn self_ref(&self) -> &SelfRef<Self>;

    /// A new owning reference to `self`.
    fn shared_from_this(&self) -> Shared<Self> {
        self.self_ref().shared()
    }

    /// A new weak reference to `self`.
    fn weak_from_this(&self) -> Weak<Self> {
        self.self_ref().weak()
    }
}

// Construction paths that install the self-reference. Each one builds the
// object from a fresh `SelfRef` and installs it before returning.
impl<T: SharedFromThis> Shared<T> {
    fn installed(self) -> Self {
        if let Some(object) = self.get() {
            object.self_ref().install(self.block());
        }
        self
    }

    /// Builds the object from its self-reference and wraps it in a fresh
    /// heap control block.
    pub fn new_enabled<F>(init: F) -> Self
    where
        F: FnOnce(SelfRef<T>) -> T,
    {
        Self::new(init(SelfRef::new())).installed()
    }

    /// [`Shared::reset`] to an object built by `init`. Resetting to the
    /// empty state goes through `reset(None)`.
    pub fn reset_enabled<F>(&mut self, init: F)
    where
        F: FnOnce(SelfRef<T>) -> T,
    {
        let next = Self::new_enabled(init);
        drop(std::mem::replace(self, next));
    }

    /// [`Shared::from_slot`] for an object constructed in place by `init`.
    ///
    /// `init` receives the slot's object storage and the self-reference,
    /// and must write an initialized `T` there.
    ///
    /// # Safety
    ///
    /// `index` must be in range for `scope`, the slot must be vacant, and
    /// `init` must initialize the storage it is given.
    pub unsafe fn from_slot_enabled<F>(scope: &PoolScope<T>, index: usize, init: F) -> Self
    where
        F: FnOnce(*mut T, SelfRef<T>),
    {
        scope.assert_vacant(index);
        init(scope.mem(index), SelfRef::new());
        Self::from_slot(scope, index).installed()
    }

    /// [`Shared::place`] for an object built by `init`.
    ///
    /// # Safety
    ///
    /// Same as [`Shared::place`].
    pub unsafe fn place_enabled<F>(scope: &PoolScope<T>, index: usize, init: F) -> Self
    where
        F: FnOnce(SelfRef<T>) -> T,
    {
        scope.assert_vacant(index);
        Self::place(scope, index, init(SelfRef::new())).installed()
    }

    /// Checked form of [`place_enabled`](Self::place_enabled). `init` is
    /// not called when the slot is unavailable.
    pub fn try_place_enabled<F>(
        scope: &PoolScope<T>,
        index: usize,
        init: F,
    ) -> Result<Self, PoolError>
    where
        F: FnOnce(SelfRef<T>) -> T,
    {
        scope.check_vacant(index)?;
        Ok(unsafe { Self::place(scope, index, init(SelfRef::new())) }.installed())
    }
}
