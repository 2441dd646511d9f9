//! Non-atomic reference counter.
//!
//! Every count in this crate (strong, weak, pool liveness) is a plain
//! `Cell<u32>`. Nothing here is synchronized; the handle types that own
//! these counters are `!Send + !Sync`.

use std::cell::Cell;
use std::fmt;
use std::process;

use tracing::error;

/// A single-threaded `u32` counter.
///
/// Decrementing a counter that is already zero means the counting
/// protocol itself is broken, so it trips a debug assertion. Incrementing
/// past `u32::MAX` aborts the process: a wrapped strong count would let
/// safe code free a block that is still referenced.
#[derive(Default)]
pub(crate) struct Count(Cell<u32>);

impl Count {
    #[inline]
    pub(crate) const fn new(initial: u32) -> Self {
        Self(Cell::new(initial))
    }

    #[inline]
    pub(crate) fn get(&self) -> u32 {
        self.0.get()
    }

    /// Increments and returns the new value.
    #[inline]
    pub(crate) fn increment(&self) -> u32 {
        match self.0.get().checked_add(1) {
            Some(val) => {
                self.0.set(val);
                val
            }
            None => count_overflow(),
        }
    }

    /// Decrements and returns the new value.
    #[inline]
    pub(crate) fn decrement(&self) -> u32 {
        let val = self.0.get();
        debug_assert!(val > 0, "Decrementing zero reference count");
        let val = val - 1;
        self.0.set(val);
        val
    }
}

#[cold]
#[inline(never)]
fn count_overflow() -> ! {
    error!("reference count overflow");
    process::abort()
}

impl fmt::Debug for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}
