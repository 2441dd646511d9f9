//! # nonatomic-rc
//!
//! Single-threaded shared ownership with weak observers, self-references,
//! and fixed-stride slot pools.
//!
//! ## Features
//!
//! - **`Shared<T>`**: owning reference; the object is destroyed exactly once,
//!   when the last clone is dropped or reset
//! - **`Weak<T>`**: observing reference that can be promoted back with `lock`
//! - **`SharedFromThis`**: opt-in capability for an object to mint a `Shared`
//!   to itself without owning itself
//! - **`PoolScope<T>`**: one contiguous allocation of `(control block, object)`
//!   slots, released once every scope handle and every slot is gone
//!
//! Counts are plain `Cell<u32>`s. None of the handle types are `Send` or
//! `Sync`.
//!
//! ## Quick Start
//!
//! ```rust
//! use nonatomic_rc::{Shared, Weak};
//!
//! let w1: Weak<i32>;
//! {
//!     let s1 = Shared::new(10);
//!     w1 = s1.downgrade();
//!     {
//!         let s2 = s1.clone();
//!         assert_eq!(*s2, 10);
//!     }
//!     assert_eq!(*w1.lock(), 10);
//! }
//! assert!(w1.lock().is_none());
//! ```

mod block;
mod count;
mod error;
mod pool;
mod self_ref;
mod shared;
mod weak;

pub use error::PoolError;
pub use pool::PoolScope;
pub use self_ref::{SelfRef, SharedFromThis};
pub use shared::Shared;
pub use weak::Weak;
