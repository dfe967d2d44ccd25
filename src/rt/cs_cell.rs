//! Lock protected cell
//!
//! Zero-overhead wrapper for data that must only be touched under the
//! system lock.

use core::cell::UnsafeCell;

use crate::critical::LockToken;

/// A cell that can only be accessed while holding the system lock.
pub struct CsCell<T>(UnsafeCell<T>);

// SAFETY: every access goes through a `LockToken`
unsafe impl<T: Send> Sync for CsCell<T> {}

impl<T> CsCell<T> {
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Get a mutable reference to the inner value.
    ///
    /// The caller must not keep two references from the same cell alive.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub fn get(&self, _token: &LockToken) -> &mut T {
        unsafe { &mut *self.0.get() }
    }
}
