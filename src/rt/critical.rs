//! System lock primitives
//!
//! The system lock is the only protection of kernel state. On Cortex-M it
//! raises BASEPRI to the kernel level, elsewhere it falls back to the
//! `critical-section` implementation. Owning a [`LockToken`] is the proof
//! that the lock is held.

use core::marker::PhantomData;

/// Zero-sized proof that the system lock is held.
///
/// Only the kernel creates tokens, and only while it holds the lock.
pub struct LockToken {
    _not_send: PhantomData<*mut ()>,
}

impl LockToken {
    /// # Safety
    /// The caller must hold the system lock for as long as the token lives.
    #[inline(always)]
    pub(crate) const unsafe fn new() -> Self {
        LockToken { _not_send: PhantomData }
    }
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    #[cfg(target_arch = "arm")]
    {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr != 0
    }

    #[cfg(not(target_arch = "arm"))]
    {
        false
    }
}

/// Mask priority levels using BASEPRI (Cortex-M3/M4/M7)
///
/// Only interrupts with a priority value >= the mask value are blocked.
#[inline]
pub fn set_basepri(priority: u8) {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!(
            "msr BASEPRI, {}",
            in(reg) priority as u32,
            options(nomem, nostack, preserves_flags)
        );
    }

    #[cfg(not(target_arch = "arm"))]
    {
        let _ = priority;
    }
}

/// Get current BASEPRI value
#[inline]
pub fn get_basepri() -> u8 {
    #[cfg(target_arch = "arm")]
    {
        let basepri: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, BASEPRI",
                out(reg) basepri,
                options(nomem, nostack, preserves_flags)
            );
        }
        basepri as u8
    }

    #[cfg(not(target_arch = "arm"))]
    {
        0
    }
}
