//! Port layer - CPU-specific implementations
//!
//! The kernel never touches the CPU directly. Everything architecture
//! dependent goes through [`Port`]: the system lock, building the initial
//! frame of a thread, the context switch and the halt path.

use crate::types::{OsMsg, OsStkElement, SysTime};

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::CortexM4;

#[cfg(not(target_arch = "arm"))]
pub mod sim;

#[cfg(not(target_arch = "arm"))]
pub use sim::SimPort;

/// Thread entry point; the returned message becomes the exit code
pub type ThreadFn = fn(arg: usize) -> OsMsg;

/// Called by the port when a thread entry function returns
pub type ExitFn = unsafe fn(kernel: usize, msg: OsMsg) -> !;

/// Saved execution context of a switched-out thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Context {
    /// Saved stack pointer
    pub sp: usize,
}

impl Context {
    pub const fn new() -> Self {
        Context { sp: 0 }
    }
}

/// Everything the initial frame of a thread needs
pub struct ThreadStart {
    pub entry: ThreadFn,
    pub arg: usize,
    pub exit: ExitFn,
    /// Address of the owning kernel, handed back to `exit`
    pub kernel: usize,
}

/// Architecture support required by the kernel
pub trait Port: Send + Sized {
    /// State saved by `lock` and restored by `unlock`
    type LockState: Copy;

    /// Enter the system lock
    fn lock() -> Self::LockState;

    /// Leave the system lock. Deferred context switches happen here.
    fn unlock(state: Self::LockState);

    /// Build the initial frame of a thread in `[wabase, waend)`.
    ///
    /// # Safety
    /// The working area must be valid, exclusively owned by the new thread
    /// and outlive it.
    unsafe fn setup_context(
        &self,
        wabase: *mut OsStkElement,
        waend: *mut OsStkElement,
        start: &ThreadStart,
    ) -> Context;

    /// Switch from the thread owning `from` to the one owning `to`.
    ///
    /// Ports may defer the switch until the lock is released; requests made
    /// before it happens coalesce into one.
    ///
    /// # Safety
    /// Both contexts must stay valid until the switch completed.
    unsafe fn switch_context(&self, from: *mut Context, to: *mut Context);

    /// Run the first thread; the calling context is never resumed.
    ///
    /// # Safety
    /// `to` must have been built by `setup_context`.
    unsafe fn start_first(&self, to: *mut Context);

    fn is_isr_context() -> bool;

    /// Stop the system for good
    fn halt(reason: &'static str) -> !;

    /// Body of the idle loop
    fn idle() {}

    // ============ Tickless timer ============

    /// Free-running system counter
    fn now(&self) -> SysTime {
        0
    }

    /// Enable the compare alarm at `at`
    fn start_alarm(&self, _at: SysTime) {}

    /// Move the compare alarm to `at`
    fn set_alarm(&self, _at: SysTime) {}

    /// Disable the compare alarm
    fn stop_alarm(&self) {}
}
