//! Preemptive real-time kernel in Rust
//!
//! A small RTOS kernel providing:
//! - Priority-based preemptive scheduling, optional round-robin among equals
//! - Virtual timers on a delta list, periodic or tickless
//! - Thread lifecycle with join, references and cooperative termination
//! - Semaphores, mutexes with priority inheritance, condition variables
//! - Event flags and synchronous messages
//! - Context switching for ARM Cortex-M, a simulation port elsewhere

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod port;
pub mod rt;
pub mod sync;

// ============ Re-exports ============

pub use rt::config;
pub use rt::config::*;
pub use rt::critical;
pub use rt::cs_cell;
pub use rt::error;
pub use rt::error::{OsError, OsResult};
pub use rt::kernel;
pub use rt::kernel::{Kernel, Sys, SysLock};
pub use rt::prio;
pub use rt::queue;
pub use rt::sched;
pub use rt::thread;
pub use rt::thread::{OsThread, ThreadDescriptor, ThreadQueue, ThreadRef};
pub use rt::time;
pub use rt::types;
pub use rt::types::*;

#[cfg(feature = "sem")]
pub use sync::sem;
#[cfg(feature = "sem")]
pub use sync::sem::Semaphore;
#[cfg(feature = "mutex")]
pub use sync::mutex;
#[cfg(feature = "mutex")]
pub use sync::mutex::Mutex;
#[cfg(feature = "condvar")]
pub use sync::condvar;
#[cfg(feature = "condvar")]
pub use sync::condvar::CondVar;
#[cfg(feature = "events")]
pub use sync::event;
#[cfg(feature = "events")]
pub use sync::event::{EventListener, EventSource, EventWait};
#[cfg(feature = "messages")]
pub use sync::msg;
