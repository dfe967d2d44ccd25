//! Compile-time and runtime configuration of the kernel
//!
//! The constants size the kernel tables; `KernelConfig` carries the knobs
//! that can change per instance.

use crate::types::{OsTick, SysInterval};

/// Number of priority levels
pub const CFG_PRIO_MAX: usize = 256;

/// Thread control blocks, the idle thread included
pub const CFG_THREADS_MAX: usize = 16;

/// Virtual timers available to the application
pub const CFG_VT_USER_MAX: usize = 8;

/// Total virtual timers, one timeout timer per thread plus the user pool
pub const CFG_VT_MAX: usize = CFG_THREADS_MAX + CFG_VT_USER_MAX;

/// Semaphore pool size
pub const CFG_SEM_MAX: usize = 16;

/// Mutex pool size
pub const CFG_MTX_MAX: usize = 16;

/// Condition variable pool size
pub const CFG_COND_MAX: usize = 8;

/// Event source pool size
pub const CFG_EVT_SRC_MAX: usize = 8;

/// Event listener pool size
pub const CFG_EVT_LISTENER_MAX: usize = 16;

/// Thread queue pool size
pub const CFG_TQUEUE_MAX: usize = 8;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Minimum thread working area, in stack elements
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Idle thread working area, in stack elements
pub const CFG_IDLE_STK_SIZE: usize = 128;

/// Check the saved stack pointer against the working area on every switch
pub const CFG_STACK_CHECK: bool = true;

/// BASEPRI value used by the system lock on Cortex-M
///
/// Interrupts with a numerically lower priority stay enabled while the
/// kernel is locked and must not call into the kernel.
pub const CFG_KERNEL_BASEPRI: u8 = 0x20;

/// Per-instance kernel configuration
#[derive(Clone, Copy)]
pub struct KernelConfig {
    /// Round-robin quantum in ticks, 0 disables time slicing
    pub time_quantum: OsTick,
    /// Minimum alarm distance in tickless mode, 0 selects periodic tick mode
    pub st_timedelta: SysInterval,
    /// Called with the reason before the port halts the system
    pub halt_hook: Option<fn(&'static str)>,
}

impl KernelConfig {
    pub const DEFAULT: KernelConfig = KernelConfig {
        time_quantum: 0,
        st_timedelta: 0,
        halt_hook: None,
    };

    /// Tickless mode enabled
    #[inline]
    pub const fn is_tickless(&self) -> bool {
        self.st_timedelta > 0
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
