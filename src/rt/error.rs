//! Error types for the kernel
//!
//! Resource and argument errors are reported through `OsResult`; wake-up
//! outcomes of blocking calls travel as `OsMsg` codes instead.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum OsError {
    // ============ Event errors ============
    /// Event number outside the event mask
    EvtInvalidId = 15003,

    // ============ Object errors ============
    /// Object pool exhausted
    ObjNoMore = 24005,
    /// Object still has waiters or users
    ObjInUse = 24006,

    // ============ OS state errors ============
    /// OS is already running
    OsRunning = 24202,
    /// OS not initialized
    OsNotInit = 24203,

    // ============ Priority errors ============
    /// Invalid priority
    PrioInvalid = 25203,

    // ============ Semaphore errors ============
    /// Invalid semaphore counter
    SemInvalidCount = 28102,

    // ============ Stack errors ============
    /// Working area already used by a live thread
    StkInUse = 28209,
    /// Invalid stack size
    StkSizeInvalid = 28208,

    // ============ Thread errors ============
    /// No more thread control blocks available
    ThreadNoMoreTcb = 29008,
    /// Thread is not in the required state
    ThreadWrongState = 29013,
    /// Cannot wait on itself
    ThreadSelf = 29014,

    // ============ Timer errors ============
    /// Timer is not armed
    TmrInactive = 29501,
    /// No free virtual timer
    TmrNoMore = 29502,
    /// Invalid timer delay
    TmrInvalidDly = 29503,
}

/// Result type alias for kernel operations
pub type OsResult<T> = Result<T, OsError>;

impl OsError {
    /// Numeric error code
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}
