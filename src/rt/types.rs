//! Core type definitions for the kernel
//!
//! These types provide strong typing for kernel primitives.

/// Thread priority (higher value = more urgent)
pub type OsPrio = u8;

/// Reserved, never assigned to a thread
pub const NOPRIO: OsPrio = 0;
/// Priority of the idle thread
pub const IDLEPRIO: OsPrio = 1;
/// Lowest priority usable by application threads
pub const LOWPRIO: OsPrio = 2;
/// Default priority for application threads
pub const NORMALPRIO: OsPrio = 128;
/// Highest priority
pub const HIGHPRIO: OsPrio = 255;

/// Tick counter type
pub type OsTick = u32;

/// System time, in ticks
pub type SysTime = OsTick;

/// Relative interval, in ticks
pub type SysInterval = OsTick;

/// Do not wait at all, fail immediately if the resource is not available
pub const TIME_IMMEDIATE: SysInterval = 0;
/// Wait forever
pub const TIME_INFINITE: SysInterval = SysInterval::MAX;

/// Stack element type
pub type OsStkElement = usize;

/// Event mask, one bit per event
pub type EventMask = u32;

/// Every event bit
pub const ALL_EVENTS: EventMask = EventMask::MAX;

/// Event source flags
pub type EventFlags = u32;

/// Nesting counter
pub type OsNestingCtr = u8;

/// Wake-up message delivered to a resumed thread.
///
/// Negative values are reserved for kernel codes, user payloads of
/// synchronous messages may use the whole range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OsMsg(pub i32);

impl OsMsg {
    /// Normal wake-up, the awaited condition happened
    pub const OK: OsMsg = OsMsg(0);
    /// Wake-up caused by a timeout
    pub const TIMEOUT: OsMsg = OsMsg(-1);
    /// Wake-up caused by an object reset
    pub const RESET: OsMsg = OsMsg(-2);

    #[inline]
    pub fn is_ok(self) -> bool {
        self == OsMsg::OK
    }

    #[inline]
    pub fn is_timeout(self) -> bool {
        self == OsMsg::TIMEOUT
    }
}

impl From<i32> for OsMsg {
    fn from(v: i32) -> Self {
        OsMsg(v)
    }
}

impl From<OsMsg> for i32 {
    fn from(m: OsMsg) -> Self {
        m.0
    }
}

/// Thread identifier, an index into the kernel thread table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThreadId(pub(crate) u8);

impl ThreadId {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Virtual timer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VtId(pub(crate) u8);

impl VtId {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OsThreadState {
    /// Control block not in use
    Free = 0,
    /// Created but not started
    WtStart,
    /// In the ready queue
    Ready,
    /// Running
    Running,
    /// Suspended on a thread reference
    Suspended,
    /// Enqueued on a thread queue
    Queued,
    /// Waiting on a semaphore
    WtSem,
    /// Waiting on a mutex
    WtMtx,
    /// Waiting on a condition variable
    WtCond,
    /// Sleeping
    Sleeping,
    /// Waiting for another thread to exit
    WtExit,
    /// Waiting for any of a set of events
    WtOrEvt,
    /// Waiting for all of a set of events
    WtAndEvt,
    /// Message queued on the receiver
    SndMsgQ,
    /// Message taken by the receiver, waiting for the reply
    SndMsg,
    /// Waiting for a message
    WtMsg,
    /// Terminated
    Final,
}

impl OsThreadState {
    /// Blocked on something, neither runnable nor terminated
    #[inline]
    pub fn is_waiting(self) -> bool {
        !matches!(
            self,
            OsThreadState::Free
                | OsThreadState::WtStart
                | OsThreadState::Ready
                | OsThreadState::Running
                | OsThreadState::Final
        )
    }
}

/// Outcome of an `_s` call that may put the caller to sleep.
///
/// `Blocked` means the caller has been switched out; the result is collected
/// by the resumed thread through the matching continuation call.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait<T> {
    /// Completed without suspending
    Done(T),
    /// The calling thread was put to sleep
    Blocked,
}

impl<T> Wait<T> {
    #[inline]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Wait::Blocked)
    }

    #[inline]
    pub fn done(self) -> Option<T> {
        match self {
            Wait::Done(v) => Some(v),
            Wait::Blocked => None,
        }
    }
}
