//! Thread Control Block

use crate::port::Context;
use crate::queue::{ThreadsQueue, WaitOn};
use crate::types::{EventMask, OsMsg, OsPrio, OsThreadState, OsTick, ThreadId, NOPRIO};

/// Cooperative termination request
pub(crate) const FLAG_TERMINATE: u8 = 0x01;

/// Thread Control Block
///
/// Lives in the kernel thread table and is addressed by `ThreadId`.
pub struct OsThread {
    // ============ Queue links ============
    /// Next thread in the ready list or wait queue
    pub(crate) qnext: Option<ThreadId>,
    /// Previous thread in the ready list or wait queue
    pub(crate) qprev: Option<ThreadId>,

    // ============ Scheduling ============
    /// Effective priority, may be raised by priority inheritance
    pub(crate) prio: OsPrio,
    /// Base priority
    pub(crate) realprio: OsPrio,
    pub(crate) state: OsThreadState,
    pub(crate) flags: u8,
    /// Remaining round-robin quantum
    pub(crate) ticks: OsTick,

    // ============ Context ============
    pub(crate) ctx: Context,
    /// Lowest address of the working area
    pub(crate) wabase: usize,
    /// One past the highest address of the working area
    pub(crate) waend: usize,

    // ============ Wait state ============
    pub(crate) wait: WaitOn,
    /// Message delivered on wake-up
    pub(crate) rdymsg: OsMsg,
    pub(crate) exitcode: OsMsg,
    /// Bumped on every suspension through a thread reference
    pub(crate) epoch: u16,

    /// Threads waiting for this one to exit
    pub(crate) waiting: ThreadsQueue,
    /// Senders queued on this thread
    pub(crate) msgqueue: ThreadsQueue,
    /// Message carried while this thread is a sender
    pub(crate) sentmsg: OsMsg,

    /// Top of the owned mutex stack
    pub(crate) mtxlist: Option<u8>,

    pub(crate) epending: EventMask,
    pub(crate) ewmask: EventMask,

    // ============ Registry ============
    pub(crate) name: &'static str,
    pub(crate) refs: u8,
}

impl OsThread {
    pub const fn new() -> Self {
        OsThread {
            qnext: None,
            qprev: None,
            prio: NOPRIO,
            realprio: NOPRIO,
            state: OsThreadState::Free,
            flags: 0,
            ticks: 0,
            ctx: Context::new(),
            wabase: 0,
            waend: 0,
            wait: WaitOn::None,
            rdymsg: OsMsg::OK,
            exitcode: OsMsg::OK,
            epoch: 0,
            waiting: ThreadsQueue::new(),
            msgqueue: ThreadsQueue::new(),
            sentmsg: OsMsg::OK,
            mtxlist: None,
            epending: 0,
            ewmask: 0,
            name: "",
            refs: 0,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Effective priority
    #[inline]
    pub fn prio(&self) -> OsPrio {
        self.prio
    }

    /// Base priority, without inheritance boosts
    #[inline]
    pub fn real_prio(&self) -> OsPrio {
        self.realprio
    }

    #[inline]
    pub fn state(&self) -> OsThreadState {
        self.state
    }

    /// Message of the last wake-up
    #[inline]
    pub fn wake_msg(&self) -> OsMsg {
        self.rdymsg
    }

    #[inline]
    pub fn exit_code(&self) -> OsMsg {
        self.exitcode
    }

    #[inline]
    pub fn refs(&self) -> u8 {
        self.refs
    }

    #[inline]
    pub fn pending_events(&self) -> EventMask {
        self.epending
    }

    /// Working area as `(base, end)` addresses
    #[inline]
    pub fn working_area(&self) -> (usize, usize) {
        (self.wabase, self.waend)
    }

    #[inline]
    pub fn is_terminating(&self) -> bool {
        self.flags & FLAG_TERMINATE != 0
    }
}

impl Default for OsThread {
    fn default() -> Self {
        Self::new()
    }
}
