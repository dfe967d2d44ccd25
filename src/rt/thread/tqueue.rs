//! Thread queues for drivers
//!
//! A bare wait queue: threads park on it with a timeout and an interrupt
//! handler wakes them in arrival order with a message.

use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, Sys};
use crate::port::Port;
use crate::queue::{ThreadsQueue, WaitOn};
use crate::types::{OsMsg, OsThreadState, SysInterval, ThreadId, Wait, TIME_IMMEDIATE};

pub(crate) struct ThreadQueueState {
    pub(crate) queue: ThreadsQueue,
    pub(crate) used: bool,
}

impl ThreadQueueState {
    pub(crate) const fn new() -> Self {
        ThreadQueueState {
            queue: ThreadsQueue::new(),
            used: false,
        }
    }
}

/// Handle of a thread queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThreadQueue(u8);

impl ThreadQueue {
    #[inline]
    fn on(self) -> WaitOn {
        WaitOn::ThreadQueue(self.0)
    }

    /// Allocate a thread queue
    ///
    /// # Returns
    /// * `Err(OsError::ObjNoMore)` - Pool exhausted
    pub fn create<P: Port>(sys: &mut Sys<P>) -> OsResult<Self> {
        let slot = sys
            .tqueues
            .iter()
            .position(|q| !q.used)
            .ok_or(OsError::ObjNoMore)?;
        sys.tqueues[slot] = ThreadQueueState::new();
        sys.tqueues[slot].used = true;
        Ok(ThreadQueue(slot as u8))
    }

    /// Return the queue to the pool
    ///
    /// # Returns
    /// * `Err(OsError::ObjInUse)` - Threads are still queued
    pub fn dispose<P: Port>(self, sys: &mut Sys<P>) -> OsResult<()> {
        let q = &mut sys.tqueues[self.0 as usize];
        if !q.queue.is_empty() {
            return Err(OsError::ObjInUse);
        }
        q.used = false;
        Ok(())
    }

    pub fn is_empty_i<P: Port>(self, sys: &Sys<P>) -> bool {
        sys.tqueues[self.0 as usize].queue.is_empty()
    }

    /// Park the running thread on the queue.
    ///
    /// `TIME_IMMEDIATE` returns `OsMsg::TIMEOUT` at once.
    pub fn enqueue_timeout_s<P: Port>(self, sys: &mut Sys<P>, timeout: SysInterval) -> Wait<OsMsg> {
        if timeout == TIME_IMMEDIATE {
            return Wait::Done(OsMsg::TIMEOUT);
        }
        let cur = sys.current();
        sys.wait_enqueue(self.on(), cur);
        sys.go_sleep_timeout_s(OsThreadState::Queued, timeout);
        Wait::Blocked
    }

    /// Park the calling thread, return the wake message or `OsMsg::TIMEOUT`
    pub fn enqueue_timeout<P: Port>(self, kernel: &Kernel<P>, timeout: SysInterval) -> OsMsg {
        let w = self.enqueue_timeout_s(&mut kernel.lock(), timeout);
        kernel.resume(w, |sys| sys.wake_msg())
    }

    /// Wake the oldest queued thread with `msg`, without rescheduling
    pub fn dequeue_next_i<P: Port>(self, sys: &mut Sys<P>, msg: OsMsg) -> Option<ThreadId> {
        let id = sys.wait_dequeue_head(self.on())?;
        sys.threads[id.index()].rdymsg = msg;
        Some(sys.ready_i(id))
    }

    /// Wake every queued thread with `msg`, without rescheduling
    pub fn dequeue_all_i<P: Port>(self, sys: &mut Sys<P>, msg: OsMsg) {
        while self.dequeue_next_i(sys, msg).is_some() {}
    }
}
