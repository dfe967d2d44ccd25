//! Condition variables
//!
//! Used together with the mutex most recently locked by the waiting
//! thread: waiting releases it atomically, waking up acquires it again.

use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, Sys};
use crate::port::Port;
use crate::queue::{ThreadsQueue, WaitOn};
use crate::types::{OsMsg, OsThreadState, SysInterval, Wait, TIME_IMMEDIATE, TIME_INFINITE};

pub(crate) struct CondState {
    pub(crate) queue: ThreadsQueue,
    used: bool,
}

impl CondState {
    pub(crate) const fn new() -> Self {
        CondState {
            queue: ThreadsQueue::new(),
            used: false,
        }
    }
}

/// Condition variable handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CondVar(u8);

impl CondVar {
    #[inline]
    fn on(self) -> WaitOn {
        WaitOn::Cond(self.0)
    }

    /// Create a condition variable
    ///
    /// # Returns
    /// * `Err(OsError::ObjNoMore)` - Pool exhausted
    pub fn create<P: Port>(sys: &mut Sys<P>) -> OsResult<Self> {
        let slot = sys
            .conds
            .iter()
            .position(|c| !c.used)
            .ok_or(OsError::ObjNoMore)?;
        sys.conds[slot] = CondState::new();
        sys.conds[slot].used = true;
        Ok(CondVar(slot as u8))
    }

    /// Return the condition variable to the pool
    ///
    /// # Returns
    /// * `Err(OsError::ObjInUse)` - Threads are waiting on it
    pub fn dispose<P: Port>(self, sys: &mut Sys<P>) -> OsResult<()> {
        let c = &mut sys.conds[self.0 as usize];
        if !c.queue.is_empty() {
            return Err(OsError::ObjInUse);
        }
        c.used = false;
        Ok(())
    }

    /// Wake the highest priority waiter, switching to it if it outranks the
    /// caller
    pub fn signal_s<P: Port>(self, sys: &mut Sys<P>) {
        if let Some(t) = sys.wait_dequeue_head(self.on()) {
            sys.wakeup_s(t, OsMsg::OK);
        }
    }

    /// Wake the highest priority waiter, without rescheduling
    pub fn signal_i<P: Port>(self, sys: &mut Sys<P>) {
        if let Some(t) = sys.wait_dequeue_head(self.on()) {
            sys.threads[t.index()].rdymsg = OsMsg::OK;
            sys.ready_i(t);
        }
    }

    /// Wake every waiter with `OsMsg::RESET`, without rescheduling
    pub fn broadcast_i<P: Port>(self, sys: &mut Sys<P>) {
        while let Some(t) = sys.wait_dequeue_head(self.on()) {
            sys.threads[t.index()].rdymsg = OsMsg::RESET;
            sys.ready_i(t);
        }
    }

    pub fn broadcast_s<P: Port>(self, sys: &mut Sys<P>) {
        self.broadcast_i(sys);
        sys.reschedule_s();
    }

    /// Wait without timeout
    pub fn wait_s<P: Port>(self, sys: &mut Sys<P>) -> Wait<OsMsg> {
        self.wait_timeout_s(sys, TIME_INFINITE)
    }

    /// Release the caller's most recently locked mutex and wait.
    ///
    /// `TIME_IMMEDIATE` returns `OsMsg::TIMEOUT` keeping the mutex. After
    /// `Blocked` the resumed thread reads the wake message and, unless it
    /// is `OsMsg::TIMEOUT`, locks the mutex again.
    pub fn wait_timeout_s<P: Port>(self, sys: &mut Sys<P>, timeout: SysInterval) -> Wait<OsMsg> {
        let Some(mtx) = sys.mtx_next() else {
            sys.halt("condition wait without owned mutex");
        };
        if timeout == TIME_IMMEDIATE {
            return Wait::Done(OsMsg::TIMEOUT);
        }

        mtx.unlock_s(sys);
        let cur = sys.current();
        sys.wait_enqueue(self.on(), cur);
        sys.go_sleep_timeout_s(OsThreadState::WtCond, timeout);
        Wait::Blocked
    }

    // ============ Thread level ============

    pub fn wait<P: Port>(self, kernel: &Kernel<P>) -> OsMsg {
        self.wait_timeout(kernel, TIME_INFINITE)
    }

    /// Wait with timeout, the mutex is owned again on return unless the
    /// result is `OsMsg::TIMEOUT`
    ///
    /// # Returns
    /// * `OsMsg::OK` - Signalled
    /// * `OsMsg::RESET` - Broadcast
    /// * `OsMsg::TIMEOUT` - Timeout expired
    pub fn wait_timeout<P: Port>(self, kernel: &Kernel<P>, timeout: SysInterval) -> OsMsg {
        let (mtx, w) = {
            let mut sys = kernel.lock();
            let mtx = sys.mtx_next();
            (mtx, self.wait_timeout_s(&mut sys, timeout))
        };

        match w {
            Wait::Done(msg) => msg,
            Wait::Blocked => {
                let mut sys = kernel.lock();
                let msg = sys.wake_msg();
                if msg != OsMsg::TIMEOUT {
                    if let Some(mtx) = mtx {
                        let _ = mtx.lock_s(&mut sys);
                    }
                }
                msg
            }
        }
    }

    pub fn signal<P: Port>(self, kernel: &Kernel<P>) {
        self.signal_s(&mut kernel.lock());
    }

    pub fn broadcast<P: Port>(self, kernel: &Kernel<P>) {
        self.broadcast_s(&mut kernel.lock());
    }
}
