//! Semaphore implementation
//!
//! Counting semaphores. A negative counter is the number of waiting
//! threads; waiters are queued by priority, FIFO among equals.

use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, Sys};
use crate::port::Port;
use crate::queue::{ThreadsQueue, WaitOn};
use crate::types::{OsMsg, OsThreadState, SysInterval, Wait, TIME_IMMEDIATE, TIME_INFINITE};

/// Semaphore counter type
pub type OsSemCtr = i32;

pub(crate) struct SemState {
    pub(crate) queue: ThreadsQueue,
    pub(crate) cnt: OsSemCtr,
    used: bool,
}

impl SemState {
    pub(crate) const fn new() -> Self {
        SemState {
            queue: ThreadsQueue::new(),
            cnt: 0,
            used: false,
        }
    }
}

/// Counting semaphore handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Semaphore(u8);

impl Semaphore {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }

    #[inline]
    fn on(self) -> WaitOn {
        WaitOn::Sem(self.0)
    }

    /// Create a semaphore
    ///
    /// # Arguments
    /// * `sys` - Locked kernel
    /// * `count` - Initial count value
    ///
    /// # Returns
    /// * `Err(OsError::SemInvalidCount)` - Negative initial count
    /// * `Err(OsError::ObjNoMore)` - Pool exhausted
    pub fn create<P: Port>(sys: &mut Sys<P>, count: OsSemCtr) -> OsResult<Self> {
        if count < 0 {
            return Err(OsError::SemInvalidCount);
        }
        let slot = sys
            .sems
            .iter()
            .position(|s| !s.used)
            .ok_or(OsError::ObjNoMore)?;

        let s = &mut sys.sems[slot];
        *s = SemState::new();
        s.cnt = count;
        s.used = true;
        Ok(Semaphore(slot as u8))
    }

    /// Return the semaphore to the pool
    ///
    /// # Returns
    /// * `Err(OsError::ObjInUse)` - Threads are waiting on it
    pub fn dispose<P: Port>(self, sys: &mut Sys<P>) -> OsResult<()> {
        let s = &mut sys.sems[self.idx()];
        if !s.queue.is_empty() {
            return Err(OsError::ObjInUse);
        }
        s.used = false;
        Ok(())
    }

    fn check<P: Port>(self, sys: &Sys<P>) {
        let s = &sys.sems[self.idx()];
        sys.dbg_check(
            (s.cnt >= 0 && s.queue.is_empty()) || (s.cnt < 0 && !s.queue.is_empty()),
            "inconsistent semaphore",
        );
    }

    /// Current counter; negative values count the waiters
    #[inline]
    pub fn counter_i<P: Port>(self, sys: &Sys<P>) -> OsSemCtr {
        sys.sems[self.idx()].cnt
    }

    /// Wait without timeout
    pub fn wait_s<P: Port>(self, sys: &mut Sys<P>) -> Wait<OsMsg> {
        self.wait_timeout_s(sys, TIME_INFINITE)
    }

    /// Wait on the semaphore.
    ///
    /// `Done` when the semaphore was taken without blocking, or with
    /// `OsMsg::TIMEOUT` for `TIME_IMMEDIATE` on a taken semaphore. After
    /// `Blocked` the resumed thread reads `OK`, `TIMEOUT` or the reset
    /// message from [`Sys::wake_msg`].
    pub fn wait_timeout_s<P: Port>(self, sys: &mut Sys<P>, timeout: SysInterval) -> Wait<OsMsg> {
        self.check(sys);

        sys.sems[self.idx()].cnt -= 1;
        if sys.sems[self.idx()].cnt >= 0 {
            return Wait::Done(OsMsg::OK);
        }

        if timeout == TIME_IMMEDIATE {
            sys.sems[self.idx()].cnt += 1;
            return Wait::Done(OsMsg::TIMEOUT);
        }

        let cur = sys.current();
        sys.wait_enqueue(self.on(), cur);
        sys.go_sleep_timeout_s(OsThreadState::WtSem, timeout);
        Wait::Blocked
    }

    /// Signal, waking at most one waiter, without rescheduling
    pub fn signal_i<P: Port>(self, sys: &mut Sys<P>) {
        self.check(sys);

        sys.sems[self.idx()].cnt += 1;
        if sys.sems[self.idx()].cnt <= 0 {
            if let Some(t) = sys.wait_dequeue_head(self.on()) {
                sys.threads[t.index()].rdymsg = OsMsg::OK;
                sys.ready_i(t);
            }
        }
    }

    /// Signal, switching to the woken waiter if it outranks the caller
    pub fn signal_s<P: Port>(self, sys: &mut Sys<P>) {
        self.check(sys);

        sys.sems[self.idx()].cnt += 1;
        if sys.sems[self.idx()].cnt <= 0 {
            if let Some(t) = sys.wait_dequeue_head(self.on()) {
                sys.wakeup_s(t, OsMsg::OK);
            }
        }
    }

    /// Add `n` to the counter, waking as many waiters, without rescheduling
    pub fn add_counter_i<P: Port>(self, sys: &mut Sys<P>, n: OsSemCtr) {
        sys.dbg_check(n > 0, "add_counter_i: counter increase not positive");
        for _ in 0..n {
            self.signal_i(sys);
        }
    }

    /// Set the counter to `n` and wake every waiter with `msg`, without
    /// rescheduling
    pub fn reset_with_message_i<P: Port>(self, sys: &mut Sys<P>, n: OsSemCtr, msg: OsMsg) {
        sys.dbg_check(n >= 0, "reset_with_message_i: negative counter");
        self.check(sys);

        sys.sems[self.idx()].cnt = n;
        while let Some(t) = sys.wait_dequeue_head(self.on()) {
            sys.threads[t.index()].rdymsg = msg;
            sys.ready_i(t);
        }
    }

    /// Reset, waiters wake with `OsMsg::RESET`
    pub fn reset_i<P: Port>(self, sys: &mut Sys<P>, n: OsSemCtr) {
        self.reset_with_message_i(sys, n, OsMsg::RESET);
    }

    /// Signal `self` and wait on `spw` as one atomic step
    pub fn signal_wait_s<P: Port>(self, sys: &mut Sys<P>, spw: Semaphore) -> Wait<OsMsg> {
        self.check(sys);
        spw.check(sys);

        sys.sems[self.idx()].cnt += 1;
        if sys.sems[self.idx()].cnt <= 0 {
            if let Some(t) = sys.wait_dequeue_head(self.on()) {
                sys.threads[t.index()].rdymsg = OsMsg::OK;
                sys.ready_i(t);
            }
        }

        sys.sems[spw.idx()].cnt -= 1;
        if sys.sems[spw.idx()].cnt < 0 {
            let cur = sys.current();
            sys.wait_enqueue(spw.on(), cur);
            sys.go_sleep_s(OsThreadState::WtSem);
            return Wait::Blocked;
        }

        sys.reschedule_s();
        Wait::Done(OsMsg::OK)
    }

    // ============ Thread level ============

    /// Wait without timeout
    pub fn wait<P: Port>(self, kernel: &Kernel<P>) -> OsMsg {
        self.wait_timeout(kernel, TIME_INFINITE)
    }

    /// Wait with timeout
    ///
    /// # Returns
    /// * `OsMsg::OK` - Semaphore taken
    /// * `OsMsg::TIMEOUT` - Timeout expired
    /// * Reset message - Semaphore reset while waiting
    pub fn wait_timeout<P: Port>(self, kernel: &Kernel<P>, timeout: SysInterval) -> OsMsg {
        let w = self.wait_timeout_s(&mut kernel.lock(), timeout);
        kernel.resume(w, |sys| sys.wake_msg())
    }

    pub fn signal<P: Port>(self, kernel: &Kernel<P>) {
        self.signal_s(&mut kernel.lock());
    }

    /// Reset to `n`, waiters wake with `OsMsg::RESET`
    pub fn reset<P: Port>(self, kernel: &Kernel<P>, n: OsSemCtr) {
        let mut sys = kernel.lock();
        self.reset_i(&mut sys, n);
        sys.reschedule_s();
    }

    pub fn signal_wait<P: Port>(self, kernel: &Kernel<P>, spw: Semaphore) -> OsMsg {
        let w = self.signal_wait_s(&mut kernel.lock(), spw);
        kernel.resume(w, |sys| sys.wake_msg())
    }
}
