//! Mutex implementation
//!
//! Recursive mutexes with priority inheritance. A thread blocking on a
//! mutex lends its priority to the owner, and through owners blocked on
//! other mutexes to the whole chain. Each thread keeps the mutexes it owns
//! on a stack and must release them in reverse locking order.

use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, Sys};
use crate::port::Port;
use crate::queue::{ThreadsQueue, WaitOn};
use crate::types::{OsMsg, OsPrio, OsThreadState, SysInterval, ThreadId, Wait, TIME_IMMEDIATE, TIME_INFINITE};

pub(crate) struct MutexState {
    pub(crate) queue: ThreadsQueue,
    pub(crate) owner: Option<ThreadId>,
    /// Next mutex on the owner's stack
    pub(crate) next: Option<u8>,
    /// Recursive lock count
    pub(crate) cnt: u32,
    used: bool,
}

impl MutexState {
    pub(crate) const fn new() -> Self {
        MutexState {
            queue: ThreadsQueue::new(),
            owner: None,
            next: None,
            cnt: 0,
            used: false,
        }
    }
}

/// Mutex handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mutex(u8);

impl Mutex {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }

    #[inline]
    fn on(self) -> WaitOn {
        WaitOn::Mutex(self.0)
    }

    /// Create a mutex
    ///
    /// # Returns
    /// * `Err(OsError::ObjNoMore)` - Pool exhausted
    pub fn create<P: Port>(sys: &mut Sys<P>) -> OsResult<Self> {
        let slot = sys
            .mutexes
            .iter()
            .position(|m| !m.used)
            .ok_or(OsError::ObjNoMore)?;
        sys.mutexes[slot] = MutexState::new();
        sys.mutexes[slot].used = true;
        Ok(Mutex(slot as u8))
    }

    /// Return the mutex to the pool
    ///
    /// # Returns
    /// * `Err(OsError::ObjInUse)` - Mutex owned or waited on
    pub fn dispose<P: Port>(self, sys: &mut Sys<P>) -> OsResult<()> {
        let m = &mut sys.mutexes[self.idx()];
        if m.owner.is_some() || !m.queue.is_empty() {
            return Err(OsError::ObjInUse);
        }
        m.used = false;
        Ok(())
    }

    #[inline]
    pub fn owner_i<P: Port>(self, sys: &Sys<P>) -> Option<ThreadId> {
        sys.mutexes[self.idx()].owner
    }

    #[inline]
    pub fn is_locked_i<P: Port>(self, sys: &Sys<P>) -> bool {
        sys.mutexes[self.idx()].owner.is_some()
    }

    /// Give the mutex to `t` and push it on its owned stack
    fn take<P: Port>(self, sys: &mut Sys<P>, t: ThreadId) {
        let m = &mut sys.mutexes[self.idx()];
        m.owner = Some(t);
        m.cnt = 1;
        m.next = sys.threads[t.index()].mtxlist;
        sys.threads[t.index()].mtxlist = Some(self.0);
    }

    /// Lock without timeout
    pub fn lock_s<P: Port>(self, sys: &mut Sys<P>) -> Wait<()> {
        match self.lock_timeout_s(sys, TIME_INFINITE) {
            Wait::Done(_) => Wait::Done(()),
            Wait::Blocked => Wait::Blocked,
        }
    }

    /// Lock the mutex, boosting the owner chain while waiting.
    ///
    /// `Done(OK)` when taken without blocking, `Done(TIMEOUT)` for
    /// `TIME_IMMEDIATE` on a mutex owned by another thread. After `Blocked`
    /// the resumed thread owns the mutex if [`Sys::wake_msg`] is `OK`.
    pub fn lock_timeout_s<P: Port>(self, sys: &mut Sys<P>, timeout: SysInterval) -> Wait<OsMsg> {
        let ctp = sys.current();

        let Some(owner) = sys.mutexes[self.idx()].owner else {
            self.take(sys, ctp);
            return Wait::Done(OsMsg::OK);
        };

        if owner == ctp {
            let cnt = sys.mutexes[self.idx()].cnt;
            sys.dbg_check(cnt < u32::MAX, "mutex counter overflow");
            sys.mutexes[self.idx()].cnt = cnt + 1;
            return Wait::Done(OsMsg::OK);
        }

        if timeout == TIME_IMMEDIATE {
            return Wait::Done(OsMsg::TIMEOUT);
        }

        // Lend the caller's priority along the chain of owners
        let prio = sys.threads[ctp.index()].prio;
        let mut tp = owner;
        while sys.threads[tp.index()].prio < prio {
            crate::debug!("priority inheritance: {} raised to {}", sys.threads[tp.index()].name, prio);
            sys.reprioritize(tp, prio);

            let t = &sys.threads[tp.index()];
            match (t.state, t.wait) {
                (OsThreadState::WtMtx, WaitOn::Mutex(m)) => match sys.mutexes[m as usize].owner {
                    Some(next) => tp = next,
                    None => break,
                },
                _ => break,
            }
        }

        sys.wait_enqueue(self.on(), ctp);
        sys.go_sleep_timeout_s(OsThreadState::WtMtx, timeout);
        Wait::Blocked
    }

    /// Lock if free or already owned by the caller, never blocks
    pub fn try_lock_s<P: Port>(self, sys: &mut Sys<P>) -> bool {
        let ctp = sys.current();
        match sys.mutexes[self.idx()].owner {
            None => {
                self.take(sys, ctp);
                true
            }
            Some(owner) if owner == ctp => {
                sys.mutexes[self.idx()].cnt += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Unlock the mutex, which must be the last one locked by the caller.
    ///
    /// The caller's priority drops to the highest of its base priority and
    /// the waiters of the mutexes it still owns. A waiter becomes the new
    /// owner and is made ready; no reschedule happens.
    pub fn unlock_s<P: Port>(self, sys: &mut Sys<P>) {
        let ctp = sys.current();
        sys.dbg_check(sys.threads[ctp.index()].mtxlist.is_some(), "owned mutexes list empty");
        sys.dbg_check(sys.mutexes[self.idx()].owner == Some(ctp), "ownership failure");
        sys.dbg_check(sys.threads[ctp.index()].mtxlist == Some(self.0), "not next in list");

        let m = &mut sys.mutexes[self.idx()];
        m.cnt = m.cnt.saturating_sub(1);
        if m.cnt > 0 {
            return;
        }

        sys.threads[ctp.index()].mtxlist = sys.mutexes[self.idx()].next;
        let newprio = sys.mtx_inherited_prio(ctp);
        sys.threads[ctp.index()].prio = newprio;

        self.hand_over(sys);
    }

    /// Pass the mutex to its first waiter, or free it
    fn hand_over<P: Port>(self, sys: &mut Sys<P>) {
        match sys.wait_dequeue_head(self.on()) {
            Some(t) => {
                self.take(sys, t);
                sys.threads[t.index()].rdymsg = OsMsg::OK;
                sys.ready_i(t);
            }
            None => {
                let m = &mut sys.mutexes[self.idx()];
                m.owner = None;
                m.next = None;
            }
        }
    }

    // ============ Thread level ============

    pub fn lock<P: Port>(self, kernel: &Kernel<P>) {
        let _ = self.lock_s(&mut kernel.lock());
    }

    /// Lock with timeout
    ///
    /// # Returns
    /// * `OsMsg::OK` - Mutex owned
    /// * `OsMsg::TIMEOUT` - Timeout expired
    pub fn lock_timeout<P: Port>(self, kernel: &Kernel<P>, timeout: SysInterval) -> OsMsg {
        let w = self.lock_timeout_s(&mut kernel.lock(), timeout);
        kernel.resume(w, |sys| sys.wake_msg())
    }

    pub fn try_lock<P: Port>(self, kernel: &Kernel<P>) -> bool {
        self.try_lock_s(&mut kernel.lock())
    }

    /// Unlock and reschedule
    pub fn unlock<P: Port>(self, kernel: &Kernel<P>) {
        let mut sys = kernel.lock();
        self.unlock_s(&mut sys);
        sys.reschedule_s();
    }
}

impl<P: Port> Sys<P> {
    /// Priority a mutex owner is entitled to: its base priority or the
    /// highest waiter of the mutexes it owns
    pub(crate) fn mtx_inherited_prio(&self, t: ThreadId) -> OsPrio {
        let mut prio = self.threads[t.index()].realprio;
        let mut cursor = self.threads[t.index()].mtxlist;
        while let Some(m) = cursor {
            let m = &self.mutexes[m as usize];
            if let Some(h) = m.queue.head() {
                prio = prio.max(self.threads[h.index()].prio);
            }
            cursor = m.next;
        }
        prio
    }

    /// A waiter of mutex `m` timed out: lower the owner chain back to what
    /// the remaining waiters justify
    pub(crate) fn mtx_waiter_left_i(&mut self, m: u8) {
        let mut mi = m;
        while let Some(owner) = self.mutexes[mi as usize].owner {
            let newprio = self.mtx_inherited_prio(owner);
            if newprio == self.threads[owner.index()].prio {
                break;
            }
            self.reprioritize(owner, newprio);

            let t = &self.threads[owner.index()];
            match (t.state, t.wait) {
                (OsThreadState::WtMtx, WaitOn::Mutex(next)) => mi = next,
                _ => break,
            }
        }
    }

    /// Most recently locked mutex of the running thread
    pub fn mtx_next(&self) -> Option<Mutex> {
        self.threads[self.current.index()].mtxlist.map(Mutex)
    }

    /// Release every mutex owned by the running thread, whatever the
    /// recursion counts, restore its base priority and reschedule
    pub fn unlock_all_s(&mut self) {
        let ctp = self.current;
        while let Some(m) = self.threads[ctp.index()].mtxlist {
            let mtx = Mutex(m);
            self.threads[ctp.index()].mtxlist = self.mutexes[m as usize].next;
            self.mutexes[m as usize].cnt = 0;
            mtx.hand_over(self);
        }
        self.threads[ctp.index()].prio = self.threads[ctp.index()].realprio;
        self.reschedule_s();
    }
}

impl<P: Port> Kernel<P> {
    /// Release every mutex owned by the calling thread
    pub fn unlock_all(&self) {
        self.lock().unlock_all_s();
    }
}
