//! Scheduler module
//!
//! Priority-based preemptive scheduler, cooperative among threads of equal
//! priority unless a round-robin time quantum is configured.

mod rdy_list;

pub use rdy_list::ReadyList;

use core::ptr::addr_of_mut;

use crate::config::CFG_STACK_CHECK;
use crate::kernel::Sys;
use crate::port::Port;
use crate::types::{OsMsg, OsPrio, OsThreadState, SysInterval, ThreadId, VtId, TIME_IMMEDIATE, TIME_INFINITE};

#[cfg(any(feature = "sem", feature = "mutex"))]
use crate::queue::WaitOn;

impl<P: Port> Sys<P> {
    /// Insert a thread in the ready list behind the threads of higher or
    /// equal priority. An armed timeout of the thread is cancelled.
    ///
    /// Never reschedules.
    pub(crate) fn ready_i(&mut self, id: ThreadId) -> ThreadId {
        let state = self.threads[id.index()].state;
        self.dbg_check(
            !matches!(state, OsThreadState::Ready | OsThreadState::Free | OsThreadState::Final),
            "ready_i: invalid thread state",
        );

        self.vt_cancel_timeout(id);
        self.threads[id.index()].state = OsThreadState::Ready;
        self.rlist.insert_behind(&mut self.threads, id);
        id
    }

    /// Insert a thread in the ready list ahead of the threads of equal
    /// priority
    fn ready_ahead_i(&mut self, id: ThreadId) {
        self.threads[id.index()].state = OsThreadState::Ready;
        self.rlist.insert_ahead(&mut self.threads, id);
    }

    /// Hand the CPU from `otp` to `ntp`, which must already be current
    fn switch_to(&mut self, ntp: ThreadId, otp: ThreadId) {
        if CFG_STACK_CHECK {
            let t = &self.threads[ntp.index()];
            if t.ctx.sp < t.wabase {
                self.halt("stack overflow");
            }
        }

        crate::trace!("switch {} -> {}", self.threads[otp.index()].name, self.threads[ntp.index()].name);

        let from = addr_of_mut!(self.threads[otp.index()].ctx);
        let to = addr_of_mut!(self.threads[ntp.index()].ctx);
        // SAFETY: contexts live in the kernel table, which outlives any switch
        unsafe { self.port.switch_context(from, to) }
    }

    /// Take the head of the ready list and make it the running thread
    fn run_next(&mut self) -> ThreadId {
        let ntp = match self.rlist.dequeue_highest(&mut self.threads) {
            Some(t) => t,
            None => self.halt("ready list empty"),
        };
        self.threads[ntp.index()].state = OsThreadState::Running;
        self.current = ntp;
        ntp
    }

    /// Put the running thread to sleep in `state` and switch to the next
    /// ready thread
    pub(crate) fn go_sleep_s(&mut self, state: OsThreadState) {
        self.dbg_check(self.is_running(), "blocking call before start");
        let otp = self.current;
        self.dbg_check(otp != self.idle, "idle thread cannot sleep");

        self.threads[otp.index()].state = state;
        if self.cfg.time_quantum > 0 {
            self.threads[otp.index()].ticks = self.cfg.time_quantum;
        }

        let ntp = self.run_next();
        self.switch_to(ntp, otp);
    }

    /// Like [`go_sleep_s`](Self::go_sleep_s), a timeout wakes the thread with
    /// `OsMsg::TIMEOUT` unless it is `TIME_INFINITE`
    pub(crate) fn go_sleep_timeout_s(&mut self, state: OsThreadState, timeout: SysInterval) {
        self.dbg_check(timeout != TIME_IMMEDIATE, "go_sleep_timeout_s: immediate timeout");

        if timeout != TIME_INFINITE {
            let cur = self.current;
            self.vt_arm_timeout(cur, timeout);
        }
        self.go_sleep_s(state);
    }

    /// Wake a waiting thread with `msg`, switching to it immediately if it
    /// outranks the running thread
    pub(crate) fn wakeup_s(&mut self, ntp: ThreadId, msg: OsMsg) {
        self.threads[ntp.index()].rdymsg = msg;

        let cur = self.current;
        if !self.is_running() || self.threads[ntp.index()].prio <= self.threads[cur.index()].prio {
            self.ready_i(ntp);
            return;
        }

        self.vt_cancel_timeout(ntp);
        self.ready_ahead_i(cur);
        self.threads[ntp.index()].state = OsThreadState::Running;
        self.current = ntp;
        self.switch_to(ntp, cur);
    }

    /// Preempt the running thread, keeping its place among equals
    fn reschedule_ahead(&mut self) {
        let otp = self.current;
        let ntp = self.run_next();
        self.ready_ahead_i(otp);
        self.switch_to(ntp, otp);
    }

    /// Preempt the running thread, queueing it behind its equals with a
    /// fresh quantum
    fn reschedule_behind(&mut self) {
        let otp = self.current;
        let ntp = self.run_next();
        if self.cfg.time_quantum > 0 {
            self.threads[otp.index()].ticks = self.cfg.time_quantum;
        }
        self.threads[otp.index()].state = OsThreadState::Ready;
        self.rlist.insert_behind(&mut self.threads, otp);
        self.switch_to(ntp, otp);
    }

    /// Scheduling point: switch if a ready thread outranks the running one
    pub fn reschedule_s(&mut self) {
        if self.is_running() && self.rlist.first_prio() > self.threads[self.current.index()].prio {
            self.reschedule_ahead();
        }
    }

    /// Decide at ISR exit whether the running thread must be preempted
    pub fn is_preemption_required(&self) -> bool {
        let p1 = self.rlist.first_prio();
        let cur = &self.threads[self.current.index()];
        let p2 = cur.prio;

        if self.cfg.time_quantum > 0 && cur.ticks == 0 {
            // Quantum used up, equals may take over
            p1 >= p2
        } else {
            p1 > p2
        }
    }

    /// Preempt the running thread from the ISR epilogue
    pub fn do_preemption(&mut self) {
        if self.cfg.time_quantum > 0 && self.threads[self.current.index()].ticks == 0 {
            self.reschedule_behind();
        } else {
            self.reschedule_ahead();
        }
    }

    /// Yield to the next ready thread of equal priority, if any
    pub fn yield_s(&mut self) {
        if self.is_running() && self.rlist.first_prio() >= self.threads[self.current.index()].prio {
            self.reschedule_behind();
        }
    }

    /// Change the effective priority of a thread keeping the list it is
    /// linked in ordered
    pub(crate) fn reprioritize(&mut self, id: ThreadId, prio: OsPrio) {
        match self.threads[id.index()].state {
            OsThreadState::Ready => {
                self.rlist.remove(&mut self.threads, id);
                self.threads[id.index()].prio = prio;
                self.rlist.insert_behind(&mut self.threads, id);
            }
            _ => {
                self.threads[id.index()].prio = prio;
                self.wait_requeue(id);
            }
        }
    }
}

/// Timeout callback of the per-thread timer: pull the thread out of
/// whatever it waits on and make it ready with `OsMsg::TIMEOUT`
pub(crate) fn wakeup_on_timeout<P: Port>(sys: &mut Sys<P>, _vt: VtId, arg: usize) {
    let id = ThreadId(arg as u8);
    let (state, on) = (sys.threads[id.index()].state, sys.threads[id.index()].wait);

    match state {
        OsThreadState::Ready | OsThreadState::Running => return,
        #[cfg(feature = "sem")]
        OsThreadState::WtSem => {
            // The waiter gives its slot in the counter back
            if let WaitOn::Sem(s) = on {
                sys.sems[s as usize].cnt += 1;
            }
            sys.wait_dequeue(id);
        }
        #[cfg(feature = "mutex")]
        OsThreadState::WtMtx => {
            sys.wait_dequeue(id);
            if let WaitOn::Mutex(m) = on {
                sys.mtx_waiter_left_i(m);
            }
        }
        _ => sys.wait_dequeue(id),
    }

    sys.threads[id.index()].rdymsg = OsMsg::TIMEOUT;
    sys.ready_i(id);
}
