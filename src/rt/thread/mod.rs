//! Thread management module
//!
//! Thread creation, termination and join, sleeping, priority changes,
//! cooperative termination, thread references and the thread registry.

mod tcb;
mod tqueue;

pub use tcb::OsThread;
pub use tqueue::ThreadQueue;
pub(crate) use tcb::FLAG_TERMINATE;
pub(crate) use tqueue::ThreadQueueState;

use core::mem::size_of;

use crate::config::{CFG_STK_SIZE_MIN, CFG_THREADS_MAX};
use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, Sys};
use crate::port::{Port, ThreadFn, ThreadStart};
use crate::queue::WaitOn;
use crate::time::time_is_in_range;
use crate::types::{
    OsMsg, OsPrio, OsStkElement, OsThreadState, SysInterval, SysTime, ThreadId, Wait, NOPRIO,
    TIME_IMMEDIATE,
};

/// Everything needed to create a thread
pub struct ThreadDescriptor {
    pub name: &'static str,
    wabase: *mut OsStkElement,
    waend: *mut OsStkElement,
    pub prio: OsPrio,
    pub entry: ThreadFn,
    pub arg: usize,
}

impl ThreadDescriptor {
    /// Describe a thread running on a static working area
    ///
    /// # Example
    /// ```ignore
    /// static mut WORKER_WA: [OsStkElement; 256] = [0; 256];
    ///
    /// fn worker(arg: usize) -> OsMsg {
    ///     /* ... */
    ///     OsMsg::OK
    /// }
    ///
    /// let desc = ThreadDescriptor::new(
    ///     "worker",
    ///     unsafe { &mut *addr_of_mut!(WORKER_WA) },
    ///     NORMALPRIO,
    ///     worker,
    ///     0,
    /// );
    /// KERNEL.create(desc).expect("thread creation failed");
    /// ```
    pub fn new(
        name: &'static str,
        working_area: &'static mut [OsStkElement],
        prio: OsPrio,
        entry: ThreadFn,
        arg: usize,
    ) -> Self {
        let range = working_area.as_mut_ptr_range();
        ThreadDescriptor {
            name,
            wabase: range.start,
            waend: range.end,
            prio,
            entry,
            arg,
        }
    }

    /// Describe a thread on a raw working area `[wabase, waend)`
    ///
    /// # Safety
    /// The area must be valid for writes, not used by anything else and
    /// outlive the thread.
    pub unsafe fn from_raw(
        name: &'static str,
        wabase: *mut OsStkElement,
        waend: *mut OsStkElement,
        prio: OsPrio,
        entry: ThreadFn,
        arg: usize,
    ) -> Self {
        ThreadDescriptor {
            name,
            wabase,
            waend,
            prio,
            entry,
            arg,
        }
    }
}

/// Reference to a thread suspended by [`Sys::suspend_timeout_s`]
#[derive(Debug, Default)]
pub struct ThreadRef {
    inner: Option<(ThreadId, u16)>,
}

impl ThreadRef {
    pub const fn new() -> Self {
        ThreadRef { inner: None }
    }

    /// Thread that was suspended on this reference
    #[inline]
    pub fn thread(&self) -> Option<ThreadId> {
        self.inner.map(|(id, _)| id)
    }
}

/// Exit path of a thread whose entry function returned
///
/// # Safety
/// `kernel` must be the address of the `'static` kernel owning the thread.
pub(crate) unsafe fn thread_exit<P: Port>(kernel: usize, msg: OsMsg) -> ! {
    let kernel = unsafe { &*(kernel as *const Kernel<P>) };
    kernel.exit(msg)
}

impl OsThread {
    /// The control block can be handed to a new thread
    #[inline]
    pub(crate) fn is_reusable(&self) -> bool {
        match self.state {
            OsThreadState::Free => true,
            OsThreadState::Final => self.refs == 0,
            _ => false,
        }
    }
}

impl<P: Port> Sys<P> {
    /// Claim a control block and build the initial frame. The new thread is
    /// left in `WtStart`.
    ///
    /// # Safety
    /// `[wabase, waend)` must be a valid working area owned by the thread.
    pub(crate) unsafe fn thread_setup(
        &mut self,
        name: &'static str,
        wabase: *mut OsStkElement,
        waend: *mut OsStkElement,
        prio: OsPrio,
        entry: ThreadFn,
        arg: usize,
    ) -> OsResult<ThreadId> {
        if prio == NOPRIO {
            return Err(OsError::PrioInvalid);
        }

        let (base, end) = (wabase as usize, waend as usize);
        if end <= base || (end - base) / size_of::<OsStkElement>() < CFG_STK_SIZE_MIN {
            return Err(OsError::StkSizeInvalid);
        }

        if self
            .threads
            .iter()
            .any(|t| !t.is_reusable() && base < t.waend && t.wabase < end)
        {
            return Err(OsError::StkInUse);
        }

        let slot = self
            .threads
            .iter()
            .position(|t| t.is_reusable())
            .ok_or(OsError::ThreadNoMoreTcb)?;

        let start = ThreadStart {
            entry,
            arg,
            exit: thread_exit::<P>,
            kernel: self.kernel_addr,
        };
        let ctx = unsafe { self.port.setup_context(wabase, waend, &start) };

        let epoch = self.threads[slot].epoch.wrapping_add(1);
        let t = &mut self.threads[slot];
        *t = OsThread::new();
        t.prio = prio;
        t.realprio = prio;
        t.state = OsThreadState::WtStart;
        t.ticks = self.cfg.time_quantum;
        t.ctx = ctx;
        t.wabase = base;
        t.waend = end;
        t.epoch = epoch;
        t.name = name;
        t.refs = 1;

        crate::info!("thread {} created, prio {}", name, prio);
        Ok(ThreadId(slot as u8))
    }

    /// Create a thread in the `WtStart` state
    ///
    /// # Returns
    /// * `Ok(id)` - Thread created, holding one reference for the caller
    /// * `Err(OsError::PrioInvalid)` - `NOPRIO` requested
    /// * `Err(OsError::StkSizeInvalid)` - Working area below `CFG_STK_SIZE_MIN`
    /// * `Err(OsError::StkInUse)` - Working area overlaps a live thread
    /// * `Err(OsError::ThreadNoMoreTcb)` - Thread table full
    pub fn create_suspended_i(&mut self, desc: ThreadDescriptor) -> OsResult<ThreadId> {
        unsafe {
            self.thread_setup(desc.name, desc.wabase, desc.waend, desc.prio, desc.entry, desc.arg)
        }
    }

    /// Create a thread and put it in the ready list, without rescheduling
    pub fn create_i(&mut self, desc: ThreadDescriptor) -> OsResult<ThreadId> {
        let id = self.create_suspended_i(desc)?;
        Ok(self.ready_i(id))
    }

    /// Make a `WtStart` thread ready, without rescheduling
    pub fn start_i(&mut self, id: ThreadId) -> ThreadId {
        self.dbg_check(
            self.threads[id.index()].state == OsThreadState::WtStart,
            "start_i: thread already started",
        );
        self.ready_i(id)
    }

    /// Start a `WtStart` thread, switching to it if it outranks the caller
    pub fn start_s(&mut self, id: ThreadId) -> ThreadId {
        self.dbg_check(
            self.threads[id.index()].state == OsThreadState::WtStart,
            "start_s: thread already started",
        );
        self.wakeup_s(id, OsMsg::OK);
        id
    }

    /// Terminate the running thread with `msg` as exit code.
    ///
    /// Joining threads are made ready, senders still queued on the thread
    /// get `OsMsg::RESET`. The control block is released once the last
    /// reference is gone.
    pub fn exit_s(&mut self, msg: OsMsg) {
        let cur = self.current;
        #[cfg(feature = "mutex")]
        self.dbg_check(self.threads[cur.index()].mtxlist.is_none(), "exiting thread owns mutexes");

        self.threads[cur.index()].exitcode = msg;
        crate::info!("thread {} exit", self.threads[cur.index()].name);

        while let Some(j) = self.wait_dequeue_head(WaitOn::Exit(cur)) {
            self.threads[j.index()].rdymsg = msg;
            self.ready_i(j);
        }
        while let Some(sender) = self.wait_dequeue_head(WaitOn::MsgTo(cur)) {
            self.threads[sender.index()].rdymsg = OsMsg::RESET;
            self.ready_i(sender);
        }
        self.go_sleep_s(OsThreadState::Final);
    }

    /// Join a thread.
    ///
    /// Consumes the caller's reference to `id`. `Done` carries the exit code
    /// of an already terminated thread; after `Blocked` the caller collects it
    /// with [`wait_collect_s`](Self::wait_collect_s) once resumed.
    ///
    /// # Returns
    /// * `Err(OsError::ThreadSelf)` - A thread cannot join itself
    /// * `Err(OsError::ThreadWrongState)` - No such thread
    pub fn wait_s(&mut self, id: ThreadId) -> OsResult<Wait<OsMsg>> {
        if id == self.current {
            return Err(OsError::ThreadSelf);
        }
        let t = &self.threads[id.index()];
        if t.state == OsThreadState::Free || t.refs == 0 {
            return Err(OsError::ThreadWrongState);
        }

        if t.state == OsThreadState::Final {
            return Ok(Wait::Done(self.wait_collect_s(id)));
        }

        let cur = self.current;
        self.wait_enqueue(WaitOn::Exit(id), cur);
        self.go_sleep_s(OsThreadState::WtExit);
        Ok(Wait::Blocked)
    }

    /// Exit code of a joined thread; drops the reference taken by `wait_s`
    pub fn wait_collect_s(&mut self, id: ThreadId) -> OsMsg {
        let msg = self.threads[id.index()].exitcode;
        self.release(id);
        msg
    }

    /// Take an extra reference to a thread
    pub fn add_ref(&mut self, id: ThreadId) -> ThreadId {
        let refs = self.threads[id.index()].refs;
        self.dbg_check(refs > 0 && refs < u8::MAX, "add_ref: invalid reference count");
        self.threads[id.index()].refs += 1;
        id
    }

    /// Drop a reference; the control block of a terminated thread is freed
    /// with the last one
    pub fn release(&mut self, id: ThreadId) {
        let refs = self.threads[id.index()].refs;
        self.dbg_check(refs > 0, "release: not referenced");

        let t = &mut self.threads[id.index()];
        t.refs = refs.saturating_sub(1);
        if t.refs == 0 && t.state == OsThreadState::Final {
            t.state = OsThreadState::Free;
        }
    }

    /// Sleep for `interval` ticks
    pub fn sleep_s(&mut self, interval: SysInterval) -> Wait<()> {
        if interval == TIME_IMMEDIATE {
            return Wait::Done(());
        }
        self.go_sleep_timeout_s(OsThreadState::Sleeping, interval);
        Wait::Blocked
    }

    /// Sleep until the system time reaches `time`
    pub fn sleep_until_s(&mut self, time: SysTime) -> Wait<()> {
        let interval = time.wrapping_sub(self.system_time());
        self.sleep_s(interval)
    }

    /// Sleep until `next` if the system time is inside `[prev, next)`.
    ///
    /// Returns `next`, the `prev` of the following call for drift free
    /// periodic loops.
    pub fn sleep_until_windowed_s(&mut self, prev: SysTime, next: SysTime) -> (SysTime, Wait<()>) {
        let now = self.system_time();
        let w = if time_is_in_range(now, prev, next) {
            self.sleep_s(next.wrapping_sub(now))
        } else {
            Wait::Done(())
        };
        (next, w)
    }

    /// Change the base priority of the running thread.
    ///
    /// A priority raised by inheritance is only raised further, never
    /// lowered, until the mutexes are released.
    ///
    /// # Returns
    /// The previous base priority
    pub fn set_priority_s(&mut self, newprio: OsPrio) -> OsPrio {
        self.dbg_check(newprio != NOPRIO, "set_priority_s: invalid priority");

        let t = &mut self.threads[self.current.index()];
        let old = t.realprio;
        if t.prio == t.realprio || newprio > t.prio {
            t.prio = newprio;
        }
        t.realprio = newprio;

        self.reschedule_s();
        old
    }

    /// Ask a thread to terminate; it polls with `should_terminate_x`
    pub fn terminate_i(&mut self, id: ThreadId) {
        self.threads[id.index()].flags |= FLAG_TERMINATE;
    }

    /// The running thread was asked to terminate
    #[inline]
    pub fn should_terminate_x(&self) -> bool {
        self.threads[self.current.index()].is_terminating()
    }

    // ============ Thread references ============

    /// The reference points at a thread still suspended on it
    pub fn thread_ref_is_live(&self, tr: &ThreadRef) -> bool {
        match tr.inner {
            Some((id, epoch)) => {
                let t = &self.threads[id.index()];
                t.state == OsThreadState::Suspended && t.epoch == epoch
            }
            None => false,
        }
    }

    /// Suspend the running thread on `tr` until resumed or timed out
    pub fn suspend_timeout_s(&mut self, tr: &mut ThreadRef, timeout: SysInterval) -> Wait<OsMsg> {
        if timeout == TIME_IMMEDIATE {
            return Wait::Done(OsMsg::TIMEOUT);
        }
        self.dbg_check(!self.thread_ref_is_live(tr), "thread reference not empty");

        let cur = self.current;
        let t = &mut self.threads[cur.index()];
        t.epoch = t.epoch.wrapping_add(1);
        tr.inner = Some((cur, t.epoch));

        self.go_sleep_timeout_s(OsThreadState::Suspended, timeout);
        Wait::Blocked
    }

    fn take_ref(&self, tr: &mut ThreadRef) -> Option<ThreadId> {
        let live = self.thread_ref_is_live(tr);
        let id = tr.inner.take()?.0;
        live.then_some(id)
    }

    /// Wake the thread suspended on `tr` with `msg`, without rescheduling.
    /// No effect on an empty reference.
    pub fn resume_i(&mut self, tr: &mut ThreadRef, msg: OsMsg) {
        if let Some(id) = self.take_ref(tr) {
            self.threads[id.index()].rdymsg = msg;
            self.ready_i(id);
        }
    }

    /// Like [`resume_i`](Self::resume_i), with rescheduling
    pub fn resume_s(&mut self, tr: &mut ThreadRef, msg: OsMsg) {
        if let Some(id) = self.take_ref(tr) {
            self.wakeup_s(id, msg);
        }
    }

    // ============ Registry ============

    /// Live threads, terminated ones still referenced included
    pub fn threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        (0..CFG_THREADS_MAX)
            .filter(|&i| !self.threads[i].is_reusable())
            .map(|i| ThreadId(i as u8))
    }

    pub fn thread_by_name(&self, name: &str) -> Option<ThreadId> {
        self.threads().find(|&t| self.threads[t.index()].name == name)
    }
}

impl<P: Port> Kernel<P> {
    /// Create and start a thread
    ///
    /// Before `start` the thread is only made ready; afterwards it runs at
    /// once if it outranks the caller.
    pub fn create(&self, desc: ThreadDescriptor) -> OsResult<ThreadId> {
        let mut sys = self.lock();
        let id = sys.create_suspended_i(desc)?;
        Ok(sys.start_s(id))
    }

    /// Terminate the calling thread
    pub fn exit(&self, msg: OsMsg) -> ! {
        self.lock().exit_s(msg);
        self.halt("terminated thread resumed")
    }

    /// Wait for a thread to terminate and return its exit code
    pub fn wait(&self, id: ThreadId) -> OsResult<OsMsg> {
        let w = self.lock().wait_s(id)?;
        Ok(self.resume(w, |sys| sys.wait_collect_s(id)))
    }

    pub fn release(&self, id: ThreadId) {
        self.lock().release(id);
    }

    /// Sleep for `interval` ticks
    pub fn sleep(&self, interval: SysInterval) {
        let _ = self.lock().sleep_s(interval);
    }

    /// Sleep until the system time reaches `time`
    pub fn sleep_until(&self, time: SysTime) {
        let _ = self.lock().sleep_until_s(time);
    }

    /// Periodic sleep, see [`Sys::sleep_until_windowed_s`]
    pub fn sleep_until_windowed(&self, prev: SysTime, next: SysTime) -> SysTime {
        let (next, _) = self.lock().sleep_until_windowed_s(prev, next);
        next
    }

    pub fn yield_now(&self) {
        self.lock().yield_s();
    }

    pub fn set_priority(&self, prio: OsPrio) -> OsPrio {
        self.lock().set_priority_s(prio)
    }

    pub fn terminate(&self, id: ThreadId) {
        self.lock().terminate_i(id);
    }

    pub fn should_terminate(&self) -> bool {
        self.lock().should_terminate_x()
    }

    /// Suspend the calling thread on `tr`, return the resume message or
    /// `OsMsg::TIMEOUT`
    pub fn suspend_timeout(&self, tr: &mut ThreadRef, timeout: SysInterval) -> OsMsg {
        let w = self.lock().suspend_timeout_s(tr, timeout);
        self.resume(w, |sys| sys.wake_msg())
    }

    /// Current system time in ticks
    pub fn system_time(&self) -> SysTime {
        self.lock().system_time()
    }
}
