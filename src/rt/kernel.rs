//! Kernel instance and system state
//!
//! A [`Kernel`] owns every kernel table. It is built with `const fn new`,
//! placed in a `static` and initialized once; there is one instance per
//! core. All kernel state is reached through [`Kernel::lock`] (or
//! [`Kernel::lock_from_isr`]), whose guard dereferences to [`Sys`], the
//! locked view on which the `_i` and `_s` calls live.

use core::ops::{Deref, DerefMut};
use core::ptr::addr_of_mut;

use portable_atomic::{AtomicBool, AtomicU8, Ordering};

use crate::config::*;
use crate::critical::LockToken;
use crate::cs_cell::CsCell;
use crate::error::{OsError, OsResult};
use crate::port::Port;
use crate::queue::ThreadsQueue;
use crate::sched::ReadyList;
use crate::thread::{OsThread, ThreadQueueState};
use crate::time::{VirtualTimer, VtList};
use crate::types::{OsMsg, OsNestingCtr, OsStkElement, OsThreadState, ThreadId, Wait, IDLEPRIO};

#[cfg(feature = "condvar")]
use crate::sync::condvar::CondState;
#[cfg(feature = "events")]
use crate::sync::event::{EventSourceState, ListenerState};
#[cfg(feature = "mutex")]
use crate::sync::mutex::MutexState;
#[cfg(feature = "sem")]
use crate::sync::sem::SemState;

// ============ Kernel Flags ============

/// Kernel status readable without the lock
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
    locked: AtomicBool,
    isr_nesting: AtomicU8,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            isr_nesting: AtomicU8::new(0),
        }
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn isr_nesting(&self) -> OsNestingCtr {
        self.isr_nesting.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

// ============ System State ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SysState {
    Uninit,
    Initialized,
    Running,
}

/// Kernel state, reachable only through a [`SysLock`]
pub struct Sys<P: Port> {
    pub(crate) port: P,
    pub(crate) cfg: KernelConfig,
    pub(crate) state: SysState,

    pub(crate) threads: [OsThread; CFG_THREADS_MAX],
    pub(crate) rlist: ReadyList,
    pub(crate) current: ThreadId,
    pub(crate) idle: ThreadId,

    pub(crate) vtlist: VtList,
    pub(crate) timers: [VirtualTimer<P>; CFG_VT_MAX],

    #[cfg(feature = "sem")]
    pub(crate) sems: [SemState; CFG_SEM_MAX],
    #[cfg(feature = "mutex")]
    pub(crate) mutexes: [MutexState; CFG_MTX_MAX],
    #[cfg(feature = "condvar")]
    pub(crate) conds: [CondState; CFG_COND_MAX],
    #[cfg(feature = "events")]
    pub(crate) evsrcs: [EventSourceState; CFG_EVT_SRC_MAX],
    #[cfg(feature = "events")]
    pub(crate) listeners: [ListenerState; CFG_EVT_LISTENER_MAX],
    pub(crate) tqueues: [ThreadQueueState; CFG_TQUEUE_MAX],

    /// Address of the owning `Kernel`, handed to thread frames
    pub(crate) kernel_addr: usize,
    idle_wa: [OsStkElement; CFG_IDLE_STK_SIZE],
}

/// Idle thread body
fn idle_thread<P: Port>(_: usize) -> OsMsg {
    loop {
        P::idle();
    }
}

impl<P: Port> Sys<P> {
    const fn new(port: P, cfg: KernelConfig) -> Self {
        Sys {
            port,
            cfg,
            state: SysState::Uninit,
            threads: [const { OsThread::new() }; CFG_THREADS_MAX],
            rlist: ReadyList::new(),
            current: ThreadId(0),
            idle: ThreadId(0),
            vtlist: VtList::new(),
            timers: [VirtualTimer::new(); CFG_VT_MAX],
            #[cfg(feature = "sem")]
            sems: [const { SemState::new() }; CFG_SEM_MAX],
            #[cfg(feature = "mutex")]
            mutexes: [const { MutexState::new() }; CFG_MTX_MAX],
            #[cfg(feature = "condvar")]
            conds: [const { CondState::new() }; CFG_COND_MAX],
            #[cfg(feature = "events")]
            evsrcs: [const { EventSourceState::new() }; CFG_EVT_SRC_MAX],
            #[cfg(feature = "events")]
            listeners: [const { ListenerState::new() }; CFG_EVT_LISTENER_MAX],
            tqueues: [const { ThreadQueueState::new() }; CFG_TQUEUE_MAX],
            kernel_addr: 0,
            idle_wa: [0; CFG_IDLE_STK_SIZE],
        }
    }

    /// Reset every table and create the idle thread
    fn init(&mut self, kernel_addr: usize) -> OsResult<()> {
        self.kernel_addr = kernel_addr;

        for t in self.threads.iter_mut() {
            *t = OsThread::new();
        }
        self.rlist.init();
        self.vt_init();

        #[cfg(feature = "sem")]
        for s in self.sems.iter_mut() {
            *s = SemState::new();
        }
        #[cfg(feature = "mutex")]
        for m in self.mutexes.iter_mut() {
            *m = MutexState::new();
        }
        #[cfg(feature = "condvar")]
        for c in self.conds.iter_mut() {
            *c = CondState::new();
        }
        #[cfg(feature = "events")]
        {
            for e in self.evsrcs.iter_mut() {
                *e = EventSourceState::new();
            }
            for l in self.listeners.iter_mut() {
                *l = ListenerState::new();
            }
        }
        for q in self.tqueues.iter_mut() {
            *q = ThreadQueueState::new();
        }

        let wabase = self.idle_wa.as_mut_ptr();
        let waend = unsafe { wabase.add(CFG_IDLE_STK_SIZE) };
        let idle = unsafe {
            self.thread_setup("idle", wabase, waend, IDLEPRIO, idle_thread::<P>, 0)?
        };
        self.idle = idle;
        self.current = idle;
        self.ready_i(idle);

        self.state = SysState::Initialized;
        Ok(())
    }

    /// Hand the CPU to the highest priority ready thread
    fn start(&mut self) {
        let ntp = self.rlist.dequeue_highest(&mut self.threads).unwrap_or(self.idle);
        self.threads[ntp.index()].state = OsThreadState::Running;
        self.current = ntp;
        self.state = SysState::Running;

        crate::info!("kernel started, first thread {}", self.threads[ntp.index()].name);

        unsafe {
            self.port.start_first(addr_of_mut!(self.threads[ntp.index()].ctx));
        }
    }

    // ============ Accessors ============

    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.cfg
    }

    #[inline]
    pub fn state(&self) -> SysState {
        self.state
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state == SysState::Running
    }

    /// The running thread
    #[inline]
    pub fn current(&self) -> ThreadId {
        self.current
    }

    #[inline]
    pub fn idle_thread(&self) -> ThreadId {
        self.idle
    }

    #[inline]
    pub fn thread(&self, id: ThreadId) -> &OsThread {
        &self.threads[id.index()]
    }

    /// Wake-up message of the running thread
    #[inline]
    pub fn wake_msg(&self) -> OsMsg {
        self.threads[self.current.index()].rdymsg
    }

    // ============ Halt and checks ============

    /// Stop the system: log, run the hook, hand over to the port
    pub fn halt(&self, reason: &'static str) -> ! {
        crate::error!("system halted: {}", reason);
        if let Some(hook) = self.cfg.halt_hook {
            hook(reason);
        }
        P::halt(reason)
    }

    /// Contract check, compiled out in release builds
    #[inline(always)]
    pub(crate) fn dbg_check(&self, cond: bool, reason: &'static str) {
        #[cfg(debug_assertions)]
        if !cond {
            self.halt(reason);
        }
        #[cfg(not(debug_assertions))]
        let _ = (cond, reason);
    }

    /// Verify the kernel lists
    pub fn integrity_check_i(&self) -> Result<(), &'static str> {
        if !self.rlist.is_consistent(&self.threads) {
            return Err("ready list corrupted");
        }
        if self
            .rlist
            .iter(&self.threads)
            .any(|t| self.threads[t.index()].state != OsThreadState::Ready)
        {
            return Err("thread in ready list not ready");
        }
        if self.is_running()
            && self.threads[self.current.index()].state != OsThreadState::Running
        {
            return Err("current thread not running");
        }
        if !self.vt_list_is_consistent() {
            return Err("virtual timer list corrupted");
        }

        let queues_ok = |q: &ThreadsQueue| q.is_consistent(&self.threads);
        if !self
            .threads
            .iter()
            .all(|t| queues_ok(&t.waiting) && queues_ok(&t.msgqueue))
        {
            return Err("thread queue corrupted");
        }
        if !self.tqueues.iter().all(|q| queues_ok(&q.queue)) {
            return Err("thread queue corrupted");
        }
        #[cfg(feature = "sem")]
        if !self.sems.iter().all(|s| queues_ok(&s.queue)) {
            return Err("semaphore queue corrupted");
        }
        #[cfg(feature = "mutex")]
        if !self.mutexes.iter().all(|m| queues_ok(&m.queue)) {
            return Err("mutex queue corrupted");
        }
        #[cfg(feature = "condvar")]
        if !self.conds.iter().all(|c| queues_ok(&c.queue)) {
            return Err("condition variable queue corrupted");
        }
        Ok(())
    }
}

// ============ Lock Guard ============

/// RAII guard of the system lock, dereferences to the kernel state
pub struct SysLock<'a, P: Port> {
    sys: &'a mut Sys<P>,
    flags: &'a KernelFlags,
    state: P::LockState,
    _token: LockToken,
}

impl<P: Port> Deref for SysLock<'_, P> {
    type Target = Sys<P>;

    #[inline(always)]
    fn deref(&self) -> &Sys<P> {
        self.sys
    }
}

impl<P: Port> DerefMut for SysLock<'_, P> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Sys<P> {
        self.sys
    }
}

impl<P: Port> Drop for SysLock<'_, P> {
    #[inline(always)]
    fn drop(&mut self) {
        self.flags.locked.store(false, Ordering::Release);
        P::unlock(self.state);
    }
}

// ============ Kernel ============

/// A kernel instance
pub struct Kernel<P: Port> {
    flags: KernelFlags,
    core: CsCell<Sys<P>>,
}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P, cfg: KernelConfig) -> Self {
        Kernel {
            flags: KernelFlags::new(),
            core: CsCell::new(Sys::new(port, cfg)),
        }
    }

    #[inline(always)]
    pub fn flags(&self) -> &KernelFlags {
        &self.flags
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.flags.is_running()
    }

    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.flags.is_initialized()
    }

    /// Enter the system lock from thread context
    #[inline]
    pub fn lock(&self) -> SysLock<'_, P> {
        self.acquire(false)
    }

    /// Enter the system lock from an ISR bracketed by `isr_enter`/`isr_exit`
    #[inline]
    pub fn lock_from_isr(&self) -> SysLock<'_, P> {
        self.acquire(true)
    }

    fn acquire(&self, from_isr: bool) -> SysLock<'_, P> {
        let state = P::lock();
        if self.flags.locked.swap(true, Ordering::Acquire) {
            P::unlock(state);
            P::halt("misplaced lock, already locked");
        }

        // SAFETY: the lock is held until the guard drops
        let token = unsafe { LockToken::new() };
        let sys = self.core.get(&token);
        let guard = SysLock {
            sys,
            flags: &self.flags,
            state,
            _token: token,
        };

        let in_isr = self.flags.isr_nesting() > 0;
        if from_isr {
            guard.dbg_check(in_isr, "lock_from_isr outside of an ISR");
        } else {
            guard.dbg_check(!in_isr && !P::is_isr_context(), "lock called from an ISR");
        }
        guard
    }

    /// Run `f` under the system lock
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut Sys<P>) -> R) -> R {
        let mut sys = self.lock();
        f(&mut sys)
    }

    /// Complete a two-phase call: a blocked caller collects its result with
    /// `finish` once it runs again.
    pub(crate) fn resume<T>(&self, w: Wait<T>, finish: impl FnOnce(&mut Sys<P>) -> T) -> T {
        match w {
            Wait::Done(v) => v,
            Wait::Blocked => finish(&mut self.lock()),
        }
    }

    /// Initialize the kernel and create the idle thread.
    ///
    /// Must be called before any other kernel function.
    ///
    /// # Returns
    /// * `Ok(())` - Initialization successful
    /// * `Err(OsError::OsRunning)` - Kernel is already running
    pub fn init(&'static self) -> OsResult<()> {
        if self.is_running() {
            return Err(OsError::OsRunning);
        }

        {
            let mut sys = self.lock();
            sys.init(self as *const Self as usize)?;
        }
        self.flags.initialized.store(true, Ordering::Release);

        crate::info!("kernel initialized");
        Ok(())
    }

    /// Start multitasking.
    ///
    /// The highest priority ready thread runs once the lock is released;
    /// on hardware ports the calling context is never resumed.
    ///
    /// # Returns
    /// * `Err(OsError::OsNotInit)` - Kernel not initialized
    /// * `Err(OsError::OsRunning)` - Kernel is already running
    pub fn start(&self) -> OsResult<()> {
        if !self.is_initialized() {
            return Err(OsError::OsNotInit);
        }
        if self.is_running() {
            return Err(OsError::OsRunning);
        }

        let mut sys = self.lock();
        self.flags.running.store(true, Ordering::Release);
        sys.start();
        Ok(())
    }

    // ============ ISR protocol ============

    /// IRQ prologue
    #[inline]
    pub fn isr_enter(&self) {
        self.flags.isr_nesting.fetch_add(1, Ordering::Relaxed);
    }

    /// IRQ epilogue, preempts the running thread if a more urgent one got
    /// ready during the interrupt
    pub fn isr_exit(&self) {
        let mut sys = self.lock_from_isr();
        let nesting = self.flags.isr_nesting();
        sys.dbg_check(nesting > 0, "isr_exit: not inside an ISR");
        let nesting = nesting.saturating_sub(1);
        self.flags.isr_nesting.store(nesting, Ordering::Relaxed);

        if nesting == 0 && sys.is_running() && sys.is_preemption_required() {
            sys.do_preemption();
        }
    }

    /// System tick interrupt: prologue, timer handler, epilogue
    pub fn tick_isr(&self) {
        self.isr_enter();
        {
            let mut sys = self.lock_from_isr();
            sys.timer_handler_i();
        }
        self.isr_exit();
    }

    /// Halt the system from any context
    pub fn halt(&self, reason: &'static str) -> ! {
        let sys = if self.flags.isr_nesting() > 0 {
            self.lock_from_isr()
        } else {
            self.lock()
        };
        sys.halt(reason)
    }
}
