//! End-to-end scheduling scenarios
//!
//! The simulation port never executes thread code: each test plays the
//! thread the kernel reports as current and calls the two-phase `_s` API on
//! its behalf, while `tick_isr` stands in for the system tick interrupt.

use std::sync::Mutex as StdMutex;

use quickcheck_macros::quickcheck;
use rtkernel::port::SimPort;
use rtkernel::sem::OsSemCtr;
use rtkernel::*;

// ============ Helpers ============

fn kernel(cfg: KernelConfig) -> &'static Kernel<SimPort> {
    let k: &'static Kernel<SimPort> = Box::leak(Box::new(Kernel::new(SimPort::new(), cfg)));
    k.init().unwrap();
    k
}

fn wa() -> &'static mut [OsStkElement] {
    Box::leak(vec![0; 256].into_boxed_slice())
}

fn body(_: usize) -> OsMsg {
    OsMsg::OK
}

fn desc(name: &'static str, prio: OsPrio) -> ThreadDescriptor {
    ThreadDescriptor::new(name, wa(), prio, body, 0)
}

fn spawn(k: &Kernel<SimPort>, name: &'static str, prio: OsPrio) -> ThreadId {
    k.create(desc(name, prio)).unwrap()
}

fn suspended(sys: &mut Sys<SimPort>, name: &'static str, prio: OsPrio) -> ThreadId {
    sys.create_suspended_i(desc(name, prio)).unwrap()
}

fn current(k: &Kernel<SimPort>) -> ThreadId {
    k.lock().current()
}

fn idle(k: &Kernel<SimPort>) -> ThreadId {
    k.lock().idle_thread()
}

fn state(k: &Kernel<SimPort>, id: ThreadId) -> OsThreadState {
    k.lock().thread(id).state()
}

fn prio(k: &Kernel<SimPort>, id: ThreadId) -> OsPrio {
    k.lock().thread(id).prio()
}

fn wake_msg(k: &Kernel<SimPort>) -> OsMsg {
    k.lock().wake_msg()
}

fn ticks(k: &Kernel<SimPort>, n: u32) {
    for _ in 0..n {
        k.tick_isr();
    }
}

fn check(k: &Kernel<SimPort>) {
    k.lock().integrity_check_i().unwrap();
}

// ============ Startup and preemption ============

#[test]
fn start_runs_highest_ready() {
    let k = kernel(KernelConfig::DEFAULT);
    assert_eq!(k.start(), Ok(()));
    assert_eq!(k.start(), Err(OsError::OsRunning));
    assert!(k.lock().port().is_started());
    assert_eq!(current(k), idle(k));
}

#[test]
fn start_before_init_fails() {
    let k: &'static Kernel<SimPort> =
        Box::leak(Box::new(Kernel::new(SimPort::new(), KernelConfig::DEFAULT)));
    assert_eq!(k.start(), Err(OsError::OsNotInit));
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "isr_exit: not inside an ISR")]
fn unbalanced_isr_exit_halts() {
    let k = kernel(KernelConfig::DEFAULT);
    k.isr_exit();
}

#[test]
fn higher_priority_create_preempts() {
    let k = kernel(KernelConfig::DEFAULT);
    let low = spawn(k, "low", 3);
    k.start().unwrap();
    assert_eq!(current(k), low);

    let high = spawn(k, "high", 5);
    assert_eq!(current(k), high);
    assert_eq!(state(k, high), OsThreadState::Running);
    assert_eq!(state(k, low), OsThreadState::Ready);
    assert_eq!(k.lock().port().switch_count(), 1);
    check(k);
}

#[test]
fn lower_priority_create_does_not_preempt() {
    let k = kernel(KernelConfig::DEFAULT);
    let high = spawn(k, "high", 5);
    k.start().unwrap();

    let low = spawn(k, "low", 3);
    assert_eq!(current(k), high);
    assert_eq!(state(k, low), OsThreadState::Ready);
    assert_eq!(k.lock().port().switch_count(), 0);
}

#[test]
fn creation_errors() {
    let k = kernel(KernelConfig::DEFAULT);

    assert_eq!(k.create(desc("noprio", NOPRIO)).err(), Some(OsError::PrioInvalid));

    let small = Box::leak(vec![0; CFG_STK_SIZE_MIN - 1].into_boxed_slice());
    let d = ThreadDescriptor::new("small", small, NORMALPRIO, body, 0);
    assert_eq!(k.create(d).err(), Some(OsError::StkSizeInvalid));

    let area = wa();
    let range = area.as_mut_ptr_range();
    let first = ThreadDescriptor::new("first", area, NORMALPRIO, body, 0);
    k.with_lock(|sys| sys.create_suspended_i(first)).unwrap();
    let overlap = unsafe {
        ThreadDescriptor::from_raw("overlap", range.start.add(8), range.end, NORMALPRIO, body, 0)
    };
    assert_eq!(k.create(overlap).err(), Some(OsError::StkInUse));

    // Idle and "first" already hold two control blocks
    for _ in 0..CFG_THREADS_MAX - 2 {
        k.with_lock(|sys| suspended(sys, "filler", NORMALPRIO));
    }
    assert_eq!(k.create(desc("extra", NORMALPRIO)).err(), Some(OsError::ThreadNoMoreTcb));
}

#[test]
fn round_robin_on_quantum() {
    let cfg = KernelConfig {
        time_quantum: 4,
        ..KernelConfig::DEFAULT
    };
    let k = kernel(cfg);
    let t1 = spawn(k, "t1", 10);
    let t2 = spawn(k, "t2", 10);
    k.start().unwrap();
    assert_eq!(current(k), t1);

    ticks(k, 3);
    assert_eq!(current(k), t1);
    ticks(k, 1);
    assert_eq!(current(k), t2);
    assert_eq!(state(k, t1), OsThreadState::Ready);

    ticks(k, 4);
    assert_eq!(current(k), t1);
    check(k);
}

#[test]
fn yield_rotates_equals_only() {
    let k = kernel(KernelConfig::DEFAULT);
    let t1 = spawn(k, "t1", 10);
    let t2 = spawn(k, "t2", 10);
    let low = spawn(k, "low", 5);
    k.start().unwrap();

    k.yield_now();
    assert_eq!(current(k), t2);
    k.yield_now();
    assert_eq!(current(k), t1);
    assert_eq!(state(k, low), OsThreadState::Ready);
}

// ============ Time ============

#[test]
fn sleep_wakes_after_interval() {
    let k = kernel(KernelConfig::DEFAULT);
    let t = spawn(k, "sleeper", 10);
    k.start().unwrap();

    assert!(k.lock().sleep_s(TIME_IMMEDIATE).done().is_some());
    assert!(k.lock().sleep_s(25).is_blocked());
    assert_eq!(state(k, t), OsThreadState::Sleeping);
    assert_eq!(current(k), idle(k));

    ticks(k, 24);
    assert_eq!(state(k, t), OsThreadState::Sleeping);
    ticks(k, 1);
    assert_eq!(current(k), t);
    assert_eq!(wake_msg(k), OsMsg::TIMEOUT);
    assert_eq!(k.system_time(), 25);
}

#[test]
fn windowed_sleep_skips_missed_deadline() {
    let k = kernel(KernelConfig::DEFAULT);
    spawn(k, "periodic", 10);
    k.start().unwrap();

    ticks(k, 10);
    let (next, w) = k.lock().sleep_until_windowed_s(5, 8);
    assert_eq!(next, 8);
    assert!(!w.is_blocked());

    let (next, w) = k.lock().sleep_until_windowed_s(8, 20);
    assert_eq!(next, 20);
    assert!(w.is_blocked());
    ticks(k, 10);
    assert_eq!(k.system_time(), 20);
    let cur = current(k);
    assert_eq!(k.lock().thread_by_name("periodic"), Some(cur));
}

static FIRED: StdMutex<Vec<usize>> = StdMutex::new(Vec::new());

fn record(_: &mut Sys<SimPort>, _: VtId, par: usize) {
    FIRED.lock().unwrap().push(par);
}

#[test]
fn virtual_timers_fire_in_deadline_order() {
    let k = kernel(KernelConfig::DEFAULT);
    let a = k.with_lock(|sys| {
        let a = sys.vt_alloc_i().unwrap();
        let b = sys.vt_alloc_i().unwrap();
        let c = sys.vt_alloc_i().unwrap();
        sys.vt_set_i(a, 5, record, 0).unwrap();
        sys.vt_set_i(b, 3, record, 1).unwrap();
        sys.vt_set_i(c, 5, record, 2).unwrap();
        a
    });

    ticks(k, 2);
    assert!(FIRED.lock().unwrap().is_empty());
    ticks(k, 1);
    assert_eq!(*FIRED.lock().unwrap(), [1]);
    ticks(k, 2);
    assert_eq!(*FIRED.lock().unwrap(), [1, 0, 2]);

    let mut sys = k.lock();
    sys.vt_reset_i(a);
    sys.vt_reset_i(a);
    assert!(!sys.vt_is_armed_i(a));
    assert_eq!(sys.vt_remaining_i(a), Err(OsError::TmrInactive));

    // Zero delay is rejected and leaves the timer disarmed
    assert_eq!(sys.vt_set_i(a, 0, record, 9), Err(OsError::TmrInvalidDly));
    assert!(!sys.vt_is_armed_i(a));
    assert!(sys.integrity_check_i().is_ok());
}

// ============ Semaphores ============

#[test]
fn semaphore_wait_times_out_after_interval() {
    let k = kernel(KernelConfig::DEFAULT);
    let t = spawn(k, "waiter", 10);
    k.start().unwrap();
    let sem = Semaphore::create(&mut k.lock(), 0).unwrap();

    assert!(sem.wait_timeout_s(&mut k.lock(), 100).is_blocked());
    assert_eq!(state(k, t), OsThreadState::WtSem);
    assert_eq!(sem.counter_i(&*k.lock()), -1);

    ticks(k, 99);
    assert_eq!(state(k, t), OsThreadState::WtSem);
    ticks(k, 1);
    assert_eq!(current(k), t);
    assert_eq!(wake_msg(k), OsMsg::TIMEOUT);
    assert_eq!(sem.counter_i(&*k.lock()), 0);
    check(k);
}

#[test]
fn semaphore_immediate_wait_does_not_block() {
    let k = kernel(KernelConfig::DEFAULT);
    spawn(k, "t", 10);
    k.start().unwrap();
    let sem = Semaphore::create(&mut k.lock(), 1).unwrap();

    assert_eq!(sem.wait_timeout_s(&mut k.lock(), TIME_IMMEDIATE), Wait::Done(OsMsg::OK));
    assert_eq!(
        sem.wait_timeout_s(&mut k.lock(), TIME_IMMEDIATE),
        Wait::Done(OsMsg::TIMEOUT)
    );
    assert_eq!(sem.counter_i(&*k.lock()), 0);
    assert_eq!(Semaphore::create(&mut k.lock(), -1), Err(OsError::SemInvalidCount));
}

#[test]
fn semaphore_signal_wakes_one_waiter() {
    let k = kernel(KernelConfig::DEFAULT);
    let ctl = spawn(k, "ctl", 10);
    k.start().unwrap();
    let sem = Semaphore::create(&mut k.lock(), 0).unwrap();

    let w1 = spawn(k, "w1", 20);
    assert!(sem.wait_s(&mut k.lock()).is_blocked());
    let w2 = spawn(k, "w2", 20);
    assert!(sem.wait_s(&mut k.lock()).is_blocked());
    assert_eq!(current(k), ctl);
    assert_eq!(sem.counter_i(&*k.lock()), -2);
    assert_eq!(sem.dispose(&mut k.lock()), Err(OsError::ObjInUse));

    sem.signal_i(&mut k.lock());
    assert_eq!(state(k, w1), OsThreadState::Ready);
    assert_eq!(state(k, w2), OsThreadState::WtSem);
    assert_eq!(sem.counter_i(&*k.lock()), -1);

    k.lock().reschedule_s();
    assert_eq!(current(k), w1);
    assert_eq!(wake_msg(k), OsMsg::OK);
    check(k);
}

#[test]
fn semaphore_reset_wakes_all_with_reset() {
    let k = kernel(KernelConfig::DEFAULT);
    let ctl = spawn(k, "ctl", 10);
    k.start().unwrap();
    let sem = Semaphore::create(&mut k.lock(), 0).unwrap();

    let w1 = spawn(k, "w1", 20);
    assert!(sem.wait_s(&mut k.lock()).is_blocked());
    let w2 = spawn(k, "w2", 30);
    assert!(sem.wait_s(&mut k.lock()).is_blocked());
    assert_eq!(current(k), ctl);

    sem.reset(k, 2);
    assert_eq!(current(k), w2);
    assert_eq!(wake_msg(k), OsMsg::RESET);
    assert_eq!(k.lock().thread(w1).wake_msg(), OsMsg::RESET);
    assert_eq!(sem.counter_i(&*k.lock()), 2);
    check(k);
}

/// Model: `avail` units and `blocked` waiters, never both non-zero
#[quickcheck]
fn semaphore_counter_tracks_waiters(init: u8, ops: Vec<bool>) -> bool {
    let init = (init % 4) as OsSemCtr;
    let k = kernel(KernelConfig::DEFAULT);
    let ctl = spawn(k, "ctl", 10);
    let waiters: Vec<ThreadId> = (0..8)
        .map(|_| k.with_lock(|sys| suspended(sys, "waiter", 20)))
        .collect();
    k.start().unwrap();
    let sem = Semaphore::create(&mut k.lock(), init).unwrap();

    let (mut avail, mut blocked, mut next) = (init, 0, 0);
    for &signal in ops.iter().take(32) {
        if signal {
            sem.signal_s(&mut k.lock());
            if blocked > 0 {
                // The woken waiter runs and leaves
                blocked -= 1;
                k.lock().exit_s(OsMsg::OK);
            } else {
                avail += 1;
            }
        } else if next < waiters.len() {
            k.with_lock(|sys| sys.start_s(waiters[next]));
            next += 1;
            if sem.wait_s(&mut k.lock()).is_blocked() {
                blocked += 1;
            } else {
                avail -= 1;
                k.lock().exit_s(OsMsg::OK);
            }
        }

        let expected = if blocked > 0 { -blocked } else { avail };
        let queued = waiters
            .iter()
            .filter(|&&w| state(k, w) == OsThreadState::WtSem)
            .count() as OsSemCtr;
        if current(k) != ctl || sem.counter_i(&*k.lock()) != expected || queued != blocked {
            return false;
        }
    }
    k.lock().integrity_check_i().is_ok()
}

// ============ Mutexes ============

#[test]
fn priority_inheritance_round_trip() {
    let k = kernel(KernelConfig::DEFAULT);
    let a = spawn(k, "A", 10);
    k.start().unwrap();
    let m = Mutex::create(&mut k.lock()).unwrap();
    assert_eq!(m.lock_s(&mut k.lock()), Wait::Done(()));

    let b = spawn(k, "B", 15);
    assert_eq!(current(k), b);
    assert!(m.lock_s(&mut k.lock()).is_blocked());
    assert_eq!(current(k), a);
    assert_eq!(prio(k, a), 15);
    assert_eq!(k.lock().thread(a).real_prio(), 10);

    m.unlock(k);
    assert_eq!(prio(k, a), 10);
    assert_eq!(current(k), b);
    assert_eq!(m.owner_i(&*k.lock()), Some(b));
    check(k);
}

#[test]
fn boosted_owner_outruns_middle_priority() {
    let k = kernel(KernelConfig::DEFAULT);
    let a = spawn(k, "A", 10);
    let (b, c) = k.with_lock(|sys| (suspended(sys, "B", 30), suspended(sys, "C", 20)));
    k.start().unwrap();
    assert_eq!(current(k), a);

    let m = Mutex::create(&mut k.lock()).unwrap();
    assert_eq!(m.lock_s(&mut k.lock()), Wait::Done(()));

    // B blocks on M and lends its priority to A
    k.with_lock(|sys| sys.start_s(b));
    assert_eq!(current(k), b);
    assert!(m.lock_s(&mut k.lock()).is_blocked());
    assert_eq!(current(k), a);
    assert_eq!(prio(k, a), 30);

    // A sleeps on an unrelated timer while holding M
    assert!(k.lock().sleep_s(10).is_blocked());
    assert_eq!(current(k), idle(k));
    ticks(k, 10);
    assert_eq!(current(k), a);

    // C gets ready from an interrupt but cannot preempt the boosted A
    k.isr_enter();
    k.lock_from_isr().start_i(c);
    k.isr_exit();
    assert_eq!(current(k), a);
    assert_eq!(state(k, c), OsThreadState::Ready);

    // Releasing M hands it to B and drops A back to its base priority
    k.with_lock(|sys| {
        m.unlock_s(sys);
        sys.reschedule_s();
    });
    assert_eq!(current(k), b);
    assert_eq!(k.with_lock(|sys| m.owner_i(sys)), Some(b));
    assert_eq!(prio(k, a), 10);
    assert_eq!(state(k, c), OsThreadState::Ready);
    check(k);
}

#[test]
fn nested_mutexes_release_in_steps() {
    let k = kernel(KernelConfig::DEFAULT);
    let a = spawn(k, "A", 10);
    k.start().unwrap();
    let (m1, m2) = k.with_lock(|sys| (Mutex::create(sys).unwrap(), Mutex::create(sys).unwrap()));
    assert_eq!(m1.lock_s(&mut k.lock()), Wait::Done(()));
    assert_eq!(m2.lock_s(&mut k.lock()), Wait::Done(()));

    let b = spawn(k, "B", 15);
    assert!(m1.lock_s(&mut k.lock()).is_blocked());
    let c = spawn(k, "C", 20);
    assert!(m2.lock_s(&mut k.lock()).is_blocked());
    assert_eq!(current(k), a);
    assert_eq!(prio(k, a), 20);

    // Dropping M2 keeps the boost owed to B's claim on M1
    k.with_lock(|sys| {
        m2.unlock_s(sys);
        sys.reschedule_s();
    });
    assert_eq!(prio(k, a), 15);
    assert_eq!(current(k), c);

    k.with_lock(|sys| m2.unlock_s(sys));
    assert!(k.lock().sleep_s(5).is_blocked());
    assert_eq!(current(k), a);

    m1.unlock(k);
    assert_eq!(prio(k, a), 10);
    assert_eq!(current(k), b);
    check(k);
}

#[test]
fn inheritance_follows_owner_chain() {
    let k = kernel(KernelConfig::DEFAULT);
    let a = spawn(k, "A", 10);
    k.start().unwrap();
    let (m1, m2) = k.with_lock(|sys| (Mutex::create(sys).unwrap(), Mutex::create(sys).unwrap()));
    assert_eq!(m1.lock_s(&mut k.lock()), Wait::Done(()));

    // B owns M2 and waits on M1
    let b = spawn(k, "B", 15);
    assert_eq!(m2.lock_s(&mut k.lock()), Wait::Done(()));
    assert!(m1.lock_s(&mut k.lock()).is_blocked());
    assert_eq!(prio(k, a), 15);

    // C waits on M2 with a timeout, boosting B and through it A
    let c = spawn(k, "C", 20);
    assert!(m2.lock_timeout_s(&mut k.lock(), 50).is_blocked());
    assert_eq!(current(k), a);
    assert_eq!(prio(k, b), 20);
    assert_eq!(prio(k, a), 20);

    // The timeout unwinds the chain to what B's claim still justifies
    ticks(k, 50);
    assert_eq!(current(k), c);
    assert_eq!(wake_msg(k), OsMsg::TIMEOUT);
    assert_eq!(prio(k, b), 15);
    assert_eq!(prio(k, a), 15);
    assert_eq!(k.with_lock(|sys| m2.owner_i(sys)), Some(b));
    check(k);
}

#[test]
fn mutex_recursion_and_try_lock() {
    let k = kernel(KernelConfig::DEFAULT);
    let a = spawn(k, "A", 10);
    k.start().unwrap();
    let m = Mutex::create(&mut k.lock()).unwrap();

    assert!(m.try_lock(k));
    assert!(m.try_lock(k));
    assert_eq!(m.lock_timeout(k, TIME_IMMEDIATE), OsMsg::OK);
    assert_eq!(m.dispose(&mut k.lock()), Err(OsError::ObjInUse));

    m.unlock(k);
    m.unlock(k);
    assert_eq!(k.with_lock(|sys| m.owner_i(sys)), Some(a));
    m.unlock(k);
    assert!(!k.with_lock(|sys| m.is_locked_i(sys)));

    // Another thread cannot take it while A holds it
    assert!(m.try_lock(k));
    spawn(k, "B", 20);
    assert!(!m.try_lock(k));
    assert_eq!(
        m.lock_timeout_s(&mut k.lock(), TIME_IMMEDIATE),
        Wait::Done(OsMsg::TIMEOUT)
    );
}

#[test]
fn unlock_all_restores_base_priority() {
    let k = kernel(KernelConfig::DEFAULT);
    let a = spawn(k, "A", 10);
    k.start().unwrap();
    let (m1, m2) = k.with_lock(|sys| (Mutex::create(sys).unwrap(), Mutex::create(sys).unwrap()));
    assert_eq!(m1.lock_s(&mut k.lock()), Wait::Done(()));
    assert_eq!(m2.lock_s(&mut k.lock()), Wait::Done(()));
    assert_eq!(m2.lock_s(&mut k.lock()), Wait::Done(()));

    let b = spawn(k, "B", 30);
    assert!(m1.lock_s(&mut k.lock()).is_blocked());
    assert_eq!(current(k), a);

    k.unlock_all();
    assert_eq!(current(k), b);
    assert_eq!(prio(k, a), 10);
    assert_eq!(k.with_lock(|sys| m1.owner_i(sys)), Some(b));
    assert!(!k.with_lock(|sys| m2.is_locked_i(sys)));
}

#[test]
fn set_priority_keeps_inherited_boost() {
    let k = kernel(KernelConfig::DEFAULT);
    let a = spawn(k, "A", 10);
    k.start().unwrap();
    let m = Mutex::create(&mut k.lock()).unwrap();
    assert_eq!(m.lock_s(&mut k.lock()), Wait::Done(()));
    spawn(k, "B", 30);
    assert!(m.lock_s(&mut k.lock()).is_blocked());

    assert_eq!(k.set_priority(15), 10);
    assert_eq!(prio(k, a), 30);
    assert_eq!(k.lock().thread(a).real_prio(), 15);

    m.unlock(k);
    assert_eq!(prio(k, a), 15);
}

// ============ Condition variables ============

#[test]
fn condvar_broadcast_wakes_all_with_reset() {
    let k = kernel(KernelConfig::DEFAULT);
    let ctl = spawn(k, "ctl", 10);
    k.start().unwrap();
    let (m, cv) = k.with_lock(|sys| (Mutex::create(sys).unwrap(), CondVar::create(sys).unwrap()));

    let w1 = spawn(k, "w1", 20);
    assert_eq!(m.lock_s(&mut k.lock()), Wait::Done(()));
    assert_eq!(cv.wait_timeout_s(&mut k.lock(), TIME_IMMEDIATE), Wait::Done(OsMsg::TIMEOUT));
    assert!(cv.wait_s(&mut k.lock()).is_blocked());
    assert!(!k.with_lock(|sys| m.is_locked_i(sys)));

    let w2 = spawn(k, "w2", 20);
    assert_eq!(m.lock_s(&mut k.lock()), Wait::Done(()));
    assert!(cv.wait_s(&mut k.lock()).is_blocked());
    assert_eq!(current(k), ctl);
    assert_eq!(state(k, w2), OsThreadState::WtCond);

    cv.broadcast(k);
    assert_eq!(current(k), w1);
    assert_eq!(wake_msg(k), OsMsg::RESET);
    assert_eq!(state(k, w2), OsThreadState::Ready);
    assert_eq!(k.lock().thread(w2).wake_msg(), OsMsg::RESET);

    assert_eq!(m.lock_s(&mut k.lock()), Wait::Done(()));
    assert_eq!(cv.dispose(&mut k.lock()), Ok(()));
    check(k);
}

#[test]
fn condvar_signal_wakes_highest_waiter() {
    let k = kernel(KernelConfig::DEFAULT);
    let ctl = spawn(k, "ctl", 10);
    k.start().unwrap();
    let (m, cv) = k.with_lock(|sys| (Mutex::create(sys).unwrap(), CondVar::create(sys).unwrap()));

    let lo = spawn(k, "lo", 20);
    assert_eq!(m.lock_s(&mut k.lock()), Wait::Done(()));
    assert!(cv.wait_s(&mut k.lock()).is_blocked());
    let hi = spawn(k, "hi", 25);
    assert_eq!(m.lock_s(&mut k.lock()), Wait::Done(()));
    assert!(cv.wait_s(&mut k.lock()).is_blocked());
    assert_eq!(current(k), ctl);

    cv.signal(k);
    assert_eq!(current(k), hi);
    assert_eq!(wake_msg(k), OsMsg::OK);
    assert_eq!(state(k, lo), OsThreadState::WtCond);
}

// ============ Events ============

#[test]
fn event_wait_all_and_any() {
    let k = kernel(KernelConfig::DEFAULT);
    let ctl = spawn(k, "ctl", 10);
    k.start().unwrap();

    let e = spawn(k, "e", 20);
    assert!(k.lock().evt_wait_all_timeout_s(0b11, TIME_INFINITE).is_blocked());
    assert_eq!(current(k), ctl);

    k.with_lock(|sys| sys.evt_signal_i(e, 0b01));
    assert_eq!(state(k, e), OsThreadState::WtAndEvt);
    k.evt_signal(e, 0b10);
    assert_eq!(current(k), e);
    assert_eq!(k.lock().evt_collect_s(EventWait::All, 0b11), 0b11);
    assert_eq!(k.lock().thread(e).pending_events(), 0);

    // Unsatisfied wait times out with no events
    assert!(k.lock().evt_wait_any_timeout_s(0b1100, 20).is_blocked());
    ticks(k, 20);
    assert_eq!(current(k), e);
    assert_eq!(k.lock().evt_collect_s(EventWait::Any, 0b1100), 0);

    // Already pending events are served without blocking, lowest first
    k.evt_add_events(0b0110);
    assert_eq!(k.lock().evt_wait_one_timeout_s(ALL_EVENTS, TIME_INFINITE), Wait::Done(0b0010));
    assert_eq!(k.evt_get_and_clear_events(ALL_EVENTS), 0b0100);
}

#[test]
fn event_source_filters_flags() {
    let k = kernel(KernelConfig::DEFAULT);
    let ctl = spawn(k, "ctl", 10);
    k.start().unwrap();
    let src = EventSource::create(&mut k.lock()).unwrap();
    assert_eq!(src.register(&mut k.lock(), 32), Err(OsError::EvtInvalidId));
    assert!(!k.with_lock(|sys| src.is_listened_i(sys)));

    let e = spawn(k, "e", 20);
    let l = src.register_mask_with_flags(&mut k.lock(), 0b1_0000, 0b10).unwrap();
    assert!(k.with_lock(|sys| src.is_listened_i(sys)));
    assert!(k.lock().evt_wait_any_timeout_s(0b1_0000, TIME_INFINITE).is_blocked());
    assert_eq!(current(k), ctl);

    src.broadcast_flags(k, 0b01);
    assert_eq!(state(k, e), OsThreadState::WtOrEvt);
    src.broadcast_flags(k, 0b10);
    assert_eq!(current(k), e);

    assert_eq!(k.lock().evt_collect_s(EventWait::Any, 0b1_0000), 0b1_0000);
    assert_eq!(l.get_and_clear_flags(&mut k.lock()), 0b10);
    assert_eq!(k.with_lock(|sys| l.thread(sys)), e);

    assert_eq!(src.dispose(&mut k.lock()), Err(OsError::ObjInUse));
    l.unregister(&mut k.lock());
    assert_eq!(src.dispose(&mut k.lock()), Ok(()));
}

// ============ Messages ============

#[test]
fn message_rendezvous() {
    let k = kernel(KernelConfig::DEFAULT);
    let s = spawn(k, "sender", 10);
    k.start().unwrap();

    let r = spawn(k, "receiver", 20);
    assert_eq!(k.lock().msg_wait_timeout_s(TIME_IMMEDIATE), Wait::Done(None));
    assert!(k.lock().msg_wait_timeout_s(TIME_INFINITE).is_blocked());
    assert_eq!(current(k), s);

    assert_eq!(
        k.lock().msg_send_timeout_s(r, OsMsg(42), TIME_IMMEDIATE),
        Wait::Done(OsMsg::TIMEOUT)
    );
    assert!(k.lock().msg_send_timeout_s(r, OsMsg(42), TIME_INFINITE).is_blocked());
    assert_eq!(current(k), r);
    assert_eq!(state(k, s), OsThreadState::SndMsgQ);

    let sender = k.lock().msg_collect_s();
    assert_eq!(sender, Some(s));
    assert_eq!(state(k, s), OsThreadState::SndMsg);
    assert_eq!(k.msg_get(s), OsMsg(42));

    k.msg_release(s, OsMsg(7));
    assert_eq!(current(k), r);
    assert!(k.lock().sleep_s(1).is_blocked());
    assert_eq!(current(k), s);
    assert_eq!(wake_msg(k), OsMsg(7));
    check(k);
}

#[test]
fn message_send_times_out_while_queued() {
    let k = kernel(KernelConfig::DEFAULT);
    let s = spawn(k, "sender", 20);
    let r = spawn(k, "receiver", 10);
    k.start().unwrap();

    assert!(k.lock().msg_send_timeout_s(r, OsMsg(1), 5).is_blocked());
    assert_eq!(current(k), r);
    ticks(k, 5);
    assert_eq!(current(k), s);
    assert_eq!(wake_msg(k), OsMsg::TIMEOUT);

    assert!(k.lock().sleep_s(1).is_blocked());
    assert_eq!(current(k), r);
    assert!(!k.lock().msg_is_pending_i());
}

#[test]
fn receiver_exit_resets_queued_senders() {
    let k = kernel(KernelConfig::DEFAULT);
    let a = spawn(k, "a", 20);
    let b = spawn(k, "b", 20);
    let r = spawn(k, "receiver", 10);
    k.start().unwrap();

    assert!(k.lock().msg_send_timeout_s(r, OsMsg(1), 50).is_blocked());
    assert_eq!(current(k), b);
    assert!(k.lock().msg_send_timeout_s(r, OsMsg(2), TIME_INFINITE).is_blocked());
    assert_eq!(current(k), r);
    assert!(k.lock().msg_is_pending_i());

    // Both senders come back in queue order and the slot is clean
    k.lock().exit_s(OsMsg::OK);
    assert_eq!(current(k), a);
    assert_eq!(wake_msg(k), OsMsg::RESET);
    assert_eq!(state(k, b), OsThreadState::Ready);
    assert_eq!(k.lock().thread(b).wake_msg(), OsMsg::RESET);
    check(k);

    // The cancelled timeout no longer fires
    ticks(k, 60);
    assert_eq!(current(k), a);
    assert_eq!(wake_msg(k), OsMsg::RESET);

    assert_eq!(k.lock().wait_s(r), Ok(Wait::Done(OsMsg::OK)));
    let reused = spawn(k, "reused", 5);
    assert_eq!(reused, r);
    assert!(k.with_lock(|sys| sys.thread(reused).state() == OsThreadState::Ready));
    check(k);
}

// ============ Thread lifecycle ============

#[test]
fn join_collects_exit_code() {
    let k = kernel(KernelConfig::DEFAULT);
    let p = spawn(k, "parent", 10);
    k.start().unwrap();
    assert_eq!(k.lock().wait_s(p), Err(OsError::ThreadSelf));

    // Child outranks the parent and finishes first
    let fast = spawn(k, "fast", 20);
    k.lock().exit_s(OsMsg(5));
    assert_eq!(current(k), p);
    assert_eq!(state(k, fast), OsThreadState::Final);
    assert_eq!(k.lock().wait_s(fast), Ok(Wait::Done(OsMsg(5))));
    assert_eq!(state(k, fast), OsThreadState::Free);
    assert_eq!(k.lock().wait_s(fast), Err(OsError::ThreadWrongState));

    // Child below the parent: the join blocks until it exits
    let slow = spawn(k, "slow", 5);
    assert!(k.lock().wait_s(slow).unwrap().is_blocked());
    assert_eq!(state(k, p), OsThreadState::WtExit);
    assert_eq!(current(k), slow);
    k.lock().exit_s(OsMsg(9));
    assert_eq!(current(k), p);
    assert_eq!(k.lock().wait_collect_s(slow), OsMsg(9));
    assert_eq!(state(k, slow), OsThreadState::Free);

    let live: Vec<ThreadId> = k.lock().threads().collect();
    assert_eq!(live, [idle(k), p]);
    check(k);
}

#[test]
fn extra_reference_keeps_control_block() {
    let k = kernel(KernelConfig::DEFAULT);
    let p = spawn(k, "parent", 10);
    k.start().unwrap();

    let c = spawn(k, "child", 20);
    k.lock().add_ref(c);
    assert_eq!(k.lock().thread(c).refs(), 2);
    k.lock().exit_s(OsMsg::OK);
    assert_eq!(current(k), p);

    k.release(c);
    assert_eq!(state(k, c), OsThreadState::Final);
    assert_eq!(k.wait(c), Ok(OsMsg::OK));
    assert_eq!(state(k, c), OsThreadState::Free);
    assert_eq!(k.lock().thread_by_name("child"), None);
}

#[test]
fn cooperative_termination_request() {
    let k = kernel(KernelConfig::DEFAULT);
    spawn(k, "ctl", 10);
    k.start().unwrap();
    let w = k.with_lock(|sys| suspended(sys, "worker", 20));

    assert!(!k.lock().thread(w).is_terminating());
    k.terminate(w);
    k.with_lock(|sys| sys.start_s(w));
    assert_eq!(current(k), w);
    assert!(k.should_terminate());
}

#[test]
fn suspend_and_resume_through_reference() {
    let k = kernel(KernelConfig::DEFAULT);
    let ctl = spawn(k, "ctl", 10);
    k.start().unwrap();
    let mut tr = ThreadRef::new();

    let t = spawn(k, "t", 20);
    assert_eq!(k.lock().suspend_timeout_s(&mut tr, TIME_IMMEDIATE), Wait::Done(OsMsg::TIMEOUT));
    assert!(k.lock().suspend_timeout_s(&mut tr, TIME_INFINITE).is_blocked());
    assert_eq!(current(k), ctl);
    assert!(k.lock().thread_ref_is_live(&tr));

    k.lock().resume_s(&mut tr, OsMsg(3));
    assert_eq!(current(k), t);
    assert_eq!(wake_msg(k), OsMsg(3));
    assert_eq!(tr.thread(), None);

    // Empty reference, nothing to resume
    k.lock().resume_i(&mut tr, OsMsg(4));
    assert_eq!(current(k), t);
}

#[test]
fn stale_reference_after_timeout() {
    let k = kernel(KernelConfig::DEFAULT);
    let ctl = spawn(k, "ctl", 10);
    k.start().unwrap();
    let mut tr = ThreadRef::new();

    let t = spawn(k, "t", 20);
    assert!(k.lock().suspend_timeout_s(&mut tr, 3).is_blocked());
    ticks(k, 3);
    assert_eq!(current(k), t);
    assert_eq!(wake_msg(k), OsMsg::TIMEOUT);
    assert!(!k.lock().thread_ref_is_live(&tr));

    assert!(k.lock().sleep_s(10).is_blocked());
    k.lock().resume_i(&mut tr, OsMsg::OK);
    assert_eq!(state(k, t), OsThreadState::Sleeping);
    assert_eq!(current(k), ctl);
}

#[test]
fn thread_queue_wakes_in_arrival_order() {
    let k = kernel(KernelConfig::DEFAULT);
    let ctl = spawn(k, "ctl", 10);
    k.start().unwrap();
    let q = ThreadQueue::create(&mut k.lock()).unwrap();

    let t1 = spawn(k, "t1", 20);
    assert!(q.enqueue_timeout_s(&mut k.lock(), TIME_INFINITE).is_blocked());
    let t2 = spawn(k, "t2", 30);
    assert!(q.enqueue_timeout_s(&mut k.lock(), TIME_INFINITE).is_blocked());
    assert_eq!(current(k), ctl);
    assert_eq!(q.dispose(&mut k.lock()), Err(OsError::ObjInUse));

    assert_eq!(q.dequeue_next_i(&mut k.lock(), OsMsg(1)), Some(t1));
    assert_eq!(state(k, t2), OsThreadState::Queued);
    q.dequeue_all_i(&mut k.lock(), OsMsg(2));
    assert!(q.is_empty_i(&*k.lock()));

    k.lock().reschedule_s();
    assert_eq!(current(k), t2);
    assert_eq!(wake_msg(k), OsMsg(2));
    assert_eq!(k.lock().thread(t1).wake_msg(), OsMsg(1));
    check(k);
}
