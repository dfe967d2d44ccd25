//! Host simulation port
//!
//! Deterministic port for non-ARM targets. It never executes thread code:
//! context switches are only counted, so a test acts as whichever thread
//! the kernel reports as current and calls the `_s` API on its behalf.
//! Thread-level blocking calls cannot collect their result here, use the
//! two-phase `_s` calls instead.
//!
//! Time for tickless mode is set by hand and alarms are recorded.

use core::cell::Cell;

use critical_section::RestoreState;

use super::{Context, Port, ThreadStart};
use crate::types::{OsStkElement, SysTime};

/// Words reserved for the simulated initial frame
const FRAME_WORDS: usize = 16;

pub struct SimPort {
    switches: Cell<u32>,
    started: Cell<bool>,
    now: Cell<SysTime>,
    alarm: Cell<Option<SysTime>>,
}

impl SimPort {
    pub const fn new() -> Self {
        SimPort {
            switches: Cell::new(0),
            started: Cell::new(false),
            now: Cell::new(0),
            alarm: Cell::new(None),
        }
    }

    /// Context switches requested so far
    pub fn switch_count(&self) -> u32 {
        self.switches.get()
    }

    pub fn is_started(&self) -> bool {
        self.started.get()
    }

    pub fn set_now(&self, now: SysTime) {
        self.now.set(now);
    }

    pub fn advance(&self, ticks: SysTime) {
        self.now.set(self.now.get().wrapping_add(ticks));
    }

    /// Currently programmed alarm
    pub fn alarm(&self) -> Option<SysTime> {
        self.alarm.get()
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for SimPort {
    type LockState = RestoreState;

    fn lock() -> RestoreState {
        unsafe { critical_section::acquire() }
    }

    fn unlock(state: RestoreState) {
        unsafe { critical_section::release(state) }
    }

    unsafe fn setup_context(
        &self,
        wabase: *mut OsStkElement,
        waend: *mut OsStkElement,
        _start: &ThreadStart,
    ) -> Context {
        let top = waend as usize;
        let frame = FRAME_WORDS * core::mem::size_of::<OsStkElement>();
        Context {
            sp: top.saturating_sub(frame).max(wabase as usize),
        }
    }

    unsafe fn switch_context(&self, _from: *mut Context, _to: *mut Context) {
        self.switches.set(self.switches.get() + 1);
    }

    unsafe fn start_first(&self, _to: *mut Context) {
        self.started.set(true);
    }

    fn is_isr_context() -> bool {
        false
    }

    fn halt(reason: &'static str) -> ! {
        panic!("system halted: {}", reason)
    }

    fn now(&self) -> SysTime {
        self.now.get()
    }

    fn start_alarm(&self, at: SysTime) {
        self.alarm.set(Some(at));
    }

    fn set_alarm(&self, at: SysTime) {
        self.alarm.set(Some(at));
    }

    fn stop_alarm(&self) {
        self.alarm.set(None);
    }
}
