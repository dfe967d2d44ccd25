//! Virtual timers
//!
//! One global delta list: every armed timer stores its distance from the
//! previous one, so the tick only ever looks at the head. Timers with the
//! same deadline fire in the order they were armed.
//!
//! In tickless mode the list carries a `lasttime` base; deltas are counted
//! from it and the port alarm is kept on the head deadline.

use crate::config::{CFG_THREADS_MAX, CFG_VT_MAX};
use crate::error::{OsError, OsResult};
use crate::kernel::Sys;
use crate::port::Port;
use crate::sched::wakeup_on_timeout;
use crate::types::{SysInterval, SysTime, ThreadId, VtId, TIME_IMMEDIATE};

/// Timer callback, runs with the system lock held
pub type VtFn<P> = fn(&mut Sys<P>, VtId, usize);

pub struct VirtualTimer<P: Port> {
    next: Option<VtId>,
    prev: Option<VtId>,
    /// Ticks after the previous timer in the list
    delta: SysInterval,
    func: Option<VtFn<P>>,
    par: usize,
    /// Period of a continuous timer, 0 for one-shot
    reload: SysInterval,
    armed: bool,
    allocated: bool,
}

// Not derived: that would require `P: Copy`
impl<P: Port> Clone for VirtualTimer<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Port> Copy for VirtualTimer<P> {}

impl<P: Port> VirtualTimer<P> {
    pub const fn new() -> Self {
        VirtualTimer {
            next: None,
            prev: None,
            delta: 0,
            func: None,
            par: 0,
            reload: 0,
            armed: false,
            allocated: false,
        }
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

impl<P: Port> Default for VirtualTimer<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Delta list header
pub struct VtList {
    head: Option<VtId>,
    tail: Option<VtId>,
    /// Tick counter, periodic mode only
    systime: SysTime,
    /// Base time of the head delta, tickless mode only
    lasttime: SysTime,
}

impl VtList {
    pub const fn new() -> Self {
        VtList {
            head: None,
            tail: None,
            systime: 0,
            lasttime: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl Default for VtList {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Port> Sys<P> {
    pub(crate) fn vt_init(&mut self) {
        self.vtlist = VtList::new();
        for (i, vt) in self.timers.iter_mut().enumerate() {
            *vt = VirtualTimer::new();
            // The first slots are the thread timeout timers
            vt.allocated = i < CFG_THREADS_MAX;
        }
    }

    // ============ Delta list ============

    /// Link `id` between `prev` and `next` with `delta`, shortening `next`
    fn vt_link(&mut self, id: VtId, prev: Option<VtId>, next: Option<VtId>, delta: SysInterval) {
        let vt = &mut self.timers[id.index()];
        vt.prev = prev;
        vt.next = next;
        vt.delta = delta;
        vt.armed = true;

        match prev {
            Some(p) => self.timers[p.index()].next = Some(id),
            None => self.vtlist.head = Some(id),
        }
        match next {
            Some(n) => {
                self.timers[n.index()].prev = Some(id);
                self.timers[n.index()].delta -= delta;
            }
            None => self.vtlist.tail = Some(id),
        }
    }

    /// Unlink `id`, leaving the delta of its successor untouched
    fn vt_unlink(&mut self, id: VtId) {
        let (prev, next) = (self.timers[id.index()].prev, self.timers[id.index()].next);
        match prev {
            Some(p) => self.timers[p.index()].next = next,
            None => self.vtlist.head = next,
        }
        match next {
            Some(n) => self.timers[n.index()].prev = prev,
            None => self.vtlist.tail = prev,
        }

        let vt = &mut self.timers[id.index()];
        vt.prev = None;
        vt.next = None;
        vt.armed = false;
    }

    /// Find the place of a timer `delta` ticks after `prev`, behind every
    /// timer with the same deadline, and link it there
    fn vt_insert_from(&mut self, id: VtId, mut prev: Option<VtId>, mut delta: SysInterval) {
        let mut cursor = match prev {
            Some(p) => self.timers[p.index()].next,
            None => self.vtlist.head,
        };
        while let Some(c) = cursor {
            let d = self.timers[c.index()].delta;
            if d > delta {
                break;
            }
            delta -= d;
            prev = Some(c);
            cursor = self.timers[c.index()].next;
        }
        self.vt_link(id, prev, cursor, delta);
    }

    /// Put `id` in the list, `delay` ticks from now
    fn vt_enqueue(&mut self, id: VtId, delay: SysInterval) {
        if !self.cfg.is_tickless() {
            self.vt_insert_from(id, None, delay);
            return;
        }

        let now = self.port.now();
        let delay = delay.max(self.cfg.st_timedelta);

        let Some(head) = self.vtlist.head else {
            // Empty list, now becomes the base time
            self.vtlist.lasttime = now;
            self.vt_link(id, None, None, delay);
            self.port.start_alarm(self.vtlist.lasttime.wrapping_add(delay));
            return;
        };

        let since = now.wrapping_sub(self.vtlist.lasttime);
        let delta = since.wrapping_add(delay);
        if delta < since {
            // Past the numeric range, skip the head to wrap back in range
            let d = delta.wrapping_sub(self.timers[head.index()].delta);
            self.vt_insert_from(id, Some(head), d);
            return;
        }
        if delta < self.timers[head.index()].delta {
            self.port.set_alarm(self.vtlist.lasttime.wrapping_add(delta));
        }
        self.vt_insert_from(id, None, delta);
    }

    // ============ Timer API ============

    /// Allocate a timer from the user pool
    ///
    /// # Returns
    /// * `Err(OsError::TmrNoMore)` - Pool exhausted
    pub fn vt_alloc_i(&mut self) -> OsResult<VtId> {
        let slot = (CFG_THREADS_MAX..CFG_VT_MAX)
            .find(|&i| !self.timers[i].allocated)
            .ok_or(OsError::TmrNoMore)?;

        self.timers[slot] = VirtualTimer::new();
        self.timers[slot].allocated = true;
        Ok(VtId(slot as u8))
    }

    /// Disarm and return a timer to the pool
    pub fn vt_free_i(&mut self, id: VtId) {
        self.dbg_check(id.index() >= CFG_THREADS_MAX, "vt_free_i: thread timer");
        self.vt_reset_i(id);
        self.timers[id.index()].allocated = false;
    }

    /// Arm a one-shot timer; an armed timer is disarmed first.
    ///
    /// # Arguments
    /// * `id` - Timer
    /// * `delay` - Ticks until `func` runs
    /// * `func` - Callback, runs under the system lock
    /// * `par` - Argument passed to `func`
    ///
    /// # Returns
    /// * `Err(OsError::TmrInvalidDly)` - `delay` is zero
    pub fn vt_set_i(&mut self, id: VtId, delay: SysInterval, func: VtFn<P>, par: usize) -> OsResult<()> {
        self.vt_arm(id, delay, 0, func, par)
    }

    /// Arm a timer firing every `period` ticks until reset
    pub fn vt_set_continuous_i(
        &mut self,
        id: VtId,
        period: SysInterval,
        func: VtFn<P>,
        par: usize,
    ) -> OsResult<()> {
        self.vt_arm(id, period, period, func, par)
    }

    fn vt_arm(
        &mut self,
        id: VtId,
        delay: SysInterval,
        reload: SysInterval,
        func: VtFn<P>,
        par: usize,
    ) -> OsResult<()> {
        self.dbg_check(self.timers[id.index()].allocated, "vt_set_i: timer not allocated");
        if delay == TIME_IMMEDIATE {
            crate::warn!("timer {} armed with zero delay", id.index());
            return Err(OsError::TmrInvalidDly);
        }

        self.vt_reset_i(id);
        let vt = &mut self.timers[id.index()];
        vt.func = Some(func);
        vt.par = par;
        vt.reload = reload;
        self.vt_enqueue(id, delay);
        Ok(())
    }

    /// Disarm a timer, no effect if it is not armed
    pub fn vt_reset_i(&mut self, id: VtId) {
        if !self.timers[id.index()].armed {
            return;
        }

        let was_head = self.vtlist.head == Some(id);
        let (next, delta) = (self.timers[id.index()].next, self.timers[id.index()].delta);
        self.vt_unlink(id);
        if let Some(n) = next {
            self.timers[n.index()].delta += delta;
        }

        if !self.cfg.is_tickless() || !was_head {
            return;
        }

        let Some(head) = self.vtlist.head else {
            self.port.stop_alarm();
            return;
        };

        let nowdelta = self.port.now().wrapping_sub(self.vtlist.lasttime);
        let hdelta = self.timers[head.index()].delta;
        if nowdelta >= hdelta {
            // Alarm already pending
            return;
        }
        let at = if hdelta - nowdelta < self.cfg.st_timedelta {
            nowdelta + self.cfg.st_timedelta
        } else {
            hdelta
        };
        self.port.set_alarm(self.vtlist.lasttime.wrapping_add(at));
    }

    #[inline]
    pub fn vt_is_armed_i(&self, id: VtId) -> bool {
        self.timers[id.index()].armed
    }

    /// Ticks left before the timer fires
    ///
    /// # Returns
    /// * `Err(OsError::TmrInactive)` - Timer not armed
    pub fn vt_remaining_i(&self, id: VtId) -> OsResult<SysInterval> {
        if !self.timers[id.index()].armed {
            return Err(OsError::TmrInactive);
        }

        let mut delta: SysInterval = 0;
        let mut cursor = self.vtlist.head;
        while let Some(c) = cursor {
            delta = delta.wrapping_add(self.timers[c.index()].delta);
            if c == id {
                break;
            }
            cursor = self.timers[c.index()].next;
        }

        if self.cfg.is_tickless() {
            let nowdelta = self.port.now().wrapping_sub(self.vtlist.lasttime);
            return Ok(delta.saturating_sub(nowdelta));
        }
        Ok(delta)
    }

    /// Fire the head timer, already unlinked from the list
    fn vt_fire(&mut self, id: VtId) {
        let vt = self.timers[id.index()];
        if vt.reload > 0 {
            if self.cfg.is_tickless() {
                self.vt_reload_tickless(id, vt.reload);
            } else {
                self.vt_enqueue(id, vt.reload);
            }
        }
        if let Some(func) = vt.func {
            func(self, id, vt.par);
        }
    }

    /// Re-arm a continuous timer one period after the deadline that just
    /// fired (`lasttime`), so late alarms do not shift the period.
    fn vt_reload_tickless(&mut self, id: VtId, reload: SysInterval) {
        let now = self.port.now();
        let nowdelta = now.wrapping_sub(self.vtlist.lasttime);
        // Past the next deadline already, fire as soon as possible
        let delay = reload.saturating_sub(nowdelta);

        if self.vtlist.is_empty() {
            let delay = delay.max(self.cfg.st_timedelta);
            self.vtlist.lasttime = now;
            self.vt_link(id, None, None, delay);
            self.port.start_alarm(now.wrapping_add(delay));
            return;
        }

        let mut delta = nowdelta.wrapping_add(delay);
        if delta < nowdelta {
            delta = delay;
        }
        self.vt_insert_from(id, None, delta);
    }

    /// Advance timer time, firing every timer that expired.
    ///
    /// Periodic mode: one call per tick. Tickless mode: called from the
    /// alarm interrupt, processes everything up to the port's current time
    /// and programs the next alarm.
    pub fn vt_do_tick_i(&mut self) {
        if !self.cfg.is_tickless() {
            self.vtlist.systime = self.vtlist.systime.wrapping_add(1);

            let Some(head) = self.vtlist.head else {
                return;
            };
            let d = &mut self.timers[head.index()].delta;
            *d = d.saturating_sub(1);

            while let Some(head) = self.vtlist.head {
                if self.timers[head.index()].delta > 0 {
                    break;
                }
                self.vt_unlink(head);
                self.vt_fire(head);
            }
            return;
        }

        let now = loop {
            let now = self.port.now();
            let Some(head) = self.vtlist.head else {
                return;
            };
            let nowdelta = now.wrapping_sub(self.vtlist.lasttime);
            let hdelta = self.timers[head.index()].delta;
            if nowdelta < hdelta {
                break now;
            }

            // The head deadline becomes the new base
            self.vtlist.lasttime = self.vtlist.lasttime.wrapping_add(hdelta);
            self.vt_unlink(head);
            if self.vtlist.is_empty() {
                self.port.stop_alarm();
            }
            self.vt_fire(head);
        };

        let Some(head) = self.vtlist.head else {
            return;
        };
        let nowdelta = now.wrapping_sub(self.vtlist.lasttime);
        self.vtlist.lasttime = now;
        let hd = &mut self.timers[head.index()].delta;
        *hd -= nowdelta;

        let delta = (*hd).max(self.cfg.st_timedelta);
        self.port.set_alarm(now.wrapping_add(delta));
    }

    /// Current system time in ticks
    pub fn system_time(&self) -> SysTime {
        if self.cfg.is_tickless() {
            self.port.now()
        } else {
            self.vtlist.systime
        }
    }

    // ============ Thread timeouts ============

    /// Arm the timeout timer of a thread about to sleep
    pub(crate) fn vt_arm_timeout(&mut self, id: ThreadId, timeout: SysInterval) {
        let vt = VtId(id.0);
        self.vt_reset_i(vt);
        let t = &mut self.timers[vt.index()];
        t.func = Some(wakeup_on_timeout::<P>);
        t.par = id.index();
        t.reload = 0;
        self.vt_enqueue(vt, timeout);
    }

    #[inline]
    pub(crate) fn vt_cancel_timeout(&mut self, id: ThreadId) {
        self.vt_reset_i(VtId(id.0));
    }

    // ============ Checks ============

    /// Links agree both ways and every linked timer is armed
    pub(crate) fn vt_list_is_consistent(&self) -> bool {
        let mut prev = None;
        let mut count = 0usize;
        let mut cursor = self.vtlist.head;
        while let Some(c) = cursor {
            let vt = &self.timers[c.index()];
            if vt.prev != prev || !vt.armed || count > CFG_VT_MAX {
                return false;
            }
            count += 1;
            prev = Some(c);
            cursor = vt.next;
        }
        prev == self.vtlist.tail
            && self.timers.iter().filter(|vt| vt.armed).count() == count
    }
}
