//! Event flags
//!
//! Every thread has a mask of pending events. Event sources broadcast to
//! the listeners registered on them, each listener turning a broadcast into
//! events of its own thread and accumulating the source flags.

use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, Sys};
use crate::port::Port;
use crate::types::{
    EventFlags, EventMask, OsMsg, OsThreadState, SysInterval, ThreadId, Wait, ALL_EVENTS,
    TIME_IMMEDIATE, TIME_INFINITE,
};

/// Mask of a single event, empty for ids past the mask width
#[inline]
pub const fn event_mask(id: u32) -> EventMask {
    match (1 as EventMask).checked_shl(id) {
        Some(m) => m,
        None => 0,
    }
}

pub(crate) struct EventSourceState {
    /// Most recently registered listener
    listeners: Option<u8>,
    used: bool,
}

impl EventSourceState {
    pub(crate) const fn new() -> Self {
        EventSourceState {
            listeners: None,
            used: false,
        }
    }
}

pub(crate) struct ListenerState {
    next: Option<u8>,
    source: u8,
    thread: ThreadId,
    /// Events signalled to the thread
    events: EventMask,
    /// Flags accumulated since the last read
    flags: EventFlags,
    /// Flags that trigger a signal
    wflags: EventFlags,
    used: bool,
}

impl ListenerState {
    pub(crate) const fn new() -> Self {
        ListenerState {
            next: None,
            source: 0,
            thread: ThreadId(0),
            events: 0,
            flags: 0,
            wflags: 0,
            used: false,
        }
    }
}

/// Event source handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventSource(u8);

/// Registration of a thread on an event source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventListener(u8);

/// How a waiting thread matches its pending events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventWait {
    /// Lowest pending event of the mask
    One,
    /// Every pending event of the mask
    Any,
    /// Only once all events of the mask are pending
    All,
}

impl EventWait {
    /// Events to consume from `pending`, `0` when the wait is not satisfied
    fn select(self, pending: EventMask, mask: EventMask) -> EventMask {
        let m = pending & mask;
        match self {
            EventWait::One => m & m.wrapping_neg(),
            EventWait::Any => m,
            EventWait::All if m == mask => mask,
            EventWait::All => 0,
        }
    }
}

impl EventSource {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }

    /// Create an event source
    ///
    /// # Returns
    /// * `Err(OsError::ObjNoMore)` - Pool exhausted
    pub fn create<P: Port>(sys: &mut Sys<P>) -> OsResult<Self> {
        let slot = sys
            .evsrcs
            .iter()
            .position(|s| !s.used)
            .ok_or(OsError::ObjNoMore)?;
        sys.evsrcs[slot] = EventSourceState::new();
        sys.evsrcs[slot].used = true;
        Ok(EventSource(slot as u8))
    }

    /// Return the source to the pool
    ///
    /// # Returns
    /// * `Err(OsError::ObjInUse)` - Listeners are still registered
    pub fn dispose<P: Port>(self, sys: &mut Sys<P>) -> OsResult<()> {
        let s = &mut sys.evsrcs[self.idx()];
        if s.listeners.is_some() {
            return Err(OsError::ObjInUse);
        }
        s.used = false;
        Ok(())
    }

    #[inline]
    pub fn is_listened_i<P: Port>(self, sys: &Sys<P>) -> bool {
        sys.evsrcs[self.idx()].listeners.is_some()
    }

    /// Register the running thread on the source.
    ///
    /// # Arguments
    /// * `events` - Events signalled to the thread on broadcast
    /// * `wflags` - Broadcast flags the listener reacts to
    ///
    /// # Returns
    /// * `Err(OsError::ObjNoMore)` - No free listener
    pub fn register_mask_with_flags<P: Port>(
        self,
        sys: &mut Sys<P>,
        events: EventMask,
        wflags: EventFlags,
    ) -> OsResult<EventListener> {
        let slot = sys
            .listeners
            .iter()
            .position(|l| !l.used)
            .ok_or(OsError::ObjNoMore)?;

        let elp = ListenerState {
            next: sys.evsrcs[self.idx()].listeners,
            source: self.0,
            thread: sys.current(),
            events,
            flags: 0,
            wflags,
            used: true,
        };
        sys.listeners[slot] = elp;
        sys.evsrcs[self.idx()].listeners = Some(slot as u8);
        Ok(EventListener(slot as u8))
    }

    /// Register reacting to every flag
    pub fn register_mask<P: Port>(self, sys: &mut Sys<P>, events: EventMask) -> OsResult<EventListener> {
        self.register_mask_with_flags(sys, events, EventFlags::MAX)
    }

    /// Register signalling event number `id`
    ///
    /// # Returns
    /// * `Err(OsError::EvtInvalidId)` - `id` does not fit an event mask
    pub fn register<P: Port>(self, sys: &mut Sys<P>, id: u32) -> OsResult<EventListener> {
        if id >= EventMask::BITS {
            return Err(OsError::EvtInvalidId);
        }
        self.register_mask(sys, event_mask(id))
    }

    /// Add `flags` to every listener and signal those interested, without
    /// rescheduling. Zero flags signal every listener.
    pub fn broadcast_flags_i<P: Port>(self, sys: &mut Sys<P>, flags: EventFlags) {
        let mut cursor = sys.evsrcs[self.idx()].listeners;
        while let Some(l) = cursor {
            let elp = &mut sys.listeners[l as usize];
            elp.flags |= flags;
            let (thread, events, hit) = (elp.thread, elp.events, flags == 0 || flags & elp.wflags != 0);
            cursor = elp.next;

            if hit {
                sys.evt_signal_i(thread, events);
            }
        }
    }

    pub fn broadcast_i<P: Port>(self, sys: &mut Sys<P>) {
        self.broadcast_flags_i(sys, 0);
    }

    pub fn broadcast_flags<P: Port>(self, kernel: &Kernel<P>, flags: EventFlags) {
        let mut sys = kernel.lock();
        self.broadcast_flags_i(&mut sys, flags);
        sys.reschedule_s();
    }

    pub fn broadcast<P: Port>(self, kernel: &Kernel<P>) {
        self.broadcast_flags(kernel, 0);
    }
}

impl EventListener {
    /// Unlink from its source and free the listener
    pub fn unregister<P: Port>(self, sys: &mut Sys<P>) {
        let src = sys.listeners[self.0 as usize].source as usize;
        let next = sys.listeners[self.0 as usize].next;

        let mut prev: Option<u8> = None;
        let mut cursor = sys.evsrcs[src].listeners;
        while let Some(l) = cursor {
            if l == self.0 {
                match prev {
                    Some(p) => sys.listeners[p as usize].next = next,
                    None => sys.evsrcs[src].listeners = next,
                }
                break;
            }
            prev = Some(l);
            cursor = sys.listeners[l as usize].next;
        }
        sys.listeners[self.0 as usize] = ListenerState::new();
    }

    /// Flags received since the last call, restricted to the listener's
    /// interest
    pub fn get_and_clear_flags<P: Port>(self, sys: &mut Sys<P>) -> EventFlags {
        let elp = &mut sys.listeners[self.0 as usize];
        let flags = elp.flags;
        elp.flags = 0;
        flags & elp.wflags
    }

    #[inline]
    pub fn thread<P: Port>(self, sys: &Sys<P>) -> ThreadId {
        sys.listeners[self.0 as usize].thread
    }
}

impl<P: Port> Sys<P> {
    /// Add events to a thread, waking it if that satisfies its wait,
    /// without rescheduling
    pub fn evt_signal_i(&mut self, id: ThreadId, events: EventMask) {
        let t = &mut self.threads[id.index()];
        t.epending |= events;

        let wake = match t.state {
            OsThreadState::WtOrEvt => t.epending & t.ewmask != 0,
            OsThreadState::WtAndEvt => t.epending & t.ewmask == t.ewmask,
            _ => false,
        };
        if wake {
            t.rdymsg = OsMsg::OK;
            self.ready_i(id);
        }
    }

    /// Clear and return the pending events of the running thread in `mask`
    pub fn evt_get_and_clear_events(&mut self, mask: EventMask) -> EventMask {
        let t = &mut self.threads[self.current.index()];
        let m = t.epending & mask;
        t.epending &= !m;
        m
    }

    /// Add events to the running thread, returns its pending events
    pub fn evt_add_events(&mut self, events: EventMask) -> EventMask {
        let t = &mut self.threads[self.current.index()];
        t.epending |= events;
        t.epending
    }

    /// Wait for events of `mask` as selected by `mode`.
    ///
    /// `Done` carries the consumed events, `0` for an unsatisfied
    /// `TIME_IMMEDIATE` wait. After `Blocked` the resumed thread collects the
    /// events with [`evt_collect_s`](Self::evt_collect_s).
    pub fn evt_wait_timeout_s(
        &mut self,
        mode: EventWait,
        mask: EventMask,
        timeout: SysInterval,
    ) -> Wait<EventMask> {
        let m = self.evt_collect_now(mode, mask);
        if m != 0 {
            return Wait::Done(m);
        }
        if timeout == TIME_IMMEDIATE {
            return Wait::Done(0);
        }

        let state = match mode {
            EventWait::All => OsThreadState::WtAndEvt,
            _ => OsThreadState::WtOrEvt,
        };
        self.threads[self.current.index()].ewmask = mask;
        self.go_sleep_timeout_s(state, timeout);
        Wait::Blocked
    }

    fn evt_collect_now(&mut self, mode: EventWait, mask: EventMask) -> EventMask {
        let t = &mut self.threads[self.current.index()];
        let m = mode.select(t.epending, mask);
        t.epending &= !m;
        m
    }

    /// Events consumed by a resumed waiter, `0` after a timeout
    pub fn evt_collect_s(&mut self, mode: EventWait, mask: EventMask) -> EventMask {
        if !self.wake_msg().is_ok() {
            return 0;
        }
        self.evt_collect_now(mode, mask)
    }

    pub fn evt_wait_one_timeout_s(&mut self, mask: EventMask, timeout: SysInterval) -> Wait<EventMask> {
        self.evt_wait_timeout_s(EventWait::One, mask, timeout)
    }

    pub fn evt_wait_any_timeout_s(&mut self, mask: EventMask, timeout: SysInterval) -> Wait<EventMask> {
        self.evt_wait_timeout_s(EventWait::Any, mask, timeout)
    }

    pub fn evt_wait_all_timeout_s(&mut self, mask: EventMask, timeout: SysInterval) -> Wait<EventMask> {
        self.evt_wait_timeout_s(EventWait::All, mask, timeout)
    }
}

/// Call `handlers[i](i)` for every event `i` set in `events`
pub fn dispatch(handlers: &[fn(u32)], events: EventMask) {
    for (i, handler) in handlers.iter().take(EventMask::BITS as usize).enumerate() {
        if events & event_mask(i as u32) != 0 {
            handler(i as u32);
        }
    }
}

impl<P: Port> Kernel<P> {
    /// Signal events to a thread
    pub fn evt_signal(&self, id: ThreadId, events: EventMask) {
        let mut sys = self.lock();
        sys.evt_signal_i(id, events);
        sys.reschedule_s();
    }

    pub fn evt_get_and_clear_events(&self, mask: EventMask) -> EventMask {
        self.lock().evt_get_and_clear_events(mask)
    }

    pub fn evt_add_events(&self, events: EventMask) -> EventMask {
        self.lock().evt_add_events(events)
    }

    /// Wait for events, returns the consumed ones or `0` on timeout
    pub fn evt_wait_timeout(&self, mode: EventWait, mask: EventMask, timeout: SysInterval) -> EventMask {
        let w = self.lock().evt_wait_timeout_s(mode, mask, timeout);
        self.resume(w, |sys| sys.evt_collect_s(mode, mask))
    }

    pub fn evt_wait_one(&self, mask: EventMask) -> EventMask {
        self.evt_wait_timeout(EventWait::One, mask, TIME_INFINITE)
    }

    pub fn evt_wait_any(&self, mask: EventMask) -> EventMask {
        self.evt_wait_timeout(EventWait::Any, mask, TIME_INFINITE)
    }

    pub fn evt_wait_all(&self, mask: EventMask) -> EventMask {
        self.evt_wait_timeout(EventWait::All, mask, TIME_INFINITE)
    }

    /// Wait for any event
    pub fn evt_wait_any_event(&self) -> EventMask {
        self.evt_wait_any(ALL_EVENTS)
    }
}
