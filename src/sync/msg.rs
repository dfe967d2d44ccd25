//! Synchronous messages
//!
//! Rendezvous between threads: the sender queues on the receiver and stays
//! blocked until the receiver releases it with a reply.

use crate::kernel::{Kernel, Sys};
use crate::port::Port;
use crate::queue::WaitOn;
use crate::types::{OsMsg, OsThreadState, SysInterval, ThreadId, Wait, TIME_IMMEDIATE, TIME_INFINITE};

impl<P: Port> Sys<P> {
    /// Send `msg` to `receiver` and wait for the reply.
    ///
    /// Senders are served in FIFO order. The timeout only covers the wait
    /// for the receiver to take the message; `TIME_IMMEDIATE` returns
    /// `OsMsg::TIMEOUT` at once. After `Blocked` the resumed sender reads the
    /// reply from [`Sys::wake_msg`].
    pub fn msg_send_timeout_s(
        &mut self,
        receiver: ThreadId,
        msg: OsMsg,
        timeout: SysInterval,
    ) -> Wait<OsMsg> {
        let ctp = self.current;
        self.dbg_check(receiver != ctp, "msg_send_timeout_s: sending to itself");
        if timeout == TIME_IMMEDIATE {
            return Wait::Done(OsMsg::TIMEOUT);
        }

        self.threads[ctp.index()].sentmsg = msg;
        self.wait_enqueue(WaitOn::MsgTo(receiver), ctp);
        if self.threads[receiver.index()].state == OsThreadState::WtMsg {
            self.threads[receiver.index()].rdymsg = OsMsg::OK;
            self.ready_i(receiver);
        }
        self.go_sleep_timeout_s(OsThreadState::SndMsgQ, timeout);
        Wait::Blocked
    }

    /// A sender is queued on the running thread
    #[inline]
    pub fn msg_is_pending_i(&self) -> bool {
        !self.threads[self.current.index()].msgqueue.is_empty()
    }

    /// Wait for a message.
    ///
    /// `Done(Some(sender))` when a sender was already queued, `Done(None)`
    /// for `TIME_IMMEDIATE` without one. After `Blocked` the resumed thread
    /// takes the sender with [`msg_collect_s`](Self::msg_collect_s).
    pub fn msg_wait_timeout_s(&mut self, timeout: SysInterval) -> Wait<Option<ThreadId>> {
        if self.msg_is_pending_i() {
            return Wait::Done(self.msg_take_sender());
        }
        if timeout == TIME_IMMEDIATE {
            return Wait::Done(None);
        }
        self.go_sleep_timeout_s(OsThreadState::WtMsg, timeout);
        Wait::Blocked
    }

    /// Sender taken by a resumed receiver, `None` after a timeout
    pub fn msg_collect_s(&mut self) -> Option<ThreadId> {
        if !self.wake_msg().is_ok() {
            return None;
        }
        self.msg_take_sender()
    }

    fn msg_take_sender(&mut self) -> Option<ThreadId> {
        let sender = self.wait_dequeue_head(WaitOn::MsgTo(self.current))?;
        // From here on the sender waits for the reply only
        self.vt_cancel_timeout(sender);
        self.threads[sender.index()].state = OsThreadState::SndMsg;
        Some(sender)
    }

    /// Message carried by a sender taken with `msg_wait_timeout_s`
    pub fn msg_get(&self, sender: ThreadId) -> OsMsg {
        let t = &self.threads[sender.index()];
        self.dbg_check(t.state == OsThreadState::SndMsg, "msg_get: not a pending sender");
        t.sentmsg
    }

    /// Release a sender with `reply`, without rescheduling
    pub fn msg_release_i(&mut self, sender: ThreadId, reply: OsMsg) {
        self.dbg_check(
            self.threads[sender.index()].state == OsThreadState::SndMsg,
            "msg_release_i: not a pending sender",
        );
        self.threads[sender.index()].rdymsg = reply;
        self.ready_i(sender);
    }

    /// Release a sender with `reply`, switching to it if it outranks the
    /// caller
    pub fn msg_release_s(&mut self, sender: ThreadId, reply: OsMsg) {
        self.dbg_check(
            self.threads[sender.index()].state == OsThreadState::SndMsg,
            "msg_release_s: not a pending sender",
        );
        self.wakeup_s(sender, reply);
    }
}

impl<P: Port> Kernel<P> {
    /// Send a message and return the receiver's reply
    pub fn msg_send(&self, receiver: ThreadId, msg: OsMsg) -> OsMsg {
        self.msg_send_timeout(receiver, msg, TIME_INFINITE)
    }

    /// Send a message, `OsMsg::TIMEOUT` if it is not taken in time
    pub fn msg_send_timeout(&self, receiver: ThreadId, msg: OsMsg, timeout: SysInterval) -> OsMsg {
        let w = self.lock().msg_send_timeout_s(receiver, msg, timeout);
        self.resume(w, |sys| sys.wake_msg())
    }

    /// Wait for a message and return its sender, to be released with
    /// [`msg_release`](Self::msg_release)
    pub fn msg_wait(&self) -> ThreadId {
        loop {
            if let Some(sender) = self.msg_wait_timeout(TIME_INFINITE) {
                return sender;
            }
        }
    }

    pub fn msg_wait_timeout(&self, timeout: SysInterval) -> Option<ThreadId> {
        let w = self.lock().msg_wait_timeout_s(timeout);
        self.resume(w, |sys| sys.msg_collect_s())
    }

    pub fn msg_get(&self, sender: ThreadId) -> OsMsg {
        self.lock().msg_get(sender)
    }

    pub fn msg_release(&self, sender: ThreadId, reply: OsMsg) {
        self.lock().msg_release_s(sender, reply);
    }
}
