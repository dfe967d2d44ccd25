//! Thread queues
//!
//! Doubly linked lists of threads threaded through the `qnext`/`qprev`
//! links of the thread table. A thread is linked in at most one queue at a
//! time: a ready list, or the wait queue of the object it blocks on.

use crate::port::Port;
use crate::kernel::Sys;
use crate::thread::OsThread;
use crate::types::ThreadId;

/// Head and tail of a thread queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadsQueue {
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
}

impl ThreadsQueue {
    pub const fn new() -> Self {
        ThreadsQueue { head: None, tail: None }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn head(&self) -> Option<ThreadId> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<ThreadId> {
        self.tail
    }

    /// Insert at the tail (FIFO order)
    pub(crate) fn insert_tail(&mut self, threads: &mut [OsThread], id: ThreadId) {
        threads[id.index()].qnext = None;
        threads[id.index()].qprev = self.tail;

        match self.tail {
            Some(tail) => threads[tail.index()].qnext = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    /// Insert at the head (LIFO order)
    pub(crate) fn insert_head(&mut self, threads: &mut [OsThread], id: ThreadId) {
        threads[id.index()].qprev = None;
        threads[id.index()].qnext = self.head;

        match self.head {
            Some(head) => threads[head.index()].qprev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
    }

    /// Insert behind every thread of higher or equal priority
    pub(crate) fn insert_by_prio(&mut self, threads: &mut [OsThread], id: ThreadId) {
        let prio = threads[id.index()].prio;

        let mut cursor = self.head;
        while let Some(cur) = cursor {
            if threads[cur.index()].prio < prio {
                break;
            }
            cursor = threads[cur.index()].qnext;
        }

        match cursor {
            None => self.insert_tail(threads, id),
            Some(next) => {
                let prev = threads[next.index()].qprev;
                threads[id.index()].qnext = Some(next);
                threads[id.index()].qprev = prev;
                threads[next.index()].qprev = Some(id);
                match prev {
                    Some(p) => threads[p.index()].qnext = Some(id),
                    None => self.head = Some(id),
                }
            }
        }
    }

    /// Unlink a thread that is in this queue
    pub(crate) fn remove(&mut self, threads: &mut [OsThread], id: ThreadId) {
        let next = threads[id.index()].qnext;
        let prev = threads[id.index()].qprev;

        match prev {
            Some(p) => threads[p.index()].qnext = next,
            None => self.head = next,
        }
        match next {
            Some(n) => threads[n.index()].qprev = prev,
            None => self.tail = prev,
        }

        threads[id.index()].qnext = None;
        threads[id.index()].qprev = None;
    }

    /// Remove and return the head
    pub(crate) fn pop_head(&mut self, threads: &mut [OsThread]) -> Option<ThreadId> {
        let head = self.head?;
        self.remove(threads, head);
        Some(head)
    }

    /// Walk the queue from head to tail
    pub(crate) fn iter<'a>(&self, threads: &'a [OsThread]) -> impl Iterator<Item = ThreadId> + 'a {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let cur = cursor?;
            cursor = threads[cur.index()].qnext;
            Some(cur)
        })
    }

    /// Forward and backward walks agree
    pub(crate) fn is_consistent(&self, threads: &[OsThread]) -> bool {
        let mut forward = 0usize;
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(cur) = cursor {
            if threads[cur.index()].qprev != prev || forward > threads.len() {
                return false;
            }
            forward += 1;
            prev = Some(cur);
            cursor = threads[cur.index()].qnext;
        }
        if prev != self.tail {
            return false;
        }

        let mut backward = 0usize;
        let mut cursor = self.tail;
        while let Some(cur) = cursor {
            backward += 1;
            if backward > forward {
                return false;
            }
            cursor = threads[cur.index()].qprev;
        }
        forward == backward
    }
}

/// The object a blocked thread is queued on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOn {
    None,
    #[cfg(feature = "sem")]
    Sem(u8),
    #[cfg(feature = "mutex")]
    Mutex(u8),
    #[cfg(feature = "condvar")]
    Cond(u8),
    ThreadQueue(u8),
    /// Joining the given thread
    Exit(ThreadId),
    /// Message queued on the given receiver
    #[cfg(feature = "messages")]
    MsgTo(ThreadId),
}

impl WaitOn {
    /// Waiters are ordered by priority rather than arrival
    pub(crate) fn is_prio_ordered(self) -> bool {
        match self {
            #[cfg(feature = "sem")]
            WaitOn::Sem(_) => true,
            #[cfg(feature = "mutex")]
            WaitOn::Mutex(_) => true,
            #[cfg(feature = "condvar")]
            WaitOn::Cond(_) => true,
            _ => false,
        }
    }
}

impl<P: Port> Sys<P> {
    /// Run `f` on the queue header of `on` together with the thread table.
    ///
    /// Headers that live inside the thread table are copied out and back so
    /// the table can be borrowed mutably at the same time.
    pub(crate) fn with_queue<R>(
        &mut self,
        on: WaitOn,
        f: impl FnOnce(&mut ThreadsQueue, &mut [OsThread]) -> R,
    ) -> R {
        let mut q = match on {
            WaitOn::None => ThreadsQueue::new(),
            #[cfg(feature = "sem")]
            WaitOn::Sem(i) => self.sems[i as usize].queue,
            #[cfg(feature = "mutex")]
            WaitOn::Mutex(i) => self.mutexes[i as usize].queue,
            #[cfg(feature = "condvar")]
            WaitOn::Cond(i) => self.conds[i as usize].queue,
            WaitOn::ThreadQueue(i) => self.tqueues[i as usize].queue,
            WaitOn::Exit(t) => self.threads[t.index()].waiting,
            #[cfg(feature = "messages")]
            WaitOn::MsgTo(t) => self.threads[t.index()].msgqueue,
        };

        let r = f(&mut q, &mut self.threads);

        match on {
            WaitOn::None => {}
            #[cfg(feature = "sem")]
            WaitOn::Sem(i) => self.sems[i as usize].queue = q,
            #[cfg(feature = "mutex")]
            WaitOn::Mutex(i) => self.mutexes[i as usize].queue = q,
            #[cfg(feature = "condvar")]
            WaitOn::Cond(i) => self.conds[i as usize].queue = q,
            WaitOn::ThreadQueue(i) => self.tqueues[i as usize].queue = q,
            WaitOn::Exit(t) => self.threads[t.index()].waiting = q,
            #[cfg(feature = "messages")]
            WaitOn::MsgTo(t) => self.threads[t.index()].msgqueue = q,
        }
        r
    }

    /// Queue the thread on `on`, honouring the queue ordering
    pub(crate) fn wait_enqueue(&mut self, on: WaitOn, id: ThreadId) {
        self.threads[id.index()].wait = on;
        if on.is_prio_ordered() {
            self.with_queue(on, |q, threads| q.insert_by_prio(threads, id));
        } else {
            self.with_queue(on, |q, threads| q.insert_tail(threads, id));
        }
    }

    /// Take the first waiter of `on`
    pub(crate) fn wait_dequeue_head(&mut self, on: WaitOn) -> Option<ThreadId> {
        let id = self.with_queue(on, |q, threads| q.pop_head(threads))?;
        self.threads[id.index()].wait = WaitOn::None;
        Some(id)
    }

    /// Unlink the thread from whatever it waits on
    pub(crate) fn wait_dequeue(&mut self, id: ThreadId) {
        let on = self.threads[id.index()].wait;
        if on != WaitOn::None {
            self.with_queue(on, |q, threads| q.remove(threads, id));
            self.threads[id.index()].wait = WaitOn::None;
        }
    }

    /// Restore the ordering of the thread's wait queue after a priority change
    pub(crate) fn wait_requeue(&mut self, id: ThreadId) {
        let on = self.threads[id.index()].wait;
        if on.is_prio_ordered() {
            self.with_queue(on, |q, threads| {
                q.remove(threads, id);
                q.insert_by_prio(threads, id);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OsPrio;

    fn table(prios: &[OsPrio]) -> [OsThread; 8] {
        let mut threads = [const { OsThread::new() }; 8];
        for (t, &p) in threads.iter_mut().zip(prios) {
            t.prio = p;
        }
        threads
    }

    fn order(q: &ThreadsQueue, threads: &[OsThread]) -> Vec<u8> {
        q.iter(threads).map(|t| t.0).collect()
    }

    #[test]
    fn fifo_and_lifo_inserts() {
        let mut threads = table(&[1; 8]);
        let mut q = ThreadsQueue::new();

        q.insert_tail(&mut threads, ThreadId(0));
        q.insert_tail(&mut threads, ThreadId(1));
        q.insert_head(&mut threads, ThreadId(2));
        assert_eq!(order(&q, &threads), [2, 0, 1]);
        assert!(q.is_consistent(&threads));

        assert_eq!(q.pop_head(&mut threads), Some(ThreadId(2)));
        q.remove(&mut threads, ThreadId(1));
        assert_eq!(order(&q, &threads), [0]);
        assert_eq!(q.tail(), Some(ThreadId(0)));
    }

    #[test]
    fn prio_insert_keeps_fifo_among_equals() {
        let mut threads = table(&[5, 10, 5, 1, 10, 5]);
        let mut q = ThreadsQueue::new();
        for i in 0..6 {
            q.insert_by_prio(&mut threads, ThreadId(i));
        }
        assert_eq!(order(&q, &threads), [1, 4, 0, 2, 5, 3]);
        assert!(q.is_consistent(&threads));
    }

    #[test]
    fn remove_middle_and_ends() {
        let mut threads = table(&[1; 8]);
        let mut q = ThreadsQueue::new();
        for i in 0..4 {
            q.insert_tail(&mut threads, ThreadId(i));
        }
        q.remove(&mut threads, ThreadId(1));
        q.remove(&mut threads, ThreadId(3));
        q.remove(&mut threads, ThreadId(0));
        assert_eq!(order(&q, &threads), [2]);
        assert_eq!(q.head(), q.tail());
        q.remove(&mut threads, ThreadId(2));
        assert!(q.is_empty());
        assert!(q.is_consistent(&threads));
    }
}
