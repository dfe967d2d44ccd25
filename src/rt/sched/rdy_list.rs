//! Ready list - one thread queue per priority plus the priority bitmap
//!
//! Threads are added to the tail of their priority list (FIFO among
//! equals) or to the head when they were preempted, and scheduled from the
//! head of the highest non-empty list.

use crate::config::CFG_PRIO_MAX;
use crate::prio::PrioTable;
use crate::queue::ThreadsQueue;
use crate::thread::OsThread;
use crate::types::{OsPrio, ThreadId, NOPRIO};

pub struct ReadyList {
    prio_tbl: PrioTable,
    lists: [ThreadsQueue; CFG_PRIO_MAX],
}

impl ReadyList {
    pub const fn new() -> Self {
        ReadyList {
            prio_tbl: PrioTable::new(),
            lists: [ThreadsQueue::new(); CFG_PRIO_MAX],
        }
    }

    pub fn init(&mut self) {
        self.prio_tbl.init();
        for list in self.lists.iter_mut() {
            *list = ThreadsQueue::new();
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.prio_tbl.is_empty()
    }

    /// Priority of the head, `NOPRIO` when nothing is ready
    #[inline]
    pub fn first_prio(&self) -> OsPrio {
        self.prio_tbl.get_highest()
    }

    /// Thread that would be scheduled next
    pub fn first(&self) -> Option<ThreadId> {
        if self.is_empty() {
            return None;
        }
        self.lists[self.first_prio() as usize].head()
    }

    /// Insert behind every thread of higher or equal priority
    pub(crate) fn insert_behind(&mut self, threads: &mut [OsThread], id: ThreadId) {
        let prio = threads[id.index()].prio;
        self.lists[prio as usize].insert_tail(threads, id);
        self.prio_tbl.insert(prio);
    }

    /// Insert ahead of the threads of equal priority
    pub(crate) fn insert_ahead(&mut self, threads: &mut [OsThread], id: ThreadId) {
        let prio = threads[id.index()].prio;
        self.lists[prio as usize].insert_head(threads, id);
        self.prio_tbl.insert(prio);
    }

    /// Unlink a ready thread; its `prio` must still be the one it was queued with
    pub(crate) fn remove(&mut self, threads: &mut [OsThread], id: ThreadId) {
        let prio = threads[id.index()].prio;
        let list = &mut self.lists[prio as usize];
        list.remove(threads, id);
        if list.is_empty() {
            self.prio_tbl.remove(prio);
        }
    }

    /// Remove the highest priority thread, `None` on an empty list
    pub(crate) fn dequeue_highest(&mut self, threads: &mut [OsThread]) -> Option<ThreadId> {
        if self.is_empty() {
            return None;
        }
        let prio = self.prio_tbl.get_highest();
        let list = &mut self.lists[prio as usize];
        let id = list.pop_head(threads);
        if list.is_empty() {
            self.prio_tbl.remove(prio);
        }
        id
    }

    /// Ready threads in scheduling order
    pub fn iter<'a>(&'a self, threads: &'a [OsThread]) -> impl Iterator<Item = ThreadId> + 'a {
        (0..CFG_PRIO_MAX)
            .rev()
            .filter(|&p| self.prio_tbl.is_set(p as OsPrio))
            .flat_map(move |p| self.lists[p].iter(threads))
    }

    /// Every list is well linked, holds threads of its own priority and
    /// agrees with the bitmap
    pub(crate) fn is_consistent(&self, threads: &[OsThread]) -> bool {
        self.lists.iter().enumerate().all(|(p, list)| {
            list.is_consistent(threads)
                && list.is_empty() != self.prio_tbl.is_set(p as OsPrio)
                && list.iter(threads).all(|t| threads[t.index()].prio as usize == p)
        })
    }
}

impl Default for ReadyList {
    fn default() -> Self {
        Self::new()
    }
}
