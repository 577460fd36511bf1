//! Intrusive thread queues.
//!
//! Every TCB carries one [`Link`]. A thread is linked into at most one
//! [`ThreadQueue`] at a time (a ready-list level or one primitive's wait
//! queue), and the link records that so a double insertion is caught on the
//! spot. Queues only hold head and tail keys; they are `Copy` so that a queue
//! stored inside a TCB can be taken out, edited against the thread arena and
//! written back.

use crate::thread::{ThreadId, Threads};

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Link {
    prev: Option<ThreadId>,
    next: Option<ThreadId>,
    queued: bool,
}

impl Link {
    pub(crate) fn is_queued(&self) -> bool {
        self.queued
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ThreadQueue {
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
    len: usize,
}

impl ThreadQueue {
    pub(crate) const EMPTY: ThreadQueue = ThreadQueue {
        head: None,
        tail: None,
        len: 0,
    };

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn front(&self) -> Option<ThreadId> {
        self.head
    }

    pub(crate) fn push_back(&mut self, threads: &mut Threads, t: ThreadId) {
        self.insert_before(threads, t, None);
    }

    pub(crate) fn push_front(&mut self, threads: &mut Threads, t: ThreadId) {
        let head = self.head;
        self.insert_before(threads, t, head);
    }

    /// Inserts behind every thread of equal or higher effective priority.
    pub(crate) fn insert_by_priority(&mut self, threads: &mut Threads, t: ThreadId) {
        let prio = threads[t].prio;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if threads[c].prio < prio {
                break;
            }
            cursor = threads[c].link.next;
        }
        self.insert_before(threads, t, cursor);
    }

    /// Links `t` in front of `before`, or at the tail when `before` is `None`.
    fn insert_before(&mut self, threads: &mut Threads, t: ThreadId, before: Option<ThreadId>) {
        assert!(
            !threads[t].link.queued,
            "thread {t} is already linked into a queue"
        );
        let prev = match before {
            Some(b) => threads[b].link.prev,
            None => self.tail,
        };
        threads[t].link = Link {
            prev,
            next: before,
            queued: true,
        };
        match prev {
            Some(p) => threads[p].link.next = Some(t),
            None => self.head = Some(t),
        }
        match before {
            Some(b) => threads[b].link.prev = Some(t),
            None => self.tail = Some(t),
        }
        self.len += 1;
    }

    /// Unlinks `t`, which must be a member of this queue.
    pub(crate) fn remove(&mut self, threads: &mut Threads, t: ThreadId) {
        let Link { prev, next, queued } = threads[t].link;
        assert!(queued, "thread {t} is not linked into a queue");
        match prev {
            Some(p) => threads[p].link.next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => threads[n].link.prev = prev,
            None => self.tail = prev,
        }
        threads[t].link = Link::default();
        self.len -= 1;
    }

    pub(crate) fn pop_front(&mut self, threads: &mut Threads) -> Option<ThreadId> {
        let head = self.head?;
        self.remove(threads, head);
        Some(head)
    }

    /// Walks the queue from head to tail.
    pub(crate) fn iter<'a>(&self, threads: &'a Threads) -> impl Iterator<Item = ThreadId> + 'a {
        let mut cursor = self.head;
        let mut budget = self.len;
        core::iter::from_fn(move || {
            let current = cursor?;
            if budget == 0 {
                return None;
            }
            budget -= 1;
            cursor = threads.get(current).and_then(|tcb| tcb.link.next);
            Some(current)
        })
    }

    /// Checks that forward and backward links agree with the stored length.
    pub(crate) fn is_consistent(&self, threads: &Threads) -> bool {
        let mut prev: Option<ThreadId> = None;
        let mut count = 0;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            let Some(tcb) = threads.get(c) else {
                return false;
            };
            if !tcb.link.queued || tcb.link.prev != prev || count >= self.len {
                return false;
            }
            count += 1;
            prev = Some(c);
            cursor = tcb.link.next;
        }
        count == self.len && self.tail == prev
    }
}
