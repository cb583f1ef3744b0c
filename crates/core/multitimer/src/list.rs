//! Index-linked lists threaded through the [`Pool`] slots.
//!
//! - [`WaitList`]: pending timers sorted by deadline, earliest first. The
//!   `head` link plays the role of a sentinel node, so insertion and
//!   removal at the front need no special case beyond "previous is the
//!   sentinel".
//! - [`ExpiredQueue`]: deferred timers whose deadline has passed, in the
//!   order the detector found them. Bounded by the pool capacity.
//!
//! Both lists use the slot's single `next` link; a slot is never in both.

use crate::pool::{Pool, SlotId};

/// Points `prev`'s link (or the head when `prev` is the sentinel) at `next`.
fn link<P, const N: usize>(
    head: &mut Option<SlotId>,
    pool: &mut Pool<P, N>,
    prev: Option<SlotId>,
    next: Option<SlotId>,
) {
    match prev {
        None => *head = next,
        Some(id) => pool.set_next(id, next),
    }
}

/// Finds the node before `target`. `Some(None)` means the sentinel.
fn find_prev<P, const N: usize>(
    head: Option<SlotId>,
    pool: &Pool<P, N>,
    target: SlotId,
) -> Option<Option<SlotId>> {
    let mut prev = None;
    let mut cur = head;
    while let Some(id) = cur {
        if id == target {
            return Some(prev);
        }
        prev = Some(id);
        cur = pool.next(id);
    }
    None
}

// ---------------------------------------------------------------------------
// WaitList
// ---------------------------------------------------------------------------

/// Pending timers ordered by ascending deadline.
#[derive(Debug, Default)]
pub struct WaitList {
    head: Option<SlotId>,
    len: usize,
}

impl WaitList {
    /// Creates an empty list.
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Splices `id` in before the first entry whose deadline is not earlier
    /// than its own.
    ///
    /// Among equal deadlines the newest entry therefore comes first.
    pub fn insert<P, const N: usize>(&mut self, pool: &mut Pool<P, N>, id: SlotId) {
        let deadline = pool.deadline(id);
        let mut prev = None;
        let mut cur = self.head;
        while let Some(next) = cur {
            if !pool.deadline(next).is_before(deadline) {
                break;
            }
            prev = Some(next);
            cur = pool.next(next);
        }
        pool.set_next(id, cur);
        link(&mut self.head, pool, prev, Some(id));
        self.len += 1;
    }

    /// Unlinks `id` if it is in the list. Returns `false` otherwise.
    pub fn remove<P, const N: usize>(&mut self, pool: &mut Pool<P, N>, id: SlotId) -> bool {
        let Some(prev) = find_prev(self.head, pool, id) else {
            return false;
        };
        let after = pool.next(id);
        link(&mut self.head, pool, prev, after);
        pool.set_next(id, None);
        self.len -= 1;
        true
    }

    /// Returns the earliest entry.
    pub const fn front(&self) -> Option<SlotId> {
        self.head
    }

    /// Unlinks and returns the earliest entry.
    pub fn pop_front<P, const N: usize>(&mut self, pool: &mut Pool<P, N>) -> Option<SlotId> {
        let id = self.head?;
        self.head = pool.next(id);
        pool.set_next(id, None);
        self.len -= 1;
        Some(id)
    }

    /// Number of entries.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the list is empty.
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Forgets every entry without touching the slots.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Iterates entries front to back.
    pub fn iter<'a, P, const N: usize>(&self, pool: &'a Pool<P, N>) -> Iter<'a, P, N> {
        Iter {
            pool,
            cur: self.head,
        }
    }
}

// ---------------------------------------------------------------------------
// ExpiredQueue
// ---------------------------------------------------------------------------

/// FIFO of expired deferred timers awaiting the deferred runner.
#[derive(Debug, Default)]
pub struct ExpiredQueue {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl ExpiredQueue {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Appends `id` at the back.
    pub fn push_back<P, const N: usize>(&mut self, pool: &mut Pool<P, N>, id: SlotId) {
        pool.set_next(id, None);
        let tail = self.tail;
        link(&mut self.head, pool, tail, Some(id));
        self.tail = Some(id);
        self.len += 1;
    }

    /// Unlinks and returns the oldest entry.
    pub fn pop_front<P, const N: usize>(&mut self, pool: &mut Pool<P, N>) -> Option<SlotId> {
        let id = self.head?;
        self.head = pool.next(id);
        if self.head.is_none() {
            self.tail = None;
        }
        pool.set_next(id, None);
        self.len -= 1;
        Some(id)
    }

    /// Unlinks `id` if it is queued. Returns `false` otherwise.
    pub fn remove<P, const N: usize>(&mut self, pool: &mut Pool<P, N>, id: SlotId) -> bool {
        let Some(prev) = find_prev(self.head, pool, id) else {
            return false;
        };
        let after = pool.next(id);
        link(&mut self.head, pool, prev, after);
        if self.tail == Some(id) {
            self.tail = prev;
        }
        pool.set_next(id, None);
        self.len -= 1;
        true
    }

    /// Number of queued entries.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing is queued.
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Forgets every entry without touching the slots.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Iterates entries oldest first.
    pub fn iter<'a, P, const N: usize>(&self, pool: &'a Pool<P, N>) -> Iter<'a, P, N> {
        Iter {
            pool,
            cur: self.head,
        }
    }
}

/// Iterator over the slot ids of a [`WaitList`] or [`ExpiredQueue`].
pub struct Iter<'a, P, const N: usize> {
    pool: &'a Pool<P, N>,
    cur: Option<SlotId>,
}

impl<P, const N: usize> Iterator for Iter<'_, P, N> {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        let id = self.cur?;
        self.cur = self.pool.next(id);
        Some(id)
    }
}
