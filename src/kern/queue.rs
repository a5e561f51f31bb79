//! Index Queue - Doubly-linked list threaded through a slot arena
//!
//! The queue linkage lives in the objects being queued (one `QueueChain` per
//! arena slot) while the list itself is just a `QueueHead`. Elements are
//! named by their arena index, so an element can be removed in O(1) without
//! knowing its neighbours and can move between queues without allocation.
//!
//! ## Locking
//!
//! A head and the chains of the slots currently on it are protected by the
//! same lock: whoever holds the head mutably (through a lock guard) may
//! read and rewrite those chains. Chains are atomics only so the arena can
//! be shared; they carry no ordering of their own.
//!
//! ## Usage Pattern
//!
//! ```ignore
//! let chains: Vec<QueueChain> = (0..n).map(|_| QueueChain::new()).collect();
//! let mut queue = QueueHead::new();
//! queue.enqueue_head(&chains, 3);
//! for idx in queue.iter(&chains) { /* ... */ }
//! queue.remove(&chains, 3);
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

/// End-of-list marker
const NIL: u32 = u32::MAX;

// ============================================================================
// Queue Chain
// ============================================================================

/// Linkage embedded in each arena slot
#[derive(Debug)]
pub struct QueueChain {
    next: AtomicU32,
    prev: AtomicU32,
}

impl QueueChain {
    /// Create a new unlinked queue chain
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(NIL),
            prev: AtomicU32::new(NIL),
        }
    }

    fn next(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }

    fn prev(&self) -> u32 {
        self.prev.load(Ordering::Relaxed)
    }

    fn set_next(&self, idx: u32) {
        self.next.store(idx, Ordering::Relaxed);
    }

    fn set_prev(&self, idx: u32) {
        self.prev.store(idx, Ordering::Relaxed);
    }

    fn unlink(&self) {
        self.set_next(NIL);
        self.set_prev(NIL);
    }
}

impl Default for QueueChain {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Queue Head
// ============================================================================

/// A queue head; `first` is the most recently inserted element
#[derive(Debug)]
pub struct QueueHead {
    first: u32,
    last: u32,
    len: usize,
}

impl QueueHead {
    /// Create a new empty queue
    pub const fn new() -> Self {
        Self {
            first: NIL,
            last: NIL,
            len: 0,
        }
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements on the queue
    pub fn len(&self) -> usize {
        self.len
    }

    /// Insert `idx` at the head of the queue
    pub fn enqueue_head(&mut self, chains: &[QueueChain], idx: usize) {
        let i = idx as u32;
        let chain = &chains[idx];
        chain.set_prev(NIL);
        chain.set_next(self.first);

        if self.first == NIL {
            self.last = i;
        } else {
            chains[self.first as usize].set_prev(i);
        }
        self.first = i;
        self.len += 1;
    }

    /// Insert `idx` at the tail of the queue
    pub fn enqueue_tail(&mut self, chains: &[QueueChain], idx: usize) {
        let i = idx as u32;
        let chain = &chains[idx];
        chain.set_next(NIL);
        chain.set_prev(self.last);

        if self.last == NIL {
            self.first = i;
        } else {
            chains[self.last as usize].set_next(i);
        }
        self.last = i;
        self.len += 1;
    }

    /// Unlink `idx`, which must be on this queue
    pub fn remove(&mut self, chains: &[QueueChain], idx: usize) {
        let chain = &chains[idx];
        let (prev, next) = (chain.prev(), chain.next());

        if prev == NIL {
            debug_assert_eq!(self.first, idx as u32, "queue: element not on this queue");
            self.first = next;
        } else {
            chains[prev as usize].set_next(next);
        }

        if next == NIL {
            self.last = prev;
        } else {
            chains[next as usize].set_prev(prev);
        }

        chain.unlink();
        self.len -= 1;
    }

    /// Walk the queue from head to tail
    pub fn iter<'a>(&self, chains: &'a [QueueChain]) -> QueueIter<'a> {
        QueueIter {
            chains,
            cursor: self.first,
            backward: false,
        }
    }

    /// Walk the queue from tail to head
    pub fn iter_rev<'a>(&self, chains: &'a [QueueChain]) -> QueueIter<'a> {
        QueueIter {
            chains,
            cursor: self.last,
            backward: true,
        }
    }
}

impl Default for QueueHead {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the indices on a queue
pub struct QueueIter<'a> {
    chains: &'a [QueueChain],
    cursor: u32,
    backward: bool,
}

impl<'a> Iterator for QueueIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cursor == NIL {
            return None;
        }
        let idx = self.cursor as usize;
        self.cursor = if self.backward {
            self.chains[idx].prev()
        } else {
            self.chains[idx].next()
        };
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn chains(n: usize) -> Vec<QueueChain> {
        (0..n).map(|_| QueueChain::new()).collect()
    }

    #[test]
    fn test_enqueue_order() {
        let chains = chains(4);
        let mut q = QueueHead::new();
        assert!(q.is_empty());

        q.enqueue_head(&chains, 0);
        q.enqueue_head(&chains, 1);
        q.enqueue_tail(&chains, 2);

        assert_eq!(q.len(), 3);
        assert_eq!(q.iter(&chains).collect::<Vec<_>>(), [1, 0, 2]);
        assert_eq!(q.iter_rev(&chains).collect::<Vec<_>>(), [2, 0, 1]);
    }

    #[test]
    fn test_remove_anywhere() {
        let chains = chains(4);
        let mut q = QueueHead::new();
        for i in 0..4 {
            q.enqueue_tail(&chains, i);
        }

        q.remove(&chains, 2);
        assert_eq!(q.iter(&chains).collect::<Vec<_>>(), [0, 1, 3]);
        q.remove(&chains, 0);
        assert_eq!(q.iter(&chains).collect::<Vec<_>>(), [1, 3]);
        q.remove(&chains, 3);
        assert_eq!(q.iter(&chains).collect::<Vec<_>>(), [1]);
        q.remove(&chains, 1);
        assert!(q.is_empty());
        assert_eq!(q.iter(&chains).next(), None);
    }

    #[test]
    fn test_move_between_queues() {
        let chains = chains(3);
        let mut a = QueueHead::new();
        let mut b = QueueHead::new();
        for i in 0..3 {
            a.enqueue_tail(&chains, i);
        }

        a.remove(&chains, 1);
        b.enqueue_head(&chains, 1);

        assert_eq!(a.iter(&chains).collect::<Vec<_>>(), [0, 2]);
        assert_eq!(b.iter(&chains).collect::<Vec<_>>(), [1]);
    }
}
