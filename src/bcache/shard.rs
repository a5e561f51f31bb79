//! Cache shards
//!
//! Shard `i` owns the buffers whose block number is `i` modulo the shard
//! count, plus any unreferenced buffers parked on its list. The lock guards
//! the list and the identity and reference count of every slot on it.
//!
//! No code path holds two shard locks at once: a buffer moving between
//! shards is unlinked under the old shard's lock, which is dropped before
//! the new shard's lock is taken. This is the cache's deadlock-avoidance
//! rule.

use spin::{Mutex, MutexGuard};

use crate::kern::queue::QueueHead;

/// One lock-partitioned list of buffers
#[derive(Debug)]
pub(super) struct Shard {
    list: Mutex<QueueHead>,
}

impl Shard {
    pub(super) const fn new() -> Self {
        Self {
            list: Mutex::new(QueueHead::new()),
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, QueueHead> {
        self.list.lock()
    }
}
