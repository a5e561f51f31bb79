//! Locking Primitives
//!
//! Provides:
//! - `SleepLock<T>`: a blocking exclusive lock that may be held across disk
//!   transfers, with an RAII guard
//!
//! Short critical sections (shard lists, the pin count) use `spin::Mutex`
//! directly; this module only adds the long-hold lock the buffer cache
//! needs.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// Give the CPU away while waiting for a lock
#[inline]
fn relax() {
    #[cfg(any(test, feature = "std"))]
    std::thread::yield_now();

    #[cfg(not(any(test, feature = "std")))]
    core::hint::spin_loop();
}

// ============================================================================
// Sleep Lock
// ============================================================================

/// A long-term exclusive lock protecting `T`
///
/// Waiters give up the processor between attempts instead of spinning hot,
/// so a holder may keep the lock for the length of a device transfer.
pub struct SleepLock<T> {
    locked: AtomicBool,
    name: &'static str,
    data: UnsafeCell<T>,
}

impl<T> SleepLock<T> {
    /// Create a new unlocked sleep lock
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            locked: AtomicBool::new(false),
            name,
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, waiting until it is available
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.locked.load(Ordering::Relaxed) {
                relax();
            }
        }
    }

    /// Try to acquire the lock without waiting
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SleepLockGuard { lock: self })
    }

    /// Check if the lock is held
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Lock name, for diagnostics
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> core::fmt::Debug for SleepLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SleepLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

unsafe impl<T: Send> Send for SleepLock<T> {}
unsafe impl<T: Send> Sync for SleepLock<T> {}

/// RAII guard for a sleep lock; dropping it releases the lock
pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
}

impl<'a, T> core::ops::Deref for SleepLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // The guard is the only holder while it lives
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> core::ops::DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
