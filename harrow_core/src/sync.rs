//! Cross-process concurrency primitives.
//!
//! Everything here operates on atomics embedded in the shared mapping,
//! so all operations must stay lock-free or spin-only: a process that
//! sleeps (or dies) while holding a pool lock would wedge every other
//! pool consumer for the rest of the run.

use std::sync::atomic::{AtomicU32, Ordering};

/// Single CAS attempt, used for ownership transitions where losing the
/// race means backing off instead of retrying.
#[inline]
pub fn cas_once_u32(cell: &AtomicU32, expect: u32, new: u32) -> bool {
    cell.compare_exchange(expect, new, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Spin-only mutual exclusion for the pool list splices.
///
/// Critical sections under this lock are a handful of index writes;
/// holders must never perform syscalls or anything that can block.
#[repr(C)]
pub struct SpinLock {
    state: AtomicU32,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    /// Reset to unlocked, regardless of previous state. Only valid
    /// while no other process can touch the lock (region init).
    pub fn reset(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }

    pub fn lock(&self) -> SpinGuard<'_> {
        loop {
            if self
                .state
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return SpinGuard { lock: self };
            }
            while self.state.load(Ordering::Relaxed) == LOCKED {
                std::hint::spin_loop();
            }
        }
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.store(UNLOCKED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn cas_once_only_from_expected() {
        let c = AtomicU32::new(0);
        assert!(cas_once_u32(&c, 0, 5));
        assert!(!cas_once_u32(&c, 0, 6));
        assert_eq!(c.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn spinlock_excludes() {
        let lock = Arc::new(SpinLock::new());
        let counter = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    let _g = lock.lock();
                    // non-atomic rmw under the lock
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 40_000);
    }
}
