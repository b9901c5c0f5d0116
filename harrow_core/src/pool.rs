//! Fixed-capacity shared-memory block pools.
//!
//! A pool is an index-based slab living inside the shared mapping.
//! Every block is on exactly one of the two intrusive lists (free or
//! allocated) at any time; both lists are doubly linked so acquire and
//! release are O(1) splices under one [`SpinLock`].

use crate::sync::SpinLock;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// Blocks per pool. Sizes the shared mapping, so compile-time fixed.
pub const POOL_CAP: usize = 64;
/// Payload bytes per block.
pub const BLOCK_DATA: usize = 256;

const NIL: u32 = u32::MAX;

const STATE_FREE: u32 = 0;
const STATE_ALLOCATED: u32 = 1;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool block count {0} exceeds capacity {cap}", cap = POOL_CAP)]
    TooLarge(usize),
    #[error("pool block count must be non-zero")]
    Empty,
}

#[repr(C)]
pub struct Block {
    next: AtomicU32,
    prev: AtomicU32,
    state: AtomicU32,
    len: AtomicU32,
    data: UnsafeCell<[u8; BLOCK_DATA]>,
}

#[repr(C)]
pub struct Pool {
    lock: SpinLock,
    free_head: AtomicU32,
    alloc_head: AtomicU32,
    free_count: AtomicU32,
    alloc_count: AtomicU32,
    /// Initialized block count, `<= POOL_CAP`.
    count: AtomicU32,
    blocks: [Block; POOL_CAP],
}

// Payload bytes are only touched by the process that currently holds
// the block; list fields only under the lock or as atomics.
unsafe impl Sync for Pool {}
unsafe impl Send for Pool {}

impl Pool {
    /// Heap-allocated zeroed pool, for tests and single-process use.
    /// The shared-memory path zero-fills the mapping instead.
    pub fn new_boxed() -> Box<Pool> {
        // All fields are atomics or plain bytes; zeroed is a valid
        // (uninitialized) pool. `init` must run before first use.
        unsafe { Box::new(std::mem::zeroed()) }
    }

    /// Put `count` blocks on the free list, empty the allocated list.
    /// Only valid while no other process touches the pool.
    pub fn init(&self, count: usize) -> Result<(), PoolError> {
        if count == 0 {
            return Err(PoolError::Empty);
        }
        if count > POOL_CAP {
            return Err(PoolError::TooLarge(count));
        }
        self.lock.reset();
        self.count.store(count as u32, Ordering::Release);
        self.alloc_head.store(NIL, Ordering::Release);
        self.alloc_count.store(0, Ordering::Release);
        for i in 0..count {
            let b = &self.blocks[i];
            b.state.store(STATE_FREE, Ordering::Release);
            b.len.store(0, Ordering::Release);
            b.prev
                .store(if i == 0 { NIL } else { (i - 1) as u32 }, Ordering::Release);
            b.next.store(
                if i + 1 == count { NIL } else { (i + 1) as u32 },
                Ordering::Release,
            );
        }
        self.free_head.store(0, Ordering::Release);
        self.free_count.store(count as u32, Ordering::Release);
        Ok(())
    }

    /// Move the free-list head onto the allocated list. `None` on
    /// exhaustion; callers fall back to on-demand synthesis or defer.
    pub fn acquire(&self) -> Option<u32> {
        let _g = self.lock.lock();
        let idx = self.free_head.load(Ordering::Acquire);
        if idx == NIL {
            return None;
        }
        self.unlink(&self.free_head, idx);
        self.push(&self.alloc_head, idx);
        self.blocks[idx as usize]
            .state
            .store(STATE_ALLOCATED, Ordering::Release);
        self.free_count.fetch_sub(1, Ordering::AcqRel);
        self.alloc_count.fetch_add(1, Ordering::AcqRel);
        Some(idx)
    }

    /// Splice `idx` back onto the free list.
    pub fn release(&self, idx: u32) {
        debug_assert!((idx as usize) < self.count.load(Ordering::Acquire) as usize);
        let _g = self.lock.lock();
        let b = &self.blocks[idx as usize];
        // releasing a free block would corrupt both lists
        debug_assert_eq!(b.state.load(Ordering::Acquire), STATE_ALLOCATED);
        self.unlink(&self.alloc_head, idx);
        self.push(&self.free_head, idx);
        b.state.store(STATE_FREE, Ordering::Release);
        self.alloc_count.fetch_sub(1, Ordering::AcqRel);
        self.free_count.fetch_add(1, Ordering::AcqRel);
    }

    // Both only called under the lock.
    fn unlink(&self, head: &AtomicU32, idx: u32) {
        let b = &self.blocks[idx as usize];
        let prev = b.prev.load(Ordering::Acquire);
        let next = b.next.load(Ordering::Acquire);
        if prev == NIL {
            head.store(next, Ordering::Release);
        } else {
            self.blocks[prev as usize].next.store(next, Ordering::Release);
        }
        if next != NIL {
            self.blocks[next as usize].prev.store(prev, Ordering::Release);
        }
    }

    fn push(&self, head: &AtomicU32, idx: u32) {
        let b = &self.blocks[idx as usize];
        let old = head.load(Ordering::Acquire);
        b.prev.store(NIL, Ordering::Release);
        b.next.store(old, Ordering::Release);
        if old != NIL {
            self.blocks[old as usize].prev.store(idx, Ordering::Release);
        }
        head.store(idx, Ordering::Release);
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_count.load(Ordering::Acquire) as usize
    }

    #[inline]
    pub fn allocated_count(&self) -> usize {
        self.alloc_count.load(Ordering::Acquire) as usize
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.count.load(Ordering::Acquire) as usize
    }

    /// Payload length of `idx`.
    pub fn payload_len(&self, idx: u32) -> usize {
        self.blocks[idx as usize].len.load(Ordering::Acquire) as usize
    }

    pub fn set_payload_len(&self, idx: u32, len: usize) {
        debug_assert!(len <= BLOCK_DATA);
        self.blocks[idx as usize]
            .len
            .store(len as u32, Ordering::Release);
    }

    /// Raw payload pointer of `idx`.
    ///
    /// # Safety
    /// Caller must hold the block (between `acquire` and `release`),
    /// or be the single initializing process.
    pub unsafe fn payload_ptr(&self, idx: u32) -> *mut u8 {
        (*self.blocks[idx as usize].data.get()).as_mut_ptr()
    }

    /// Copy `bytes` into the payload of held block `idx`.
    pub fn write_payload(&self, idx: u32, bytes: &[u8]) {
        let n = bytes.len().min(BLOCK_DATA);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.payload_ptr(idx), n);
        }
        self.set_payload_len(idx, n);
    }

    /// Copy the payload of held block `idx` out.
    pub fn read_payload(&self, idx: u32, out: &mut [u8]) -> usize {
        let n = self.payload_len(idx).min(out.len());
        unsafe {
            std::ptr::copy_nonoverlapping(self.payload_ptr(idx), out.as_mut_ptr(), n);
        }
        n
    }

    /// Snapshot of a list for invariant checks. Takes the lock.
    fn list_snapshot(&self, free: bool) -> Vec<u32> {
        let _g = self.lock.lock();
        let head = if free { &self.free_head } else { &self.alloc_head };
        let mut out = Vec::new();
        let mut cur = head.load(Ordering::Acquire);
        while cur != NIL {
            out.push(cur);
            cur = self.blocks[cur as usize].next.load(Ordering::Acquire);
            if out.len() > POOL_CAP {
                break; // corrupt list, let the assert in the test fire
            }
        }
        out
    }

    pub fn free_list(&self) -> Vec<u32> {
        self.list_snapshot(true)
    }

    pub fn allocated_list(&self) -> Vec<u32> {
        self.list_snapshot(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn init_counts() {
        let pool = Pool::new_boxed();
        for n in [1usize, 2, 17, POOL_CAP] {
            pool.init(n).unwrap();
            assert_eq!(pool.free_count(), n);
            assert_eq!(pool.allocated_count(), 0);
        }
        assert!(pool.init(POOL_CAP + 1).is_err());
        assert!(pool.init(0).is_err());
    }

    #[test]
    fn exhaustion_is_not_an_error() {
        let pool = Pool::new_boxed();
        pool.init(8).unwrap();
        let mut held = Vec::new();
        for _ in 0..8 {
            held.push(pool.acquire().unwrap());
        }
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.allocated_count(), 8);
        assert!(pool.acquire().is_none());
        assert!(pool.acquire().is_none());
        for idx in held {
            pool.release(idx);
        }
        assert_eq!(pool.free_count(), 8);
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn acquire_release_restores() {
        let pool = Pool::new_boxed();
        pool.init(4).unwrap();
        let before: std::collections::BTreeSet<u32> = pool.free_list().into_iter().collect();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b);
        let after: std::collections::BTreeSet<u32> = pool.free_list().into_iter().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn lists_stay_disjoint() {
        let pool = Pool::new_boxed();
        pool.init(16).unwrap();
        let mut held = Vec::new();
        for round in 0..64 {
            if round % 3 != 0 {
                if let Some(idx) = pool.acquire() {
                    held.push(idx);
                }
            } else if let Some(idx) = held.pop() {
                pool.release(idx);
            }
            let free = pool.free_list();
            let alloc = pool.allocated_list();
            assert_eq!(free.len() + alloc.len(), 16);
            for idx in &free {
                assert!(!alloc.contains(idx));
            }
        }
    }

    #[test]
    fn concurrent_acquire_release() {
        let pool: Arc<Pool> = Arc::from(Pool::new_boxed());
        pool.init(POOL_CAP).unwrap();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for _ in 0..5_000 {
                    if let Some(idx) = pool.acquire() {
                        pool.write_payload(idx, &idx.to_le_bytes());
                        pool.release(idx);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.free_count(), POOL_CAP);
        assert_eq!(pool.allocated_count(), 0);
        let free = pool.free_list();
        assert_eq!(free.len(), POOL_CAP);
    }

    #[test]
    fn payload_roundtrip() {
        let pool = Pool::new_boxed();
        pool.init(2).unwrap();
        let idx = pool.acquire().unwrap();
        pool.write_payload(idx, b"/tmp/harrow-res-0");
        let mut buf = [0u8; BLOCK_DATA];
        let n = pool.read_payload(idx, &mut buf);
        assert_eq!(&buf[..n], b"/tmp/harrow-res-0");
        pool.release(idx);
    }
}
