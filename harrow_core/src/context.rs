//! Shared-memory data model.
//!
//! One [`Region`] is mapped before any fork and shared by the
//! orchestrator, the Reaper and every worker. All cross-process fields
//! are independent atomic scalars mutated with CAS; the only lock in
//! the region is the per-pool spinlock.

use crate::pool::{Pool, PoolError};
use crate::res::ResKind;
use crate::sync::cas_once_u32;
use crate::MAX_ARGS;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Worker slots in the shared context array.
pub const MAX_WORKERS: usize = 32;
/// Records in the ad-hoc resource trash ring.
pub const TRASH_CAP: usize = 128;
/// Bytes reserved for the per-slot errno description.
pub const ERR_TEXT_CAP: usize = 64;
/// Bytes reserved for a trash-ring path.
pub const TRASH_PATH_CAP: usize = 128;

/// Slot ownership states below the first valid pid.
pub const SLOT_EMPTY: u32 = 0;
pub const SLOT_INITIALIZING: u32 = 1;

/// Wall clock in milliseconds, the timestamp unit used region-wide.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Process-group-wide state. Created once, destroyed at shutdown.
#[repr(C)]
#[derive(Debug)]
pub struct SharedState {
    stop: AtomicU32,
    pub running_workers: AtomicU32,
    pub total_spawned: AtomicU64,
    pub test_counter: AtomicU64,
    // stats, reported by the orchestrator
    pub crashes: AtomicU64,
    pub hang_kills: AtomicU64,
    pub reforks: AtomicU64,
    pub alarm_fires: AtomicU64,
    pub call_errors: AtomicU64,
    pub prng_mode: AtomicU32,
    pub orchestrator_pid: AtomicI32,
    pub reaper_pid: AtomicI32,
    pub sockserv_pid: AtomicI32,
    pub sockserv_port: AtomicU32,
    pub hang_timeout_ms: AtomicU64,
    pub grace_ms: AtomicU64,
}

impl SharedState {
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire) != 0
    }

    /// CAS so the first requester wins; later requests are no-ops.
    pub fn request_stop(&self) -> bool {
        cas_once_u32(&self.stop, 0, 1)
    }

    #[inline]
    pub fn next_test_id(&self) -> u64 {
        self.test_counter.fetch_add(1, Ordering::AcqRel)
    }
}

/// Per-worker-slot record. Owned exclusively by the claiming worker
/// except `pid` and `last_ts_ms`, which the Reaper reads.
#[repr(C)]
pub struct ChildContext {
    pid: AtomicU32,
    pub syscall_id: AtomicU64,
    pub arg_index: AtomicU32,
    pub arity: AtomicU32,
    pub args: [AtomicU64; MAX_ARGS],
    pub arg_copies: [AtomicU64; MAX_ARGS],
    pub arg_sizes: [AtomicU64; MAX_ARGS],
    pub last_ts_ms: AtomicU64,
    pub last_ret: AtomicI64,
    pub error: AtomicU32,
    pub last_signal: AtomicI32,
    pub needs_alarm: AtomicU32,
    pub iterations: AtomicU64,
    err_len: AtomicU32,
    err_text: UnsafeCell<[u8; ERR_TEXT_CAP]>,
}

unsafe impl Sync for ChildContext {}
unsafe impl Send for ChildContext {}

impl ChildContext {
    #[inline]
    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pid() == SLOT_EMPTY
    }

    /// First half of the claim: EMPTY -> INITIALIZING. Fails against
    /// any non-EMPTY slot.
    pub fn try_claim(&self) -> bool {
        cas_once_u32(&self.pid, SLOT_EMPTY, SLOT_INITIALIZING)
    }

    /// Second half: INITIALIZING -> own pid.
    pub fn commit_claim(&self, pid: u32) -> bool {
        debug_assert!(pid > SLOT_INITIALIZING);
        cas_once_u32(&self.pid, SLOT_INITIALIZING, pid)
    }

    /// pid -> EMPTY, by the owner on clean exit or by the Reaper when
    /// the owner is gone.
    pub fn recycle(&self) {
        self.pid.store(SLOT_EMPTY, Ordering::Release);
    }

    /// Recycle only while the slot still belongs to `pid`; a slot the
    /// owner already recycled itself must not be torn down again.
    pub fn recycle_if_owned(&self, pid: u32) -> bool {
        cas_once_u32(&self.pid, pid, SLOT_EMPTY)
    }

    #[inline]
    pub fn stamp_time(&self) {
        self.last_ts_ms.store(now_ms(), Ordering::Release);
    }

    /// Reset the per-iteration fields before generation.
    pub fn begin_iteration(&self, syscall_id: u64, arity: usize, needs_alarm: bool) {
        self.syscall_id.store(syscall_id, Ordering::Release);
        self.arity.store(arity as u32, Ordering::Release);
        self.arg_index.store(0, Ordering::Release);
        self.needs_alarm
            .store(needs_alarm as u32, Ordering::Release);
        self.error.store(0, Ordering::Release);
        self.last_signal.store(0, Ordering::Release);
        self.err_len.store(0, Ordering::Release);
        for i in 0..MAX_ARGS {
            self.args[i].store(0, Ordering::Release);
            self.arg_copies[i].store(0, Ordering::Release);
            self.arg_sizes[i].store(0, Ordering::Release);
        }
    }

    /// Record a failed invocation outcome. Only the owning worker
    /// writes the text buffer.
    pub fn set_error(&self, text: &str) {
        let bytes = text.as_bytes();
        let n = bytes.len().min(ERR_TEXT_CAP);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), (*self.err_text.get()).as_mut_ptr(), n);
        }
        self.err_len.store(n as u32, Ordering::Release);
        self.error.store(1, Ordering::Release);
    }

    pub fn error_text(&self) -> String {
        let n = (self.err_len.load(Ordering::Acquire) as usize).min(ERR_TEXT_CAP);
        let buf = unsafe { std::slice::from_raw_parts(self.err_text.get() as *const u8, n) };
        String::from_utf8_lossy(buf).into_owned()
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire) != 0
    }
}

const TRASH_NONE: u32 = 0;
const TRASH_BUSY: u32 = 1;
const TRASH_FULL: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrashKind {
    File = 1,
    Dir = 2,
}

/// One stale ad-hoc resource awaiting reclamation.
#[repr(C)]
pub struct TrashEntry {
    state: AtomicU32,
    kind: AtomicU32,
    born_ms: AtomicU64,
    len: AtomicU32,
    path: UnsafeCell<[u8; TRASH_PATH_CAP]>,
}

unsafe impl Sync for TrashEntry {}
unsafe impl Send for TrashEntry {}

/// Fixed ring of ad-hoc (non-pool) resources created by uncached
/// synthesis. Workers push, the Reaper reclaims after a grace period.
#[repr(C)]
pub struct TrashRing {
    entries: [TrashEntry; TRASH_CAP],
}

impl TrashRing {
    /// Record a path for later reclamation. Returns false (and drops
    /// the record) when the ring is full; the path then simply leaks
    /// until shutdown.
    pub fn push(&self, kind: TrashKind, path: &[u8]) -> bool {
        for entry in &self.entries {
            if !cas_once_u32(&entry.state, TRASH_NONE, TRASH_BUSY) {
                continue;
            }
            let n = path.len().min(TRASH_PATH_CAP);
            unsafe {
                std::ptr::copy_nonoverlapping(path.as_ptr(), (*entry.path.get()).as_mut_ptr(), n);
            }
            entry.len.store(n as u32, Ordering::Release);
            entry.kind.store(kind as u32, Ordering::Release);
            entry.born_ms.store(now_ms(), Ordering::Release);
            entry.state.store(TRASH_FULL, Ordering::Release);
            return true;
        }
        false
    }

    /// Claim every record older than `grace_ms` and hand it to `f`.
    pub fn reclaim_stale<F: FnMut(TrashKind, &[u8])>(&self, grace_ms: u64, mut f: F) -> usize {
        let now = now_ms();
        let mut reclaimed = 0;
        for entry in &self.entries {
            if entry.state.load(Ordering::Acquire) != TRASH_FULL {
                continue;
            }
            let born = entry.born_ms.load(Ordering::Acquire);
            if now.saturating_sub(born) < grace_ms {
                continue;
            }
            if !cas_once_u32(&entry.state, TRASH_FULL, TRASH_BUSY) {
                continue;
            }
            let n = (entry.len.load(Ordering::Acquire) as usize).min(TRASH_PATH_CAP);
            let kind = if entry.kind.load(Ordering::Acquire) == TrashKind::Dir as u32 {
                TrashKind::Dir
            } else {
                TrashKind::File
            };
            {
                let path = unsafe { std::slice::from_raw_parts(entry.path.get() as *const u8, n) };
                f(kind, path);
            }
            entry.state.store(TRASH_NONE, Ordering::Release);
            reclaimed += 1;
        }
        reclaimed
    }

    pub fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state.load(Ordering::Acquire) == TRASH_FULL)
            .count()
    }
}

const REGION_MAGIC: u64 = 0x4841_5252_4f57_0001; // "HARROW" + layout version

/// The whole shared mapping, one `repr(C)` struct.
#[repr(C)]
pub struct Region {
    magic: AtomicU64,
    pub state: SharedState,
    pub ctxs: [ChildContext; MAX_WORKERS],
    pub fd_pool: Pool,
    pub sock_pool: Pool,
    pub file_pool: Pool,
    pub dir_pool: Pool,
    pub trash: TrashRing,
}

unsafe impl Sync for Region {}
unsafe impl Send for Region {}

impl Region {
    /// Bytes the shared mapping must provide.
    pub fn required_size() -> usize {
        std::mem::size_of::<Region>()
    }

    /// Reinterpret a zero-filled mapping as a region.
    ///
    /// # Safety
    /// `ptr` must point to at least `required_size()` zero-initialized
    /// bytes with suitable alignment, valid for the region's lifetime.
    pub unsafe fn from_ptr(ptr: *mut u8) -> &'static Region {
        &*(ptr as *const Region)
    }

    /// Heap-backed region for tests and single-process use.
    pub fn new_boxed() -> Box<Region> {
        unsafe { Box::new(std::mem::zeroed()) }
    }

    /// One-time initialization before any fork.
    pub fn init(&self, pool_blocks: usize, hang_timeout_ms: u64, grace_ms: u64) -> Result<(), PoolError> {
        self.fd_pool.init(pool_blocks)?;
        self.sock_pool.init(pool_blocks)?;
        self.file_pool.init(pool_blocks)?;
        self.dir_pool.init(pool_blocks)?;
        self.state
            .hang_timeout_ms
            .store(hang_timeout_ms, Ordering::Release);
        self.state.grace_ms.store(grace_ms, Ordering::Release);
        self.magic.store(REGION_MAGIC, Ordering::Release);
        Ok(())
    }

    pub fn initialized(&self) -> bool {
        self.magic.load(Ordering::Acquire) == REGION_MAGIC
    }

    pub fn pool(&self, kind: ResKind) -> &Pool {
        match kind {
            ResKind::Fd => &self.fd_pool,
            ResKind::Sock => &self.sock_pool,
            ResKind::FilePath => &self.file_pool,
            ResKind::DirPath => &self.dir_pool,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_claim_state_machine() {
        let region = Region::new_boxed();
        let ctx = &region.ctxs[0];
        assert!(ctx.is_empty());
        assert!(ctx.try_claim());
        // claims against a non-EMPTY slot always fail
        assert!(!ctx.try_claim());
        assert!(ctx.commit_claim(4242));
        assert_eq!(ctx.pid(), 4242);
        assert!(!ctx.try_claim());
        assert!(!ctx.commit_claim(4243));
        ctx.recycle();
        assert!(ctx.is_empty());
        assert!(ctx.try_claim());
    }

    #[test]
    fn begin_iteration_clears_state() {
        let region = Region::new_boxed();
        let ctx = &region.ctxs[1];
        ctx.args[0].store(7, Ordering::Release);
        ctx.set_error("EINVAL");
        ctx.begin_iteration(3, 2, true);
        assert_eq!(ctx.args[0].load(Ordering::Acquire), 0);
        assert!(!ctx.has_error());
        assert_eq!(ctx.error_text(), "");
        assert_eq!(ctx.arity.load(Ordering::Acquire), 2);
        assert_eq!(ctx.needs_alarm.load(Ordering::Acquire), 1);
    }

    #[test]
    fn error_text_roundtrip() {
        let region = Region::new_boxed();
        let ctx = &region.ctxs[2];
        ctx.set_error("ENOENT: No such file or directory");
        assert!(ctx.has_error());
        assert_eq!(ctx.error_text(), "ENOENT: No such file or directory");
        let long = "x".repeat(ERR_TEXT_CAP * 2);
        ctx.set_error(&long);
        assert_eq!(ctx.error_text().len(), ERR_TEXT_CAP);
    }

    #[test]
    fn trash_ring_push_reclaim() {
        let region = Region::new_boxed();
        assert!(region.trash.push(TrashKind::File, b"/tmp/harrow-adhoc-1"));
        assert!(region.trash.push(TrashKind::Dir, b"/tmp/harrow-adhoc-d"));
        assert_eq!(region.trash.pending(), 2);
        // nothing is stale yet under a large grace period
        assert_eq!(region.trash.reclaim_stale(60_000, |_, _| {}), 0);
        let mut seen = Vec::new();
        let n = region
            .trash
            .reclaim_stale(0, |kind, path| seen.push((kind, path.to_vec())));
        assert_eq!(n, 2);
        assert_eq!(region.trash.pending(), 0);
        assert!(seen
            .iter()
            .any(|(k, p)| *k == TrashKind::Dir && p == b"/tmp/harrow-adhoc-d"));
    }

    #[test]
    fn region_init_fills_pools() {
        let region = Region::new_boxed();
        assert!(!region.initialized());
        region.init(16, 5000, 3000).unwrap();
        assert!(region.initialized());
        for kind in [ResKind::Fd, ResKind::Sock, ResKind::FilePath, ResKind::DirPath] {
            assert_eq!(region.pool(kind).free_count(), 16);
        }
        assert_eq!(region.state.hang_timeout_ms.load(Ordering::Acquire), 5000);
    }

    #[test]
    fn conditional_recycle_requires_ownership() {
        let region = Region::new_boxed();
        let ctx = &region.ctxs[0];
        ctx.try_claim();
        ctx.commit_claim(4242);
        assert!(!ctx.recycle_if_owned(4243));
        assert_eq!(ctx.pid(), 4242);
        assert!(ctx.recycle_if_owned(4242));
        assert!(ctx.is_empty());
        assert!(!ctx.recycle_if_owned(4242));
    }
}
