//! The Reaper: hang watchdog and resource garbage collector.
//!
//! A forked sibling of the workers. Each sweep it kills workers whose
//! last-progress timestamp is older than the hang timeout, recycles
//! slots whose owner is gone, and unlinks trash-ring paths past their
//! grace period. A hang-killed worker becomes a zombie until the
//! orchestrator reaps it, so its slot is recycled on a later sweep,
//! once the liveness probe finally reports ESRCH.

use harrow_core::context::{now_ms, Region, TrashKind};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_millis(200);

pub fn reaper_main(region: &Region) -> ! {
    log::info!("reaper: started");
    loop {
        if region.state.stop_requested() {
            kill_all(region);
            std::process::exit(0);
        }
        sweep(region);
        std::thread::sleep(SWEEP_INTERVAL);
    }
}

/// Hang decision, kept free of process state so it can be reasoned
/// about (and tested) on bare numbers. A zero timestamp means the
/// worker has not completed its first stamp yet and is never hung.
pub fn is_hung(now: u64, last_ts: u64, hang_timeout_ms: u64) -> bool {
    last_ts != 0 && now.saturating_sub(last_ts) > hang_timeout_ms
}

fn alive(pid: u32) -> bool {
    // signal 0: existence probe; zombies still count as existing
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

fn sweep(region: &Region) {
    let now = now_ms();
    let hang_ms = region.state.hang_timeout_ms.load(Ordering::Acquire);

    for (slot, ctx) in region.ctxs.iter().enumerate() {
        let pid = ctx.pid();
        if pid <= 1 {
            continue; // EMPTY or INITIALIZING
        }
        if !alive(pid) {
            if ctx.recycle_if_owned(pid) {
                log::info!("reaper: worker-{} (pid {}) gone, recycling slot", slot, pid);
                // the dead worker never reached its own decrement
                let _ = region.state.running_workers.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |v| v.checked_sub(1),
                );
            }
            continue;
        }
        let last = ctx.last_ts_ms.load(Ordering::Acquire);
        if is_hung(now, last, hang_ms) {
            log::warn!(
                "reaper: worker-{} (pid {}) hung for {}ms, killing",
                slot,
                pid,
                now.saturating_sub(last)
            );
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            region.state.hang_kills.fetch_add(1, Ordering::Relaxed);
            // slot recycles once the orchestrator has reaped the corpse
        }
    }

    let grace = region.state.grace_ms.load(Ordering::Acquire);
    let n = region.trash.reclaim_stale(grace, remove_trash);
    if n > 0 {
        log::trace!("reaper: reclaimed {} stale paths", n);
    }
}

fn remove_trash(kind: TrashKind, path: &[u8]) {
    let path = Path::new(std::str::from_utf8(path).unwrap_or(""));
    if path.as_os_str().is_empty() {
        return;
    }
    let res = match kind {
        TrashKind::File => std::fs::remove_file(path),
        TrashKind::Dir => std::fs::remove_dir_all(path),
    };
    if let Err(e) = res {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::trace!("reaper: {}: {}", path.display(), e);
        }
    }
}

/// Final sweep at shutdown: kill every remaining worker.
fn kill_all(region: &Region) {
    for ctx in region.ctxs.iter() {
        let pid = ctx.pid();
        if pid > 1 {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
    // one last reclaim with no grace, nothing is coming back for these
    region.trash.reclaim_stale(0, remove_trash);
    log::info!("reaper: exiting");
}
