//! Harrow: syscall-level fuzzing engine.

#[macro_use]
pub mod fuzzer_log;
pub mod checkpoint;
pub mod config;
pub mod reaper;
pub mod record;
pub mod resource;
pub mod shm;
pub mod sockserv;
pub mod stats;
pub mod worker;

use crate::config::Config;
use crate::reaper::reaper_main;
use crate::shm::RegionShm;
use crate::sockserv::sockserv_main;
use crate::worker::worker_main;
use anyhow::Context;
use harrow_core::context::Region;
use harrow_core::pool::PoolError;
use harrow_core::table::{build_table, Table};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use shared_memory::ShmemError;
use std::fs::{create_dir_all, read_to_string, File};
use std::io::Write;
use std::os::raw::c_int;
use std::sync::atomic::Ordering;
use std::thread::sleep;
use std::time::{Duration, Instant};
use thiserror::Error;

const REPORT_INTERVAL: Duration = Duration::from_secs(10);
const TOPUP_INTERVAL: Duration = Duration::from_millis(50);
const SOCKSERV_WAIT: Duration = Duration::from_secs(2);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that abort the run before any worker is forked.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no syscall left enabled after filtering")]
    NoCallsEnabled,
    #[error("{0} root-only syscalls enabled but not running as root; rerun as root or disable them")]
    PrivilegedCalls(usize),
    #[error("shared region: {0}")]
    Shm(#[from] ShmemError),
    #[error("resource pool: {0}")]
    Pool(#[from] PoolError),
}

pub fn boot(mut config: Config) -> anyhow::Result<()> {
    config.check().context("config error")?;
    create_dir_all(&config.output).context("failed to create output directory")?;
    config.fixup()?;

    let table = build_table().map_err(|e| anyhow::anyhow!("syscall table: {}", e))?;
    if let Some(path) = config.disabled_calls.as_ref() {
        log::info!("loading disabled calls...");
        let n = apply_disabled_calls(table, path)?;
        log::info!("disabled calls: {}", n);
    }
    check_privileges(table, nix::unistd::geteuid().is_root())?;
    if table.enabled_count() == 0 {
        return Err(SetupError::NoCallsEnabled.into());
    }
    log::info!(
        "syscall table: {} entries, {} enabled",
        table.len(),
        table.enabled_count()
    );

    let shm = RegionShm::create().map_err(SetupError::Shm)?;
    let region = shm.region();
    region
        .init(config.pool_blocks, config.hang_timeout_ms, config.grace_ms)
        .map_err(SetupError::Pool)?;
    region
        .state
        .prng_mode
        .store(config.prng_mode as u32, Ordering::Release);
    region
        .state
        .orchestrator_pid
        .store(std::process::id() as i32, Ordering::Release);

    log::info!("starting sockserv...");
    let sockserv_pid = fork_helper(region, Helper::Sockserv)?;
    region
        .state
        .sockserv_pid
        .store(sockserv_pid.as_raw(), Ordering::Release);
    if !wait_sockserv_port(region) {
        // degraded mode: socket generation falls back to bogus values
        log::warn!("sockserv did not come up, sockets will be bogus");
    }

    log::info!("prefilling resource pools...");
    resource::prefill(region, &config.output).context("failed to prefill pools")?;

    log::info!("starting reaper...");
    let reaper_pid = fork_helper(region, Helper::Reaper)?;
    region
        .state
        .reaper_pid
        .store(reaper_pid.as_raw(), Ordering::Release);

    setup_signal_handler(region);

    log::info!("spawning {} workers...", config.job);
    orchestrate(region, table, &config)?;

    shutdown(region, &config, &[sockserv_pid, reaper_pid])
}

/// Top-up loop: keep `job` workers alive until stop, reaping exited
/// children and reforking into their recycled slots.
fn orchestrate(
    region: &'static Region,
    table: &'static Table,
    config: &Config,
) -> anyhow::Result<()> {
    let mut last_report = Instant::now();
    while !region.state.stop_requested() {
        reap_exited();
        for slot in 0..config.job {
            let ctx = &region.ctxs[slot];
            if ctx.try_claim() {
                spawn_worker(region, table, config, slot)?;
            }
        }
        if config.max_tests != 0
            && region.state.test_counter.load(Ordering::Acquire) >= config.max_tests
        {
            log::info!("test cap reached, stopping");
            region.state.request_stop();
            break;
        }
        if last_report.elapsed() >= REPORT_INTERVAL {
            stats::report(region);
            last_report = Instant::now();
        }
        sleep(TOPUP_INTERVAL);
    }
    Ok(())
}

/// Fork one worker into a slot the caller has already half-claimed.
fn spawn_worker(
    region: &'static Region,
    table: &'static Table,
    config: &Config,
    slot: usize,
) -> anyhow::Result<()> {
    let spawned = region.state.total_spawned.fetch_add(1, Ordering::AcqRel);
    if spawned >= config.job as u64 {
        region.state.reforks.fetch_add(1, Ordering::Relaxed);
    }
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            log::debug!("worker-{} forked as pid {}", slot, child);
            Ok(())
        }
        Ok(ForkResult::Child) => {
            worker_main(region, table, slot, &config.output, config.max_tests)
        }
        Err(e) => {
            region.ctxs[slot].recycle();
            Err(e).context("failed to fork worker")
        }
    }
}

enum Helper {
    Sockserv,
    Reaper,
}

fn fork_helper(region: &'static Region, which: Helper) -> anyhow::Result<Pid> {
    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => match which {
            Helper::Sockserv => sockserv_main(region),
            Helper::Reaper => reaper_main(region),
        },
    }
}

/// Collect every exited child without blocking. Slot recycling is the
/// Reaper's job; reaping here only clears the zombies so its liveness
/// probe can see them as gone.
fn reap_exited() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                log::debug!("child {} exited with {}", pid, code)
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                log::debug!("child {} killed by {}", pid, sig)
            }
            Ok(WaitStatus::StillAlive) => break,
            Ok(_) => {}
            Err(Errno::ECHILD) => break,
            Err(e) => {
                log::warn!("waitpid: {}", e);
                break;
            }
        }
    }
}

fn wait_sockserv_port(region: &Region) -> bool {
    let deadline = Instant::now() + SOCKSERV_WAIT;
    while Instant::now() < deadline {
        if region.state.sockserv_port.load(Ordering::Acquire) != 0 {
            return true;
        }
        sleep(Duration::from_millis(20));
    }
    false
}

/// Disable table entries named in the filter file, one name per line,
/// `#` comments allowed. Unknown names are reported, not fatal.
fn apply_disabled_calls(table: &Table, path: &std::path::Path) -> anyhow::Result<usize> {
    let content = read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut n = 0;
    for line in content.lines() {
        let name = line.trim();
        if name.is_empty() || name.starts_with('#') {
            continue;
        }
        match table.entry_of_name(name) {
            Some(entry) => {
                entry.disable();
                n += 1;
            }
            None => log::warn!("unknown syscall in disable list: {}", name),
        }
    }
    Ok(n)
}

/// A run without root must not carry root-only entries; the caller has
/// to name them in the disable list instead of the engine silently
/// shrinking the table.
fn check_privileges(table: &Table, is_root: bool) -> Result<(), SetupError> {
    if is_root {
        return Ok(());
    }
    let n = table
        .entries()
        .iter()
        .filter(|e| e.enabled() && e.needs_root())
        .count();
    if n > 0 {
        return Err(SetupError::PrivilegedCalls(n));
    }
    Ok(())
}

/// Stop everything, wait for the children, write the final stats.
fn shutdown(region: &'static Region, config: &Config, helpers: &[Pid]) -> anyhow::Result<()> {
    region.state.request_stop();
    log::info!("waiting for children to exit...");

    let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
    let mut forced = false;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                if Instant::now() >= deadline && !forced {
                    forced = true;
                    log::warn!("children lagging, sending SIGKILL");
                    force_kill(region, helpers);
                }
                sleep(Duration::from_millis(50));
            }
            Ok(_) => {}
            Err(Errno::ECHILD) => break,
            Err(e) => {
                log::warn!("waitpid: {}", e);
                break;
            }
        }
    }

    let summary = stats::summary(&region.state);
    let stats_path = config.output.join("stats");
    File::create(&stats_path)
        .and_then(|mut f| f.write_all(summary.as_bytes()))
        .with_context(|| format!("failed to write {}", stats_path.display()))?;
    log::info!("final: {}", stats::report_line(&region.state));
    Ok(())
}

fn force_kill(region: &Region, helpers: &[Pid]) {
    for ctx in region.ctxs.iter() {
        let pid = ctx.pid();
        if pid > 1 {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
    for pid in helpers {
        let _ = kill(*pid, Signal::SIGKILL);
    }
}

fn setup_signal_handler(region: &'static Region) {
    use signal_hook::consts::*;
    use signal_hook::iterator::exfiltrator::WithOrigin;
    use signal_hook::iterator::SignalsInfo;

    fn named_signal(sig: c_int) -> String {
        signal_hook::low_level::signal_name(sig)
            .map(|n| format!("{}({})", n, sig))
            .unwrap_or_else(|| sig.to_string())
    }

    std::thread::spawn(move || {
        let mut signals = match SignalsInfo::<WithOrigin>::new(TERM_SIGNALS) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("signal handler setup failed: {}", e);
                return;
            }
        };
        if let Some(info) = signals.into_iter().next() {
            let from = if let Some(p) = info.process {
                format!("(pid: {}, uid: {})", p.pid, p.uid)
            } else {
                "unknown".to_string()
            };
            log::info!(
                "{} recved, from: {}, cause: {:?}",
                named_signal(info.signal),
                from,
                info.cause
            );
            region.state.request_stop();
        }
    });
}
