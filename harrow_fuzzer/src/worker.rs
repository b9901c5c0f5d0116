//! The fuzzing worker.
//!
//! Each worker is a forked child running one loop: pick an enabled
//! syscall, generate and mutate its arguments, invoke it raw, record
//! the outcome, release what the iteration acquired. A crash signal
//! during the invocation lands back at the checkpoint captured at the
//! top of the loop, where the iteration is logged as a crash and its
//! resources are cleaned up with the pre-mutation copies.

use crate::checkpoint;
use crate::record::Recorder;
use crate::resource::AdhocSynth;
use crate::{capture_checkpoint, fuzzer_log, worker_info, worker_trace, worker_warn};
use anyhow::Context;
use harrow_core::context::Region;
use harrow_core::gen::{generate_args, release_iteration, GenCtx, Scratch, Synthesizer};
use harrow_core::mutation::mutate_args;
use harrow_core::rng::{reseed, PrngMode};
use harrow_core::table::Table;
use harrow_core::MAX_ARGS;
use std::os::raw::c_long;
use std::path::Path;
use std::sync::atomic::Ordering;

/// Seconds a blocking-prone call may spend in the kernel before the
/// alarm interrupts it.
const ALARM_SECS: u32 = 2;

pub struct Worker {
    pub slot: usize,
    pub region: &'static Region,
    pub table: &'static Table,
    pub recorder: Recorder,
    pub synth: Box<dyn Synthesizer>,
    pub scratch: Scratch,
    /// Stop once the shared test counter reaches this, 0 for never.
    pub max_tests: u64,
    cur_test: u64,
}

impl Worker {
    pub fn new(
        slot: usize,
        region: &'static Region,
        table: &'static Table,
        recorder: Recorder,
        synth: Box<dyn Synthesizer>,
        max_tests: u64,
    ) -> Worker {
        Worker {
            slot,
            region,
            table,
            recorder,
            synth,
            scratch: Scratch::new(),
            max_tests,
            cur_test: 0,
        }
    }

    /// The worker loop. Returns only on stop request or a fatal error;
    /// crashes of the invocations under test are absorbed.
    pub fn run(&mut self) -> anyhow::Result<()> {
        loop {
            if self.region.state.stop_requested() {
                break;
            }
            if self.max_tests != 0
                && self.region.state.test_counter.load(Ordering::Acquire) >= self.max_tests
            {
                self.region.state.request_stop();
                break;
            }
            checkpoint::arm();
            let resumed = capture_checkpoint!();
            if resumed != 0 {
                self.recover(resumed)?;
                continue;
            }
            self.iteration()?;
        }
        checkpoint::disarm();
        Ok(())
    }

    /// One full test: generate, mutate, invoke, record, release.
    pub fn iteration(&mut self) -> anyhow::Result<()> {
        let entry = match self.table.pick_random() {
            Some(e) => e,
            None => {
                worker_warn!("no syscall left enabled, stopping",);
                self.region.state.request_stop();
                return Ok(());
            }
        };
        let child = &self.region.ctxs[self.slot];
        child.begin_iteration(entry.id() as u64, entry.arity(), entry.needs_alarm());
        self.cur_test = self.region.state.next_test_id();

        {
            let mut ctx = GenCtx {
                region: self.region,
                child,
                synth: &mut *self.synth,
                scratch: &mut self.scratch,
            };
            generate_args(&mut ctx, entry)
                .with_context(|| format!("argument generation for {}", entry.name()))?;
        }
        mutate_args(child, entry);

        child.stamp_time();
        if entry.needs_alarm() {
            checkpoint::set_alarm(ALARM_SECS);
        }
        let mut args = [0u64; MAX_ARGS];
        for (i, a) in args.iter_mut().enumerate().take(entry.arity()) {
            *a = child.args[i].load(Ordering::Acquire);
        }
        let ret = unsafe { invoke(entry.nr(), &args[..entry.arity()]) };
        // read errno before anything else touches libc
        let os_err = if ret < 0 {
            Some(std::io::Error::last_os_error())
        } else {
            None
        };
        if entry.needs_alarm() {
            checkpoint::clear_alarm();
            if checkpoint::alarm_fired() {
                self.region.state.alarm_fires.fetch_add(1, Ordering::Relaxed);
                worker_trace!("alarm interrupted {}", entry.name());
            }
        }

        child.last_ret.store(ret, Ordering::Release);
        let err = os_err.map(|e| {
            let text = e.to_string();
            child.set_error(&text);
            self.region.state.call_errors.fetch_add(1, Ordering::Relaxed);
            text
        });
        self.recorder
            .log_test(self.cur_test, entry, child, ret, err.as_deref())
            .context("result log write failed")?;

        child.iterations.fetch_add(1, Ordering::Relaxed);
        child.stamp_time();
        release_iteration(self.region, &mut self.scratch);
        Ok(())
    }

    /// Landing site after a crash signal: the argument arrays and the
    /// pre-mutation copies survived in shared memory, so cleanup and
    /// the crash record both still work.
    fn recover(&mut self, sig: i32) -> anyhow::Result<()> {
        checkpoint::clear_alarm();
        let child = &self.region.ctxs[self.slot];
        child.last_signal.store(sig, Ordering::Release);
        self.region.state.crashes.fetch_add(1, Ordering::Relaxed);

        let entry = self.table.entry(child.syscall_id.load(Ordering::Acquire) as usize);
        worker_warn!("signal {} out of {}, recovering", sig, entry.name());
        self.recorder
            .log_crash(self.cur_test, entry, child, sig)
            .context("crash log write failed")?;

        release_iteration(self.region, &mut self.scratch);
        child.iterations.fetch_add(1, Ordering::Relaxed);
        child.stamp_time();
        Ok(())
    }
}

/// Raw arity-matched invocation. The variadic `syscall(2)` wrapper
/// reads exactly as many register arguments as the call expects, so
/// passing a fixed maximum would hand garbage registers to short
/// calls.
pub unsafe fn invoke(nr: c_long, args: &[u64]) -> i64 {
    let r = match args.len() {
        0 => libc::syscall(nr),
        1 => libc::syscall(nr, args[0]),
        2 => libc::syscall(nr, args[0], args[1]),
        3 => libc::syscall(nr, args[0], args[1], args[2]),
        4 => libc::syscall(nr, args[0], args[1], args[2], args[3]),
        5 => libc::syscall(nr, args[0], args[1], args[2], args[3], args[4]),
        6 => libc::syscall(nr, args[0], args[1], args[2], args[3], args[4], args[5]),
        _ => libc::syscall(
            nr, args[0], args[1], args[2], args[3], args[4], args[5], args[6],
        ),
    };
    r as i64
}

/// Entry point of a forked worker process. Never returns.
pub fn worker_main(
    region: &'static Region,
    table: &'static Table,
    slot: usize,
    output: &Path,
    max_tests: u64,
) -> ! {
    fuzzer_log::set_worker_id(slot as u64);
    let pid = std::process::id();
    if !region.ctxs[slot].commit_claim(pid) {
        worker_warn!("slot claim lost, exiting",);
        std::process::exit(1);
    }
    region.state.running_workers.fetch_add(1, Ordering::AcqRel);
    reseed(PrngMode::from_raw(
        region.state.prng_mode.load(Ordering::Acquire),
    ));

    let status = match worker_setup_and_run(region, table, slot, output, max_tests) {
        Ok(()) => {
            worker_info!("clean exit after stop request",);
            0
        }
        Err(e) => {
            worker_warn!("fatal: {:#}", e);
            1
        }
    };
    region.ctxs[slot].recycle();
    region.state.running_workers.fetch_sub(1, Ordering::AcqRel);
    std::process::exit(status)
}

fn worker_setup_and_run(
    region: &'static Region,
    table: &'static Table,
    slot: usize,
    output: &Path,
    max_tests: u64,
) -> anyhow::Result<()> {
    checkpoint::install_handlers().context("failed to install signal handlers")?;
    let recorder = Recorder::new(output, slot).context("failed to open result log")?;
    let synth = AdhocSynth::new(region, output).context("failed to set up synthesis dir")?;
    let mut worker = Worker::new(slot, region, table, recorder, Box::new(synth), max_tests);
    worker.region.ctxs[slot].stamp_time();
    worker.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use harrow_core::gen::NullSynthesizer;
    use harrow_core::table::{ArgKind, ArgSpec, SyscallDef, Table};
    use std::fs::read_to_string;

    fn leaked_region() -> &'static Region {
        let region = Box::leak(Region::new_boxed());
        region.init(4, 5000, 3000).unwrap();
        region
    }

    fn leaked_table(defs: &'static [SyscallDef]) -> &'static Table {
        Box::leak(Box::new(Table::build(defs).unwrap()))
    }

    fn test_worker(
        region: &'static Region,
        table: &'static Table,
        dir: &std::path::Path,
    ) -> Worker {
        let ctx = &region.ctxs[0];
        ctx.try_claim();
        ctx.commit_claim(std::process::id());
        Worker::new(
            0,
            region,
            table,
            Recorder::new(dir, 0).unwrap(),
            Box::new(NullSynthesizer),
            0,
        )
    }

    static GETPID_DEF: &[SyscallDef] = &[SyscallDef {
        name: "getpid",
        nr: libc::SYS_getpid,
        disabled: false,
        needs_alarm: false,
        needs_root: false,
        args: &[],
    }];

    #[test]
    fn thousand_clean_getpid_iterations() {
        let region = leaked_region();
        let table = leaked_table(GETPID_DEF);
        let dir = std::env::temp_dir().join(format!("harrow-wka-{}", std::process::id()));
        let mut w = test_worker(region, table, &dir);

        for _ in 0..1000 {
            w.iteration().unwrap();
        }
        assert_eq!(w.recorder.logged(), 1000);
        assert_eq!(region.state.crashes.load(Ordering::Relaxed), 0);
        assert_eq!(region.state.call_errors.load(Ordering::Relaxed), 0);
        assert_eq!(
            region.ctxs[0].last_ret.load(Ordering::Relaxed),
            std::process::id() as i64
        );
        let content = read_to_string(dir.join("worker-0.log")).unwrap();
        assert_eq!(content.lines().count(), 1000);
        assert!(content.lines().all(|l| l.contains("getpid()")));
        let _ = std::fs::remove_dir_all(&dir);
    }

    static KILL_DEF: &[SyscallDef] = &[SyscallDef {
        name: "kill",
        nr: libc::SYS_kill,
        disabled: false,
        needs_alarm: false,
        needs_root: false,
        args: &[ArgSpec::new(ArgKind::Pid), ArgSpec::new(ArgKind::Signum)],
    }];

    // pid is self or impossible, signum is 0 or past the last valid
    // signal, so nothing is ever delivered while the EINVAL/ESRCH
    // error paths still light up
    #[test]
    fn kill_iterations_produce_errors_not_signals() {
        let region = leaked_region();
        let table = leaked_table(KILL_DEF);
        let dir = std::env::temp_dir().join(format!("harrow-wkb-{}", std::process::id()));
        let mut w = test_worker(region, table, &dir);

        for _ in 0..200 {
            w.iteration().unwrap();
        }
        assert_eq!(w.recorder.logged(), 200);
        assert_eq!(region.state.crashes.load(Ordering::Relaxed), 0);
        assert!(region.state.call_errors.load(Ordering::Relaxed) > 0);
        // every failed call carries the errno captured at the call site
        let content = read_to_string(dir.join("worker-0.log")).unwrap();
        for line in content.lines().filter(|l| l.contains("= -1")) {
            assert!(line.contains("os error"), "missing errno text: {}", line);
            assert!(!line.contains("os error 0"), "stale errno: {}", line);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    // a faulting invocation lands back at the checkpoint with its
    // signal; recovery logs the crash and the counters keep advancing
    // while the process stays alive
    #[test]
    fn crash_signal_recovers_and_keeps_counting() {
        let region = leaked_region();
        let table = leaked_table(GETPID_DEF);
        let dir = std::env::temp_dir().join(format!("harrow-wkd-{}", std::process::id()));
        let mut w = test_worker(region, table, &dir);
        checkpoint::install_handlers().unwrap();
        let child = &region.ctxs[0];

        for round in 1..=3u64 {
            checkpoint::arm();
            let resumed = capture_checkpoint!();
            if resumed == 0 {
                child.begin_iteration(0, 0, false);
                w.cur_test = region.state.next_test_id();
                unsafe { libc::raise(libc::SIGSEGV) };
                unreachable!("crash handler must jump back to the checkpoint");
            }
            checkpoint::disarm();
            assert_eq!(resumed, libc::SIGSEGV);
            w.recover(resumed).unwrap();
            assert_eq!(region.state.crashes.load(Ordering::Relaxed), round);
            assert_eq!(child.iterations.load(Ordering::Relaxed), round);
        }

        let content = read_to_string(dir.join("worker-0.log")).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content
            .lines()
            .all(|l| l.contains(&format!("CRASH signal {}", libc::SIGSEGV))));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn invoke_matches_arity() {
        let pid = unsafe { invoke(libc::SYS_getpid, &[]) };
        assert_eq!(pid, std::process::id() as i64);
        // bad descriptor through the 3-arg shape
        let ret = unsafe { invoke(libc::SYS_write, &[1_000_000, 0, 0]) };
        assert_eq!(ret, -1);
    }

    #[test]
    fn iteration_restores_pools() {
        let region = leaked_region();
        let table = leaked_table(KILL_DEF);
        let dir = std::env::temp_dir().join(format!("harrow-wkc-{}", std::process::id()));
        let mut w = test_worker(region, table, &dir);
        let free = region.fd_pool.free_count();
        for _ in 0..64 {
            w.iteration().unwrap();
            assert_eq!(region.fd_pool.free_count(), free);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
