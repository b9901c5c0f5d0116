//! Generators for resource-backed argument kinds.
//!
//! The cached path draws a pre-built resource from the shared pool;
//! pool exhaustion is not an error and falls through to on-demand
//! synthesis via the [`Synthesizer`] seam. When that fails too, the
//! generator degrades to a deliberately-bogus value, which is still a
//! legitimate fuzz input.

use super::{GenCtx, GenError, Ticket};
use crate::res::{self, ResKind};
use crate::rng::{rand_range, rand_ratio};
use crate::table::ArgSpec;
use std::ffi::CString;

const FD_SIZE: u64 = std::mem::size_of::<i32>() as u64;

/// Descriptors above any real fd table, guaranteed EBADF.
fn bogus_fd() -> u64 {
    1_000_000 + rand_range(1_000_000)
}

fn gen_pooled_fd(ctx: &mut GenCtx, kind: ResKind) -> Result<u64, GenError> {
    ctx.record_size(FD_SIZE);
    // occasionally skip the pool to keep the bogus path exercised
    if rand_ratio(9, 10) {
        if let Some(idx) = ctx.region.pool(kind).acquire() {
            let fd = res::read_fd(ctx.region.pool(kind), idx);
            ctx.scratch.push_ticket(Ticket::Pool { kind, idx });
            if fd >= 0 {
                return Ok(fd as u64);
            }
            return Ok(bogus_fd());
        }
    }
    let fresh = match kind {
        ResKind::Sock => ctx.synth.fresh_sock(),
        _ => ctx.synth.fresh_fd(),
    };
    if let Some(fd) = fresh {
        ctx.scratch.push_ticket(Ticket::AdhocFd(fd));
        return Ok(fd as u64);
    }
    Ok(bogus_fd())
}

pub fn gen_fd(ctx: &mut GenCtx, _spec: &ArgSpec) -> Result<u64, GenError> {
    gen_pooled_fd(ctx, ResKind::Fd)
}

pub fn gen_sock(ctx: &mut GenCtx, _spec: &ArgSpec) -> Result<u64, GenError> {
    gen_pooled_fd(ctx, ResKind::Sock)
}

fn gen_pooled_path(ctx: &mut GenCtx, kind: ResKind) -> Result<u64, GenError> {
    if rand_ratio(9, 10) {
        if let Some(idx) = ctx.region.pool(kind).acquire() {
            let path = res::read_path(ctx.region.pool(kind), idx);
            ctx.scratch.push_ticket(Ticket::Pool { kind, idx });
            if !path.as_bytes().is_empty() {
                let len = path.as_bytes().len() as u64;
                let addr = ctx.scratch.keep_str(path);
                ctx.record_size(len);
                return Ok(addr);
            }
        }
    }
    let fresh = match kind {
        ResKind::DirPath => ctx.synth.fresh_dir_path(),
        _ => ctx.synth.fresh_file_path(),
    };
    let path = match fresh {
        Some(p) => p,
        // nonexistent path: ENOENT from the kernel, not a failure
        None => CString::new(format!("/tmp/harrow-nonesuch-{}", rand_range(u32::MAX as u64)))?,
    };
    let len = path.as_bytes().len() as u64;
    let addr = ctx.scratch.keep_str(path);
    ctx.record_size(len);
    Ok(addr)
}

pub fn gen_file_path(ctx: &mut GenCtx, _spec: &ArgSpec) -> Result<u64, GenError> {
    gen_pooled_path(ctx, ResKind::FilePath)
}

pub fn gen_dir_path(ctx: &mut GenCtx, _spec: &ArgSpec) -> Result<u64, GenError> {
    gen_pooled_path(ctx, ResKind::DirPath)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Region;
    use crate::gen::{NullSynthesizer, Scratch, Synthesizer};
    use crate::table::{ArgKind, ArgSpec};

    #[test]
    fn pooled_fd_comes_with_ticket() {
        let region = Region::new_boxed();
        region.init(4, 5000, 3000).unwrap();
        // prefill the fd pool the way setup does
        for _ in 0..4 {
            let idx = region.fd_pool.acquire().unwrap();
            res::write_fd(&region.fd_pool, idx, 10);
            region.fd_pool.release(idx);
        }
        let child = &region.ctxs[0];
        child.begin_iteration(0, 1, false);
        let mut scratch = Scratch::new();
        let mut synth = NullSynthesizer;
        let mut pool_draws = 0;
        for _ in 0..128 {
            let mut ctx = GenCtx {
                region: &region,
                child,
                synth: &mut synth,
                scratch: &mut scratch,
            };
            let v = gen_fd(&mut ctx, &ArgSpec::new(ArgKind::Fd)).unwrap();
            if v == 10 {
                pool_draws += 1;
                assert!(matches!(
                    scratch.tickets().last(),
                    Some(Ticket::Pool { .. })
                ));
            }
            crate::gen::release_iteration(&region, &mut scratch);
        }
        assert!(pool_draws > 0);
        assert_eq!(region.fd_pool.free_count(), 4);
    }

    struct FixedSynth;
    impl Synthesizer for FixedSynth {
        fn fresh_fd(&mut self) -> Option<i32> {
            None
        }
        fn fresh_sock(&mut self) -> Option<i32> {
            None
        }
        fn fresh_file_path(&mut self) -> Option<CString> {
            Some(CString::new("/tmp/harrow-fresh-file").unwrap())
        }
        fn fresh_dir_path(&mut self) -> Option<CString> {
            Some(CString::new("/tmp/harrow-fresh-dir").unwrap())
        }
    }

    #[test]
    fn empty_pool_falls_back_to_synth() {
        let region = Region::new_boxed();
        region.init(1, 5000, 3000).unwrap();
        // drain the file pool
        let held = region.file_pool.acquire().unwrap();
        let child = &region.ctxs[0];
        child.begin_iteration(0, 1, false);
        let mut scratch = Scratch::new();
        let mut synth = FixedSynth;
        let mut ctx = GenCtx {
            region: &region,
            child,
            synth: &mut synth,
            scratch: &mut scratch,
        };
        let addr = gen_file_path(&mut ctx, &ArgSpec::new(ArgKind::PathName)).unwrap();
        assert_ne!(addr, 0);
        // no pool ticket: the pool had nothing to give
        assert!(scratch
            .tickets()
            .iter()
            .all(|t| !matches!(t, Ticket::Pool { .. })));
        region.file_pool.release(held);
    }
}
