//! Generators for numeric argument kinds.

use super::{GenCtx, GenError};
use crate::rng::{choose, rand_range, rand_ratio, rand_u64};
use crate::table::ArgSpec;

/// Interesting boundary values, mixed in at low probability by most
/// numeric generators.
const EXTREMES: &[u64] = &[
    0,
    1,
    u8::MAX as u64,
    i16::MAX as u64,
    u16::MAX as u64,
    i32::MAX as u64,
    u32::MAX as u64,
    i64::MAX as u64,
    u64::MAX,
];

/// Length matching the most recent buffer argument, so `(buf, len)`
/// pairs line up. Falls back to a small random size when no buffer
/// preceded this position.
pub fn gen_len(ctx: &mut GenCtx, _spec: &ArgSpec) -> Result<u64, GenError> {
    let len = match ctx.scratch.last_buf_len() {
        Some(len) => len,
        None => rand_range(4096),
    };
    ctx.record_size(std::mem::size_of::<u64>() as u64);
    Ok(len)
}

pub fn gen_mode(ctx: &mut GenCtx, spec: &ArgSpec) -> Result<u64, GenError> {
    let mode = if !spec.values.is_empty() && rand_ratio(4, 5) {
        choose(spec.values).unwrap()
    } else {
        rand_range(0o10000)
    };
    ctx.record_size(std::mem::size_of::<u64>() as u64);
    Ok(mode)
}

/// One candidate value, sometimes two OR-ed together, rarely a wild
/// bit pattern.
pub fn gen_flags(ctx: &mut GenCtx, spec: &ArgSpec) -> Result<u64, GenError> {
    ctx.record_size(std::mem::size_of::<u64>() as u64);
    if spec.values.is_empty() || rand_ratio(1, 20) {
        return Ok(rand_u64());
    }
    let mut flags = choose(spec.values).unwrap();
    if spec.values.len() > 1 && rand_ratio(1, 4) {
        flags |= choose(spec.values).unwrap();
    }
    Ok(flags)
}

/// Own pid most of the time (self-directed calls are harmless and
/// exercise real code paths), otherwise a pid that cannot exist.
pub fn gen_pid(ctx: &mut GenCtx, _spec: &ArgSpec) -> Result<u64, GenError> {
    ctx.record_size(std::mem::size_of::<u64>() as u64);
    if rand_ratio(7, 10) {
        Ok(std::process::id() as u64)
    } else {
        // above PID_MAX_LIMIT, guaranteed ESRCH
        Ok(0x40_0000 + rand_range(0x40_0000))
    }
}

/// Mostly out-of-range signal numbers; the kernel's EINVAL path is the
/// interesting one, and a valid random signal aimed at a random pid
/// would be a footgun.
pub fn gen_signum(ctx: &mut GenCtx, _spec: &ArgSpec) -> Result<u64, GenError> {
    ctx.record_size(std::mem::size_of::<u64>() as u64);
    if rand_ratio(1, 10) {
        Ok(0) // sig 0: existence probe, never delivered
    } else {
        // SIGRTMAX is 64 and deliverable, so start strictly above it
        Ok(65 + rand_range(4096))
    }
}

pub fn gen_offset(ctx: &mut GenCtx, _spec: &ArgSpec) -> Result<u64, GenError> {
    ctx.record_size(std::mem::size_of::<u64>() as u64);
    let off = if rand_ratio(1, 8) {
        choose(EXTREMES).unwrap()
    } else if rand_ratio(1, 2) {
        rand_range(4096)
    } else {
        rand_range(16) * 4096
    };
    Ok(off)
}

/// Raw address-sized value: NULL, near-NULL, or a wild pointer. The
/// kernel should fault these with EFAULT; when it does not, that is a
/// finding.
pub fn gen_address(ctx: &mut GenCtx, _spec: &ArgSpec) -> Result<u64, GenError> {
    ctx.record_size(std::mem::size_of::<u64>() as u64);
    let addr = match rand_range(4) {
        0 => 0,
        1 => rand_range(4096),
        2 => 0xffff_ffff_ffff_0000u64 | rand_range(0xffff),
        _ => rand_u64() & !0x7,
    };
    Ok(addr)
}

pub fn gen_count(ctx: &mut GenCtx, spec: &ArgSpec) -> Result<u64, GenError> {
    ctx.record_size(std::mem::size_of::<u64>() as u64);
    if !spec.values.is_empty() && rand_ratio(9, 10) {
        Ok(choose(spec.values).unwrap())
    } else {
        Ok(rand_range(256))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Region;
    use crate::gen::{NullSynthesizer, Scratch};
    use crate::table::{ArgKind, ArgSpec};

    fn with_ctx<F: FnMut(&mut GenCtx)>(mut f: F) {
        let region = Region::new_boxed();
        region.init(4, 5000, 3000).unwrap();
        let child = &region.ctxs[0];
        child.begin_iteration(0, 1, false);
        let mut scratch = Scratch::new();
        let mut synth = NullSynthesizer;
        let mut ctx = GenCtx {
            region: &region,
            child,
            synth: &mut synth,
            scratch: &mut scratch,
        };
        f(&mut ctx);
    }

    #[test]
    fn len_follows_recorded_buffer() {
        with_ctx(|ctx| {
            ctx.scratch.set_last_buf_len(192);
            let len = gen_len(ctx, &ArgSpec::new(ArgKind::Len)).unwrap();
            assert_eq!(len, 192);
        });
    }

    #[test]
    fn count_prefers_candidates() {
        static VALUES: &[u64] = &[11, 22, 33];
        with_ctx(|ctx| {
            let spec = ArgSpec::with_values(ArgKind::Count, VALUES);
            let mut from_candidates = 0;
            for _ in 0..256 {
                let v = gen_count(ctx, &spec).unwrap();
                if VALUES.contains(&v) {
                    from_candidates += 1;
                }
            }
            assert!(from_candidates > 128);
        });
    }

    #[test]
    fn signum_mostly_invalid() {
        // 64 itself is SIGRTMAX and would be delivered
        with_ctx(|ctx| {
            for _ in 0..128 {
                let v = gen_signum(ctx, &ArgSpec::new(ArgKind::Signum)).unwrap();
                assert!(v == 0 || v > 64, "deliverable signum {}", v);
            }
        });
    }

    #[test]
    fn pid_is_self_or_impossible() {
        with_ctx(|ctx| {
            let own = std::process::id() as u64;
            for _ in 0..128 {
                let v = gen_pid(ctx, &ArgSpec::new(ArgKind::Pid)).unwrap();
                assert!(v == own || v >= 0x40_0000);
            }
        });
    }
}
