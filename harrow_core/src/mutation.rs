//! Type-specific argument mutation.
//!
//! Runs between generation and invocation on the child's working
//! argument array. The pre-mutation copies are never touched, so
//! cleanup and logging always see what was actually acquired.
//!
//! Buffer and path mutators write through the argument value as a
//! pointer; they must therefore run before any pointer-perturbing
//! mutation of the same slot, which `mutate_args` guarantees by
//! mutating each slot at most once per iteration.

use crate::context::ChildContext;
use crate::rng::{choose, rand_range, rand_ratio, rand_u64};
use crate::table::{ArgKind, ArgSpec, TableEntry, ARG_KIND_NUM};
use std::sync::atomic::Ordering;

pub type Mutator = fn(val: u64, size: u64, spec: &ArgSpec) -> u64;

/// Indexed by `ArgKind` discriminant; order must match the enum.
pub const MUTATORS: [Mutator; ARG_KIND_NUM] = [
    mut_fd,      // Fd
    mut_fd,      // Sock
    mut_path,    // PathName
    mut_path,    // DirPath
    mut_buf,     // InBuf
    mut_buf,     // OutBuf
    mut_len,     // Len
    mut_bits,    // Mode
    mut_flags,   // Flags
    mut_pid,     // Pid
    mut_signum,  // Signum
    mut_bits,    // Offset
    mut_address, // Address
    mut_bits,    // Count
];

/// Per-kind mutation probability, numerator/denominator. Descriptors
/// mutate less often than sizes, buffers, paths and flags.
pub const MUTATE_CHANCE: [(u32, u32); ARG_KIND_NUM] = [
    (3, 10), // Fd
    (3, 10), // Sock
    (5, 10), // PathName
    (5, 10), // DirPath
    (5, 10), // InBuf
    (5, 10), // OutBuf
    (5, 10), // Len
    (5, 10), // Mode
    (5, 10), // Flags
    (1, 10), // Pid
    (5, 10), // Signum
    (5, 10), // Offset
    (5, 10), // Address
    (3, 10), // Count
];

/// Mutate a random subset of the generated arguments in place.
pub fn mutate_args(child: &ChildContext, entry: &TableEntry) {
    for (i, spec) in entry.args().iter().enumerate() {
        let (num, den) = MUTATE_CHANCE[spec.kind as usize];
        if !rand_ratio(num, den) {
            continue;
        }
        let val = child.args[i].load(Ordering::Acquire);
        let size = child.arg_sizes[i].load(Ordering::Acquire);
        let new = MUTATORS[spec.kind as usize](val, size, spec);
        child.args[i].store(new, Ordering::Release);
    }
}

fn mut_fd(val: u64, _size: u64, _spec: &ArgSpec) -> u64 {
    match rand_range(4) {
        0 => val.wrapping_add(1),
        1 => val.wrapping_sub(1),
        2 => u64::MAX, // -1 as int
        _ => 1_000_000 + rand_range(1_000_000),
    }
}

/// Corrupt the pathname in place, keeping the pointer intact most of
/// the time so the kernel still parses a nearly-valid path.
fn mut_path(val: u64, size: u64, _spec: &ArgSpec) -> u64 {
    if val == 0 || size == 0 {
        return rand_range(4096);
    }
    if rand_ratio(1, 5) {
        // forget the string, hand over garbage
        return match rand_range(3) {
            0 => 0,
            1 => rand_range(4096),
            _ => rand_u64(),
        };
    }
    let pos = rand_range(size) as usize;
    unsafe {
        let p = (val as *mut u8).add(pos);
        if rand_ratio(1, 3) {
            *p = 0; // truncate
        } else {
            *p = *p ^ (1 << rand_range(7)); // keep NUL terminator intact
        }
    }
    val
}

/// Flip bytes inside the buffer; occasionally misalign or drop the
/// pointer itself.
fn mut_buf(val: u64, size: u64, _spec: &ArgSpec) -> u64 {
    if val != 0 && size != 0 && rand_ratio(4, 5) {
        let flips = 1 + rand_range(8);
        for _ in 0..flips {
            let pos = rand_range(size) as usize;
            unsafe {
                let p = (val as *mut u8).add(pos);
                *p ^= 1 << rand_range(8);
            }
        }
        return val;
    }
    match rand_range(3) {
        0 => 0,
        1 => val.wrapping_add(1 + rand_range(7)),
        _ => rand_u64(),
    }
}

fn mut_len(val: u64, _size: u64, _spec: &ArgSpec) -> u64 {
    match rand_range(5) {
        0 => 0,
        1 => val.wrapping_mul(2),
        2 => val.wrapping_add(1),
        3 => i32::MAX as u64,
        _ => u64::MAX,
    }
}

fn mut_bits(val: u64, _size: u64, _spec: &ArgSpec) -> u64 {
    match rand_range(3) {
        0 => val ^ (1 << rand_range(64)),
        1 => !val,
        _ => val.wrapping_add(rand_range(16)),
    }
}

fn mut_flags(val: u64, _size: u64, spec: &ArgSpec) -> u64 {
    if !spec.values.is_empty() && rand_ratio(1, 2) {
        val | choose(spec.values).unwrap()
    } else {
        val ^ (1 << rand_range(32))
    }
}

fn mut_pid(val: u64, _size: u64, _spec: &ArgSpec) -> u64 {
    match rand_range(3) {
        0 => val.wrapping_add(1),
        1 => 0x40_0000 + rand_range(0x40_0000),
        _ => u32::MAX as u64,
    }
}

// never widen into the deliverable signal range: SIGRTMAX is 64, so
// everything produced here is 0 or strictly above it
fn mut_signum(val: u64, _size: u64, _spec: &ArgSpec) -> u64 {
    match rand_range(3) {
        0 => 65 + rand_range(1 << 20),
        1 => u64::MAX,
        _ => val.saturating_add(65),
    }
}

fn mut_address(val: u64, _size: u64, _spec: &ArgSpec) -> u64 {
    match rand_range(4) {
        0 => 0,
        1 => val.wrapping_add(4096),
        2 => val.wrapping_sub(4096),
        _ => rand_u64() & !0x7,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Region;
    use crate::gen::{generate_args, release_iteration, GenCtx, NullSynthesizer, Scratch};
    use crate::table::{SyscallDef, Table};

    static DEFS: &[SyscallDef] = &[SyscallDef {
        name: "write_like",
        nr: 9999,
        disabled: false,
        needs_alarm: false,
        needs_root: false,
        args: &[
            ArgSpec::new(ArgKind::Fd),
            ArgSpec::new(ArgKind::InBuf),
            ArgSpec::new(ArgKind::Len),
        ],
    }];

    #[test]
    fn copies_survive_mutation() {
        let region = Region::new_boxed();
        region.init(8, 5000, 3000).unwrap();
        let table = Table::build(DEFS).unwrap();
        let entry = table.entry(0);
        let child = &region.ctxs[0];
        let mut scratch = Scratch::new();
        let mut synth = NullSynthesizer;

        for _ in 0..128 {
            child.begin_iteration(0, entry.arity(), false);
            let mut ctx = GenCtx {
                region: &region,
                child,
                synth: &mut synth,
                scratch: &mut scratch,
            };
            generate_args(&mut ctx, entry).unwrap();
            let originals: Vec<u64> = (0..entry.arity())
                .map(|i| child.args[i].load(Ordering::Acquire))
                .collect();
            mutate_args(child, entry);
            for (i, orig) in originals.iter().enumerate() {
                assert_eq!(child.arg_copies[i].load(Ordering::Acquire), *orig);
            }
            release_iteration(&region, &mut scratch);
        }
    }

    #[test]
    fn signum_mutation_stays_undeliverable() {
        // 64 is SIGRTMAX and counts as deliverable
        for &start in &[0u64, 65, 100, u64::MAX] {
            for _ in 0..256 {
                let v = mut_signum(start, 8, &ArgSpec::new(ArgKind::Signum));
                assert!(v == 0 || v > 64, "deliverable signum {} from {}", v, start);
            }
        }
    }

    #[test]
    fn len_mutation_hits_boundaries() {
        let mut seen_zero = false;
        let mut seen_max = false;
        for _ in 0..512 {
            match mut_len(100, 8, &ArgSpec::new(ArgKind::Len)) {
                0 => seen_zero = true,
                u64::MAX => seen_max = true,
                _ => {}
            }
        }
        assert!(seen_zero && seen_max);
    }
}
