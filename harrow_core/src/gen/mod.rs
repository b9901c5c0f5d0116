//! Per-argument value generation.
//!
//! Each [`ArgKind`] maps to one generator through a fixed dispatch
//! table, the same data-driven shape the syscall table itself uses.
//! Generators record the byte size of what they produced so later
//! length-typed arguments can match an earlier buffer, and draw
//! resource-backed values from the shared pools before falling back to
//! on-demand synthesis.

use crate::context::{ChildContext, Region};
use crate::res::ResKind;
use crate::table::{ArgKind, ArgSpec, TableEntry, ARG_KIND_NUM};
use std::ffi::CString;
use std::sync::atomic::Ordering;
use thiserror::Error;

pub mod buffer;
pub mod int;
pub mod res;

#[derive(Debug, Error)]
pub enum GenError {
    #[error("path contains interior NUL")]
    BadPath(#[from] std::ffi::NulError),
    #[error("resource synthesis failed: {0}")]
    Synthesis(String),
}

/// Where a generated resource came from, so cleanup can hand it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ticket {
    /// A block drawn from one of the shared pools.
    Pool { kind: ResKind, idx: u32 },
    /// A descriptor synthesized for this iteration only.
    AdhocFd(i32),
}

/// Worker-local per-iteration storage. Owns every buffer and string a
/// generator hands to the kernel, so the raw pointers in the argument
/// array stay valid until cleanup.
#[derive(Default)]
pub struct Scratch {
    bufs: Vec<Vec<u8>>,
    strs: Vec<CString>,
    tickets: Vec<Ticket>,
    last_buf_len: Option<u64>,
}

impl Scratch {
    pub fn new() -> Scratch {
        Scratch::default()
    }

    /// Keep a buffer alive for the iteration, returning its address.
    pub fn keep_buf(&mut self, buf: Vec<u8>) -> u64 {
        let addr = buf.as_ptr() as u64;
        self.bufs.push(buf);
        addr
    }

    /// Keep a C string alive for the iteration, returning its address.
    pub fn keep_str(&mut self, s: CString) -> u64 {
        let addr = s.as_ptr() as u64;
        self.strs.push(s);
        addr
    }

    pub fn push_ticket(&mut self, t: Ticket) {
        self.tickets.push(t);
    }

    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    pub fn set_last_buf_len(&mut self, len: u64) {
        self.last_buf_len = Some(len);
    }

    pub fn last_buf_len(&self) -> Option<u64> {
        self.last_buf_len
    }

    pub fn reset(&mut self) {
        self.bufs.clear();
        self.strs.clear();
        self.tickets.clear();
        self.last_buf_len = None;
    }
}

/// On-demand resource synthesis, the uncached counterpart of the
/// pools. Implemented by the fuzzer side; the core only sees the seam.
pub trait Synthesizer {
    fn fresh_fd(&mut self) -> Option<i32>;
    fn fresh_sock(&mut self) -> Option<i32>;
    fn fresh_file_path(&mut self) -> Option<CString>;
    fn fresh_dir_path(&mut self) -> Option<CString>;
}

/// Synthesizer that never produces anything; generators fall back to
/// deliberately-bogus values. Used by tests and dry runs.
pub struct NullSynthesizer;

impl Synthesizer for NullSynthesizer {
    fn fresh_fd(&mut self) -> Option<i32> {
        None
    }
    fn fresh_sock(&mut self) -> Option<i32> {
        None
    }
    fn fresh_file_path(&mut self) -> Option<CString> {
        None
    }
    fn fresh_dir_path(&mut self) -> Option<CString> {
        None
    }
}

/// Everything a generator may touch.
pub struct GenCtx<'a> {
    pub region: &'a Region,
    pub child: &'a ChildContext,
    pub synth: &'a mut dyn Synthesizer,
    pub scratch: &'a mut Scratch,
}

impl GenCtx<'_> {
    /// Record the byte size of the value just generated for the
    /// current argument position.
    pub fn record_size(&self, size: u64) {
        let i = self.child.arg_index.load(Ordering::Acquire) as usize;
        self.child.arg_sizes[i].store(size, Ordering::Release);
    }
}

pub type Generator = fn(&mut GenCtx, &ArgSpec) -> Result<u64, GenError>;

/// Indexed by `ArgKind` discriminant; order must match the enum.
pub const GENERATORS: [Generator; ARG_KIND_NUM] = [
    res::gen_fd,
    res::gen_sock,
    res::gen_file_path,
    res::gen_dir_path,
    buffer::gen_in_buf,
    buffer::gen_out_buf,
    int::gen_len,
    int::gen_mode,
    int::gen_flags,
    int::gen_pid,
    int::gen_signum,
    int::gen_offset,
    int::gen_address,
    int::gen_count,
];

/// Run the entry's generators in declared order, aborting on the first
/// failure. Fills the child's `args`, `arg_copies` and `arg_sizes`
/// arrays; the copies are what cleanup later releases, even if
/// mutation corrupts the working values.
pub fn generate_args(ctx: &mut GenCtx, entry: &TableEntry) -> Result<(), GenError> {
    for (i, spec) in entry.args().iter().enumerate() {
        ctx.child.arg_index.store(i as u32, Ordering::Release);
        let val = GENERATORS[spec.kind as usize](ctx, spec)?;
        ctx.child.args[i].store(val, Ordering::Release);
        ctx.child.arg_copies[i].store(val, Ordering::Release);
    }
    Ok(())
}

/// Release everything the iteration acquired, keyed to the tickets and
/// pre-mutation copies rather than the possibly-mutated live values.
pub fn release_iteration(region: &Region, scratch: &mut Scratch) {
    for t in scratch.tickets() {
        match *t {
            Ticket::Pool { kind, idx } => region.pool(kind).release(idx),
            Ticket::AdhocFd(fd) => unsafe {
                libc::close(fd);
            },
        }
    }
    scratch.reset();
}
