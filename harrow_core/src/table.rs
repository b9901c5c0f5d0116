//! The syscall metadata table.
//!
//! Static per-OS descriptors ([`SyscallDef`]) are compacted once per
//! process into a read-mostly [`Table`]: disabled entries are skipped
//! and survivors renumbered into a contiguous 0-indexed array. After
//! the build only the per-entry `enabled` flag may change.

use crate::{HashMap, MAX_ARGS};
use lazy_static::lazy_static;
use libc::c_long;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Index into the compacted table.
pub type SyscallId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    In,
    Out,
}

/// Declared type of one argument position. Drives both the generator
/// and the mutator dispatch tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Pooled or synthesized file descriptor.
    Fd,
    /// Pooled or synthesized connected socket.
    Sock,
    /// Path to an existing file.
    PathName,
    /// Path to an existing directory.
    DirPath,
    /// Pointer to a filled input buffer.
    InBuf,
    /// Pointer to a writable output buffer.
    OutBuf,
    /// Byte length matching the most recent buffer argument.
    Len,
    /// File mode bits.
    Mode,
    /// Bitmask drawn from the spec's candidate values.
    Flags,
    /// Process id.
    Pid,
    /// Signal number, frequently out of range on purpose.
    Signum,
    /// File offset.
    Offset,
    /// Raw address-sized value.
    Address,
    /// Small count drawn from the spec's candidate values.
    Count,
}

pub const ARG_KIND_NUM: usize = 14;

/// How one argument is rendered in the per-test log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Pointer,
    Path,
    Number,
}

impl ArgKind {
    pub fn log_kind(self) -> LogKind {
        match self {
            ArgKind::InBuf | ArgKind::OutBuf | ArgKind::Address => LogKind::Pointer,
            ArgKind::PathName | ArgKind::DirPath => LogKind::Path,
            _ => LogKind::Number,
        }
    }
}

/// One argument position: kind, direction and, for value-set driven
/// kinds (`Flags`, `Mode`, `Count`), the candidate values.
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub kind: ArgKind,
    pub dir: Dir,
    pub values: &'static [u64],
}

impl ArgSpec {
    pub const fn new(kind: ArgKind) -> ArgSpec {
        ArgSpec {
            kind,
            dir: Dir::In,
            values: &[],
        }
    }

    pub const fn out(kind: ArgKind) -> ArgSpec {
        ArgSpec {
            kind,
            dir: Dir::Out,
            values: &[],
        }
    }

    pub const fn with_values(kind: ArgKind, values: &'static [u64]) -> ArgSpec {
        ArgSpec {
            kind,
            dir: Dir::In,
            values,
        }
    }
}

/// Static per-OS source descriptor, the input of the table build.
#[derive(Debug)]
pub struct SyscallDef {
    pub name: &'static str,
    pub nr: c_long,
    pub disabled: bool,
    pub needs_alarm: bool,
    pub needs_root: bool,
    pub args: &'static [ArgSpec],
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("syscall {0}: {1} args exceeds the {max} arg limit", max = MAX_ARGS)]
    TooManyArgs(&'static str, usize),
    #[error("duplicate syscall name {0}")]
    DuplicateName(&'static str),
    #[error("no enabled syscalls in the static list")]
    AllDisabled,
}

/// One compacted table entry. Immutable after build except `enabled`.
#[derive(Debug)]
pub struct TableEntry {
    id: SyscallId,
    name: Box<str>,
    nr: c_long,
    enabled: AtomicBool,
    needs_alarm: bool,
    needs_root: bool,
    args: Box<[ArgSpec]>,
}

impl TableEntry {
    #[inline(always)]
    pub fn id(&self) -> SyscallId {
        self.id
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn nr(&self) -> c_long {
        self.nr
    }

    #[inline(always)]
    pub fn needs_alarm(&self) -> bool {
        self.needs_alarm
    }

    #[inline(always)]
    pub fn needs_root(&self) -> bool {
        self.needs_root
    }

    #[inline(always)]
    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    /// Invocation shape: how many register arguments this call takes.
    #[inline(always)]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// The only post-build mutation the table supports.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }
}

impl Display for TableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            write!(f, "{:?}", arg.kind)?;
            if i != self.args.len() - 1 {
                write!(f, ", ")?;
            }
        }
        write!(f, ")")
    }
}

#[derive(Debug)]
pub struct Table {
    entries: Vec<TableEntry>,
    name_mapping: HashMap<Box<str>, SyscallId>,
}

impl Table {
    /// Walk `defs`, skip disabled entries and compact the survivors
    /// into a contiguous 0-indexed array.
    pub fn build(defs: &'static [SyscallDef]) -> Result<Table, TableError> {
        let mut entries = Vec::with_capacity(defs.len());
        let mut name_mapping = HashMap::default();
        let mut next_id: SyscallId = 0;
        for def in defs {
            if def.disabled {
                continue;
            }
            if def.args.len() > MAX_ARGS {
                return Err(TableError::TooManyArgs(def.name, def.args.len()));
            }
            if name_mapping
                .insert(def.name.into(), next_id)
                .is_some()
            {
                return Err(TableError::DuplicateName(def.name));
            }
            entries.push(TableEntry {
                id: next_id,
                name: def.name.into(),
                nr: def.nr,
                enabled: AtomicBool::new(true),
                needs_alarm: def.needs_alarm,
                needs_root: def.needs_root,
                args: def.args.to_vec().into_boxed_slice(),
            });
            next_id += 1;
        }
        if entries.is_empty() {
            return Err(TableError::AllDisabled);
        }
        Ok(Table {
            entries,
            name_mapping,
        })
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline(always)]
    pub fn entry(&self, id: SyscallId) -> &TableEntry {
        &self.entries[id]
    }

    #[inline(always)]
    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    pub fn entry_of_name(&self, name: &str) -> Option<&TableEntry> {
        self.name_mapping.get(name).map(|&id| &self.entries[id])
    }

    pub fn enabled_count(&self) -> usize {
        self.entries.iter().filter(|e| e.enabled()).count()
    }

    /// Pick an enabled entry uniformly at random. `None` when every
    /// entry has been disabled at runtime.
    pub fn pick_random(&self) -> Option<&TableEntry> {
        for _ in 0..32 {
            let id = crate::rng::rand_range(self.entries.len() as u64) as usize;
            if self.entries[id].enabled() {
                return Some(&self.entries[id]);
            }
        }
        // nearly everything disabled, fall back to a scan
        let enabled: Vec<&TableEntry> = self.entries.iter().filter(|e| e.enabled()).collect();
        if enabled.is_empty() {
            return None;
        }
        let idx = crate::rng::rand_range(enabled.len() as u64) as usize;
        Some(enabled[idx])
    }
}

lazy_static! {
    static ref TABLE: Result<Table, TableError> = Table::build(crate::sys::linux::SYSCALLS);
}

/// Build (or fetch the cached) per-process table for the host OS.
/// Idempotent: later calls return the same table.
pub fn build_table() -> Result<&'static Table, &'static TableError> {
    TABLE.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_DEFS: &[SyscallDef] = &[
        SyscallDef {
            name: "alpha",
            nr: 1001,
            disabled: false,
            needs_alarm: false,
            needs_root: false,
            args: &[ArgSpec::new(ArgKind::Fd), ArgSpec::new(ArgKind::Len)],
        },
        SyscallDef {
            name: "bravo",
            nr: 1002,
            disabled: true,
            needs_alarm: false,
            needs_root: false,
            args: &[],
        },
        SyscallDef {
            name: "charlie",
            nr: 1003,
            disabled: false,
            needs_alarm: true,
            needs_root: false,
            args: &[ArgSpec::new(ArgKind::PathName)],
        },
    ];

    #[test]
    fn disabled_entries_skipped_and_renumbered() {
        let table = Table::build(TEST_DEFS).unwrap();
        assert_eq!(table.len(), 2);
        for (i, entry) in table.entries().iter().enumerate() {
            assert_eq!(entry.id(), i);
        }
        assert_eq!(table.entry(0).name(), "alpha");
        assert_eq!(table.entry(1).name(), "charlie");
        assert!(table.entry_of_name("bravo").is_none());
    }

    #[test]
    fn build_is_deterministic() {
        let a = Table::build(TEST_DEFS).unwrap();
        let b = Table::build(TEST_DEFS).unwrap();
        assert_eq!(a.len(), b.len());
        for (ea, eb) in a.entries().iter().zip(b.entries().iter()) {
            assert_eq!(ea.name(), eb.name());
            assert_eq!(ea.nr(), eb.nr());
            let ka: Vec<ArgKind> = ea.args().iter().map(|a| a.kind).collect();
            let kb: Vec<ArgKind> = eb.args().iter().map(|a| a.kind).collect();
            assert_eq!(ka, kb);
        }
    }

    #[test]
    fn runtime_disable_excludes_from_pick() {
        let table = Table::build(TEST_DEFS).unwrap();
        table.entry(0).disable();
        for _ in 0..64 {
            let e = table.pick_random().unwrap();
            assert_eq!(e.name(), "charlie");
        }
        table.entry(1).disable();
        assert!(table.pick_random().is_none());
    }

    #[test]
    fn host_table_builds_and_is_cached() {
        let a = build_table().unwrap();
        let b = build_table().unwrap();
        assert!(std::ptr::eq(a, b));
        assert!(a.len() > 0);
        for entry in a.entries() {
            assert!(entry.arity() <= MAX_ARGS);
        }
    }

    #[test]
    fn too_many_args_rejected() {
        static BAD: &[SyscallDef] = &[SyscallDef {
            name: "bad",
            nr: 1,
            disabled: false,
            needs_alarm: false,
            needs_root: false,
            args: &[
                ArgSpec::new(ArgKind::Fd),
                ArgSpec::new(ArgKind::Fd),
                ArgSpec::new(ArgKind::Fd),
                ArgSpec::new(ArgKind::Fd),
                ArgSpec::new(ArgKind::Fd),
                ArgSpec::new(ArgKind::Fd),
                ArgSpec::new(ArgKind::Fd),
                ArgSpec::new(ArgKind::Fd),
            ],
        }];
        assert!(matches!(
            Table::build(BAD),
            Err(TableError::TooManyArgs("bad", 8))
        ));
    }
}
