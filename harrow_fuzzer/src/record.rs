//! Per-worker result log and crash records.
//!
//! Every completed invocation becomes one line in the worker's log
//! file; a crash additionally drops a standalone record under
//! `crashes/`. Arguments are rendered by their logging kind: pointers
//! as address plus recorded size, paths decoded from the pre-mutation
//! copy, everything else numerically.

use harrow_core::context::ChildContext;
use harrow_core::table::{LogKind, TableEntry};
use std::fmt::Write as _;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;

pub struct Recorder {
    out: BufWriter<File>,
    crash_dir: PathBuf,
    crash_seq: u64,
    logged: u64,
}

impl Recorder {
    pub fn new(output: &std::path::Path, slot: usize) -> std::io::Result<Recorder> {
        create_dir_all(output)?;
        let crash_dir = output.join("crashes");
        create_dir_all(&crash_dir)?;
        let log_path = output.join(format!("worker-{}.log", slot));
        let f = OpenOptions::new().create(true).append(true).open(log_path)?;
        Ok(Recorder {
            out: BufWriter::new(f),
            crash_dir,
            crash_seq: 0,
            logged: 0,
        })
    }

    pub fn logged(&self) -> u64 {
        self.logged
    }

    /// One line per completed invocation, crashed or not.
    pub fn log_test(
        &mut self,
        test_id: u64,
        entry: &TableEntry,
        child: &ChildContext,
        ret: i64,
        err: Option<&str>,
    ) -> std::io::Result<()> {
        let args = format_args(entry, child);
        match err {
            Some(e) => writeln!(
                self.out,
                "[{}] {}({}) = {} ({})",
                test_id,
                entry.name(),
                args,
                ret,
                e
            )?,
            None => writeln!(self.out, "[{}] {}({}) = {}", test_id, entry.name(), args, ret)?,
        }
        self.out.flush()?;
        self.logged += 1;
        Ok(())
    }

    /// Crash line in the worker log plus a standalone record file.
    pub fn log_crash(
        &mut self,
        test_id: u64,
        entry: &TableEntry,
        child: &ChildContext,
        sig: i32,
    ) -> std::io::Result<()> {
        let args = format_args(entry, child);
        writeln!(
            self.out,
            "[{}] {}({}) = CRASH signal {}",
            test_id,
            entry.name(),
            args,
            sig
        )?;
        self.out.flush()?;
        self.logged += 1;

        self.crash_seq += 1;
        let name = format!(
            "crash-{}-{}-sig{}",
            std::process::id(),
            self.crash_seq,
            sig
        );
        let mut f = File::create(self.crash_dir.join(name))?;
        writeln!(f, "syscall:  {} (nr {})", entry.name(), entry.nr())?;
        writeln!(f, "shape:    {}", entry)?;
        writeln!(f, "signal:   {}", sig)?;
        writeln!(f, "test id:  {}", test_id)?;
        writeln!(f, "args:     {}", args)?;
        let raw: Vec<String> = (0..entry.arity())
            .map(|i| format!("{:#x}", child.args[i].load(Ordering::Acquire)))
            .collect();
        writeln!(f, "raw:      {}", raw.join(", "))?;
        Ok(())
    }
}

/// Render the argument list from the context, one cell per argument.
/// Pointer-valued cells use the pre-mutation copy as the decode source;
/// the live value may have been corrupted into something unreadable.
pub fn format_args(entry: &TableEntry, child: &ChildContext) -> String {
    let mut s = String::new();
    for (i, spec) in entry.args().iter().enumerate() {
        if i > 0 {
            s.push_str(", ");
        }
        let val = child.args[i].load(Ordering::Acquire);
        let copy = child.arg_copies[i].load(Ordering::Acquire);
        let size = child.arg_sizes[i].load(Ordering::Acquire);
        match spec.kind.log_kind() {
            LogKind::Pointer => {
                let _ = write!(s, "ptr:{:#x}/{}", val, size);
            }
            LogKind::Path => {
                let _ = write!(s, "path:{:#x}:\"{}\"", val, decode_path(copy, size));
            }
            LogKind::Number => {
                let _ = write!(s, "{:#x}", val);
            }
        }
    }
    s
}

/// Read a NUL-terminated string back through the copy pointer. The
/// copy always points at memory this process owns (scratch arena or a
/// pool payload), bounded by the recorded size.
fn decode_path(copy: u64, size: u64) -> String {
    if copy == 0 || size == 0 || size > 4096 {
        return String::new();
    }
    let bytes = unsafe { std::slice::from_raw_parts(copy as *const u8, size as usize) };
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
