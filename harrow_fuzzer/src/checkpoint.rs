//! Crash-recovery checkpoint.
//!
//! A worker captures a resumable control-flow point at the top of
//! every loop iteration; the crash-signal handler records the signal
//! and jumps straight back there, skipping normal unwinding. The
//! checkpoint must be re-captured each iteration so a clean iteration
//! resumes forward instead of replaying.
//!
//! glibc does not export `sigsetjmp` as a symbol, the callable entry
//! point is `__sigsetjmp`; `siglongjmp` restores the signal mask saved
//! at capture, which also unblocks the signal we are jumping out of.

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

/// Opaque, oversized storage for a platform `sigjmp_buf`.
#[repr(C)]
#[repr(align(16))]
pub struct SigJmpBuf {
    buf: [u64; 128],
}

extern "C" {
    #[link_name = "__sigsetjmp"]
    pub fn sigsetjmp_raw(env: *mut SigJmpBuf, savemask: c_int) -> c_int;
    fn siglongjmp(env: *mut SigJmpBuf, val: c_int) -> !;
}

static mut CHECKPOINT: SigJmpBuf = SigJmpBuf { buf: [0; 128] };
static ARMED: AtomicBool = AtomicBool::new(false);
static ALARM_FIRED: AtomicBool = AtomicBool::new(false);

/// Signals treated as a crash of the invocation under test.
pub const CRASH_SIGNALS: &[Signal] = &[
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGSYS,
    Signal::SIGTRAP,
];

/// Capture the checkpoint in the calling frame.
///
/// Must be a macro: the `sigsetjmp` call has to live in a frame that
/// stays alive until the matching jump, so hiding it inside a helper
/// function would hand the handler a dead frame. Expands to 0 on
/// capture and the crash signal number when resumed from the handler.
#[macro_export]
macro_rules! capture_checkpoint {
    () => {
        unsafe { $crate::checkpoint::sigsetjmp_raw($crate::checkpoint::checkpoint_buf(), 1) }
    };
}

#[doc(hidden)]
pub fn checkpoint_buf() -> *mut SigJmpBuf {
    unsafe { std::ptr::addr_of_mut!(CHECKPOINT) }
}

/// Allow the crash handler to jump. Call right before capturing.
pub fn arm() {
    ARMED.store(true, Ordering::Release);
}

/// Forbid jumping, for the stretches where no checkpoint is valid.
pub fn disarm() {
    ARMED.store(false, Ordering::Release);
}

pub fn alarm_fired() -> bool {
    ALARM_FIRED.swap(false, Ordering::AcqRel)
}

extern "C" fn crash_handler(sig: c_int) {
    if ARMED.swap(false, Ordering::AcqRel) {
        // the signal number rides back as the capture's return value
        unsafe { siglongjmp(checkpoint_buf(), sig) }
    }
    // crash outside an armed stretch: nothing to resume to
    unsafe { libc::_exit(128 + sig) }
}

extern "C" fn alarm_handler(_sig: c_int) {
    // plain return: the blocked syscall comes back with EINTR
    ALARM_FIRED.store(true, Ordering::Release);
}

/// Install the crash and alarm handlers for a freshly forked worker.
pub fn install_handlers() -> nix::Result<()> {
    let crash = SigAction::new(
        SigHandler::Handler(crash_handler),
        // no SA_RESTART anywhere: interrupted calls must return
        SaFlags::SA_NODEFER,
        SigSet::empty(),
    );
    for sig in CRASH_SIGNALS {
        unsafe { sigaction(*sig, &crash)? };
    }
    let alarm = SigAction::new(
        SigHandler::Handler(alarm_handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGALRM, &alarm)? };
    Ok(())
}

/// Arm the wall-clock alarm around a potentially blocking invocation.
pub fn set_alarm(secs: u32) {
    unsafe {
        libc::alarm(secs);
    }
}

pub fn clear_alarm() {
    unsafe {
        libc::alarm(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // the armed flag and the jump path are exercised end-to-end by the
    // worker's crash-recovery test; only the local pieces live here

    #[test]
    fn capture_returns_zero_without_jump() {
        let r = capture_checkpoint!();
        assert_eq!(r, 0);
    }

    #[test]
    fn alarm_flag_is_one_shot() {
        ALARM_FIRED.store(true, Ordering::Release);
        assert!(alarm_fired());
        assert!(!alarm_fired());
    }
}
