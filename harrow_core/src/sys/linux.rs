//! Static syscall descriptors for Linux.
//!
//! OS-specific data, not logic: each entry names the kernel symbol,
//! the argument kinds in declared order and the per-call attributes
//! the engine needs (blocking, root-only, disabled). Entries marked
//! `disabled` stay in the source list for documentation but never
//! reach the compacted table.

use crate::table::ArgKind::*;
use crate::table::{ArgSpec, SyscallDef};

const OPEN_FLAGS: &[u64] = &[
    libc::O_RDONLY as u64,
    libc::O_WRONLY as u64,
    libc::O_RDWR as u64,
    (libc::O_RDWR | libc::O_CREAT) as u64,
    (libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC) as u64,
    (libc::O_RDWR | libc::O_APPEND) as u64,
    (libc::O_RDONLY | libc::O_NONBLOCK) as u64,
    (libc::O_RDONLY | libc::O_CLOEXEC) as u64,
    (libc::O_RDONLY | libc::O_DIRECTORY) as u64,
];

const MODES: &[u64] = &[0o600, 0o644, 0o700, 0o755, 0o777, 0o4755];

const PROT_FLAGS: &[u64] = &[
    libc::PROT_NONE as u64,
    libc::PROT_READ as u64,
    (libc::PROT_READ | libc::PROT_WRITE) as u64,
    (libc::PROT_READ | libc::PROT_EXEC) as u64,
];

// MAP_FIXED excluded: it can clobber the shared mapping every worker
// depends on.
const MAP_FLAGS: &[u64] = &[
    (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS) as u64,
    (libc::MAP_SHARED | libc::MAP_ANONYMOUS) as u64,
    libc::MAP_PRIVATE as u64,
    libc::MAP_SHARED as u64,
];

const WHENCE: &[u64] = &[
    libc::SEEK_SET as u64,
    libc::SEEK_CUR as u64,
    libc::SEEK_END as u64,
    77, // invalid on purpose
];

const AT_FDCWD_ONLY: &[u64] = &[libc::AT_FDCWD as u64];

const AT_FLAGS: &[u64] = &[0, libc::AT_SYMLINK_NOFOLLOW as u64];

const UNLINK_FLAGS: &[u64] = &[0, libc::AT_REMOVEDIR as u64];

const SOCK_DOMAINS: &[u64] = &[
    libc::AF_INET as u64,
    libc::AF_INET6 as u64,
    libc::AF_UNIX as u64,
    libc::AF_NETLINK as u64,
    9999,
];

const SOCK_TYPES: &[u64] = &[
    libc::SOCK_STREAM as u64,
    libc::SOCK_DGRAM as u64,
    (libc::SOCK_STREAM | libc::SOCK_NONBLOCK) as u64,
    libc::SOCK_RAW as u64,
];

const SOCK_PROTOCOLS: &[u64] = &[0, libc::IPPROTO_TCP as u64, libc::IPPROTO_UDP as u64, 255];

const MSG_FLAGS: &[u64] = &[
    libc::MSG_DONTWAIT as u64,
    (libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL) as u64,
    libc::MSG_OOB as u64,
];

const SHUTDOWN_HOW: &[u64] = &[
    libc::SHUT_RD as u64,
    libc::SHUT_WR as u64,
    libc::SHUT_RDWR as u64,
    12,
];

const SOCKOPT_LEVELS: &[u64] = &[
    libc::SOL_SOCKET as u64,
    libc::IPPROTO_TCP as u64,
    libc::IPPROTO_IP as u64,
];

const SOCKOPT_NAMES: &[u64] = &[
    libc::SO_REUSEADDR as u64,
    libc::SO_KEEPALIVE as u64,
    libc::SO_RCVBUF as u64,
    libc::SO_SNDBUF as u64,
    0xdead,
];

const FCNTL_CMDS: &[u64] = &[
    libc::F_GETFL as u64,
    libc::F_SETFL as u64,
    libc::F_GETFD as u64,
    libc::F_DUPFD as u64,
];

const IOCTL_CMDS: &[u64] = &[0x5401, 0x541B, 0x5413, 0xdead_beef];

const FLOCK_OPS: &[u64] = &[
    (libc::LOCK_SH | libc::LOCK_NB) as u64,
    (libc::LOCK_EX | libc::LOCK_NB) as u64,
    libc::LOCK_UN as u64,
    libc::LOCK_EX as u64,
];

const MADVICE: &[u64] = &[
    libc::MADV_NORMAL as u64,
    libc::MADV_RANDOM as u64,
    libc::MADV_DONTNEED as u64,
    libc::MADV_WILLNEED as u64,
];

const CLOCK_IDS: &[u64] = &[
    libc::CLOCK_REALTIME as u64,
    libc::CLOCK_MONOTONIC as u64,
    libc::CLOCK_BOOTTIME as u64,
    9999,
];

const BACKLOGS: &[u64] = &[0, 1, 128, u32::MAX as u64];

const GRND_FLAGS: &[u64] = &[0, libc::GRND_NONBLOCK as u64, 0xff];

const PRIO_WHICH: &[u64] = &[
    libc::PRIO_PROCESS as u64,
    libc::PRIO_PGRP as u64,
    libc::PRIO_USER as u64,
];

const PRIOS: &[u64] = &[0, 10, 19, (-20i64) as u64];

const HIGH_FDS: &[u64] = &[900, 901, 902, 1023];

const FALLOC_MODES: &[u64] = &[0, libc::FALLOC_FL_KEEP_SIZE as u64];

const ZERO: &[u64] = &[0];

macro_rules! def {
    ($name:literal, $nr:expr, [$($arg:expr),* $(,)?]) => {
        def!(@build $name, $nr, [$($arg),*], false, false, false)
    };
    ($name:literal, $nr:expr, [$($arg:expr),* $(,)?], alarm) => {
        def!(@build $name, $nr, [$($arg),*], true, false, false)
    };
    ($name:literal, $nr:expr, [$($arg:expr),* $(,)?], root) => {
        def!(@build $name, $nr, [$($arg),*], false, true, false)
    };
    ($name:literal, $nr:expr, [$($arg:expr),* $(,)?], disabled) => {
        def!(@build $name, $nr, [$($arg),*], false, false, true)
    };
    ($name:literal, $nr:expr, [$($arg:expr),* $(,)?], root, disabled) => {
        def!(@build $name, $nr, [$($arg),*], false, true, true)
    };
    (@build $name:literal, $nr:expr, [$($arg:expr),*], $alarm:expr, $root:expr, $dis:expr) => {
        SyscallDef {
            name: $name,
            nr: $nr,
            disabled: $dis,
            needs_alarm: $alarm,
            needs_root: $root,
            args: &[$($arg),*],
        }
    };
}

pub static SYSCALLS: &[SyscallDef] = &[
    // process identity, all harmless
    def!("getpid", libc::SYS_getpid, []),
    def!("getppid", libc::SYS_getppid, []),
    def!("gettid", libc::SYS_gettid, []),
    def!("getuid", libc::SYS_getuid, []),
    def!("geteuid", libc::SYS_geteuid, []),
    def!("getgid", libc::SYS_getgid, []),
    def!("sched_yield", libc::SYS_sched_yield, []),
    def!("sync", libc::SYS_sync, []),
    // descriptor i/o
    def!(
        "read",
        libc::SYS_read,
        [ArgSpec::new(Fd), ArgSpec::out(OutBuf), ArgSpec::new(Len)]
    ),
    def!(
        "write",
        libc::SYS_write,
        [ArgSpec::new(Fd), ArgSpec::new(InBuf), ArgSpec::new(Len)]
    ),
    def!(
        "pread64",
        libc::SYS_pread64,
        [
            ArgSpec::new(Fd),
            ArgSpec::out(OutBuf),
            ArgSpec::new(Len),
            ArgSpec::new(Offset)
        ]
    ),
    def!(
        "pwrite64",
        libc::SYS_pwrite64,
        [
            ArgSpec::new(Fd),
            ArgSpec::new(InBuf),
            ArgSpec::new(Len),
            ArgSpec::new(Offset)
        ]
    ),
    def!(
        "lseek",
        libc::SYS_lseek,
        [
            ArgSpec::new(Fd),
            ArgSpec::new(Offset),
            ArgSpec::with_values(Count, WHENCE)
        ]
    ),
    def!("dup", libc::SYS_dup, [ArgSpec::new(Fd)]),
    def!(
        "dup3",
        libc::SYS_dup3,
        [
            ArgSpec::new(Fd),
            // high targets so the worker's own log fd survives
            ArgSpec::with_values(Count, HIGH_FDS),
            ArgSpec::with_values(Flags, &[0, libc::O_CLOEXEC as u64])
        ]
    ),
    // closing a pooled descriptor would break the pool for every
    // worker; close stays out of the table.
    def!("close", libc::SYS_close, [ArgSpec::new(Fd)], disabled),
    def!(
        "fstat",
        libc::SYS_fstat,
        [ArgSpec::new(Fd), ArgSpec::out(OutBuf)]
    ),
    def!("fsync", libc::SYS_fsync, [ArgSpec::new(Fd)]),
    def!("fdatasync", libc::SYS_fdatasync, [ArgSpec::new(Fd)]),
    def!(
        "ftruncate",
        libc::SYS_ftruncate,
        [ArgSpec::new(Fd), ArgSpec::new(Offset)]
    ),
    def!(
        "fallocate",
        libc::SYS_fallocate,
        [
            ArgSpec::new(Fd),
            ArgSpec::with_values(Flags, FALLOC_MODES),
            ArgSpec::new(Offset),
            ArgSpec::new(Len)
        ]
    ),
    def!(
        "flock",
        libc::SYS_flock,
        [ArgSpec::new(Fd), ArgSpec::with_values(Count, FLOCK_OPS)],
        alarm
    ),
    def!(
        "fcntl",
        libc::SYS_fcntl,
        [
            ArgSpec::new(Fd),
            ArgSpec::with_values(Count, FCNTL_CMDS),
            ArgSpec::new(Address)
        ]
    ),
    def!(
        "ioctl",
        libc::SYS_ioctl,
        [
            ArgSpec::new(Fd),
            ArgSpec::with_values(Count, IOCTL_CMDS),
            ArgSpec::new(Address)
        ]
    ),
    def!(
        "getdents64",
        libc::SYS_getdents64,
        [ArgSpec::new(Fd), ArgSpec::out(OutBuf), ArgSpec::new(Len)]
    ),
    def!(
        "sendfile",
        libc::SYS_sendfile,
        [
            ArgSpec::new(Fd),
            ArgSpec::new(Fd),
            ArgSpec::new(Address),
            ArgSpec::new(Len)
        ]
    ),
    // path operations
    def!(
        "openat",
        libc::SYS_openat,
        [
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName),
            ArgSpec::with_values(Flags, OPEN_FLAGS),
            ArgSpec::with_values(Mode, MODES)
        ]
    ),
    def!(
        "mkdirat",
        libc::SYS_mkdirat,
        [
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName),
            ArgSpec::with_values(Mode, MODES)
        ]
    ),
    def!(
        "unlinkat",
        libc::SYS_unlinkat,
        [
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName),
            ArgSpec::with_values(Flags, UNLINK_FLAGS)
        ]
    ),
    def!(
        "renameat",
        libc::SYS_renameat,
        [
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName),
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName)
        ]
    ),
    def!(
        "linkat",
        libc::SYS_linkat,
        [
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName),
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName),
            ArgSpec::with_values(Flags, AT_FLAGS)
        ]
    ),
    def!(
        "symlinkat",
        libc::SYS_symlinkat,
        [
            ArgSpec::new(PathName),
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName)
        ]
    ),
    def!(
        "faccessat",
        libc::SYS_faccessat,
        [
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName),
            ArgSpec::with_values(Mode, &[libc::F_OK as u64, libc::R_OK as u64, libc::W_OK as u64]),
            ArgSpec::with_values(Flags, AT_FLAGS)
        ]
    ),
    def!(
        "readlinkat",
        libc::SYS_readlinkat,
        [
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName),
            ArgSpec::out(OutBuf),
            ArgSpec::new(Len)
        ]
    ),
    def!(
        "newfstatat",
        libc::SYS_newfstatat,
        [
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName),
            ArgSpec::out(OutBuf),
            ArgSpec::with_values(Flags, AT_FLAGS)
        ]
    ),
    def!(
        "statfs",
        libc::SYS_statfs,
        [ArgSpec::new(PathName), ArgSpec::out(OutBuf)]
    ),
    def!("chdir", libc::SYS_chdir, [ArgSpec::new(DirPath)]),
    def!("fchdir", libc::SYS_fchdir, [ArgSpec::new(Fd)]),
    def!(
        "fchmod",
        libc::SYS_fchmod,
        [ArgSpec::new(Fd), ArgSpec::with_values(Mode, MODES)]
    ),
    def!(
        "fchmodat",
        libc::SYS_fchmodat,
        [
            ArgSpec::with_values(Count, AT_FDCWD_ONLY),
            ArgSpec::new(PathName),
            ArgSpec::with_values(Mode, MODES)
        ]
    ),
    def!("umask", libc::SYS_umask, [ArgSpec::with_values(Mode, MODES)]),
    // memory
    def!(
        "mmap",
        libc::SYS_mmap,
        [
            ArgSpec::new(Address),
            ArgSpec::new(Len),
            ArgSpec::with_values(Flags, PROT_FLAGS),
            ArgSpec::with_values(Flags, MAP_FLAGS),
            ArgSpec::new(Fd),
            ArgSpec::new(Offset)
        ]
    ),
    // unmapping a random range can take out the shared mapping
    def!(
        "munmap",
        libc::SYS_munmap,
        [ArgSpec::new(Address), ArgSpec::new(Len)],
        disabled
    ),
    def!(
        "mprotect",
        libc::SYS_mprotect,
        [
            ArgSpec::new(Address),
            ArgSpec::new(Len),
            ArgSpec::with_values(Flags, PROT_FLAGS)
        ]
    ),
    def!(
        "madvise",
        libc::SYS_madvise,
        [
            ArgSpec::new(Address),
            ArgSpec::new(Len),
            ArgSpec::with_values(Count, MADVICE)
        ]
    ),
    def!("brk", libc::SYS_brk, [ArgSpec::new(Address)]),
    // sockets
    def!(
        "socket",
        libc::SYS_socket,
        [
            ArgSpec::with_values(Count, SOCK_DOMAINS),
            ArgSpec::with_values(Count, SOCK_TYPES),
            ArgSpec::with_values(Count, SOCK_PROTOCOLS)
        ]
    ),
    def!(
        "connect",
        libc::SYS_connect,
        [ArgSpec::new(Sock), ArgSpec::new(InBuf), ArgSpec::new(Len)],
        alarm
    ),
    def!(
        "bind",
        libc::SYS_bind,
        [ArgSpec::new(Sock), ArgSpec::new(InBuf), ArgSpec::new(Len)]
    ),
    def!(
        "listen",
        libc::SYS_listen,
        [ArgSpec::new(Sock), ArgSpec::with_values(Count, BACKLOGS)]
    ),
    def!(
        "accept4",
        libc::SYS_accept4,
        [
            ArgSpec::new(Sock),
            ArgSpec::out(OutBuf),
            ArgSpec::new(Address),
            ArgSpec::with_values(Flags, &[0, libc::SOCK_NONBLOCK as u64])
        ],
        alarm
    ),
    def!(
        "sendto",
        libc::SYS_sendto,
        [
            ArgSpec::new(Sock),
            ArgSpec::new(InBuf),
            ArgSpec::new(Len),
            ArgSpec::with_values(Flags, MSG_FLAGS),
            ArgSpec::new(Address),
            ArgSpec::with_values(Count, ZERO)
        ]
    ),
    def!(
        "recvfrom",
        libc::SYS_recvfrom,
        [
            ArgSpec::new(Sock),
            ArgSpec::out(OutBuf),
            ArgSpec::new(Len),
            ArgSpec::with_values(Flags, MSG_FLAGS),
            ArgSpec::new(Address),
            ArgSpec::new(Address)
        ],
        alarm
    ),
    def!(
        "shutdown",
        libc::SYS_shutdown,
        [ArgSpec::new(Sock), ArgSpec::with_values(Count, SHUTDOWN_HOW)]
    ),
    def!(
        "setsockopt",
        libc::SYS_setsockopt,
        [
            ArgSpec::new(Sock),
            ArgSpec::with_values(Count, SOCKOPT_LEVELS),
            ArgSpec::with_values(Count, SOCKOPT_NAMES),
            ArgSpec::new(InBuf),
            ArgSpec::new(Len)
        ]
    ),
    def!(
        "getsockopt",
        libc::SYS_getsockopt,
        [
            ArgSpec::new(Sock),
            ArgSpec::with_values(Count, SOCKOPT_LEVELS),
            ArgSpec::with_values(Count, SOCKOPT_NAMES),
            ArgSpec::out(OutBuf),
            ArgSpec::new(Address)
        ]
    ),
    def!(
        "getsockname",
        libc::SYS_getsockname,
        [ArgSpec::new(Sock), ArgSpec::out(OutBuf), ArgSpec::new(Address)]
    ),
    // leaks two descriptors per call, stays out of the table
    def!(
        "pipe2",
        libc::SYS_pipe2,
        [ArgSpec::out(OutBuf), ArgSpec::with_values(Flags, &[0])],
        disabled
    ),
    // misc
    def!(
        "kill",
        libc::SYS_kill,
        [ArgSpec::new(Pid), ArgSpec::new(Signum)]
    ),
    def!(
        "nanosleep",
        libc::SYS_nanosleep,
        [ArgSpec::new(InBuf), ArgSpec::out(OutBuf)],
        alarm
    ),
    def!(
        "clock_gettime",
        libc::SYS_clock_gettime,
        [ArgSpec::with_values(Count, CLOCK_IDS), ArgSpec::out(OutBuf)]
    ),
    def!(
        "getrandom",
        libc::SYS_getrandom,
        [
            ArgSpec::out(OutBuf),
            ArgSpec::new(Len),
            ArgSpec::with_values(Flags, GRND_FLAGS)
        ]
    ),
    def!("uname", libc::SYS_uname, [ArgSpec::out(OutBuf)]),
    def!(
        "getcwd",
        libc::SYS_getcwd,
        [ArgSpec::out(OutBuf), ArgSpec::new(Len)]
    ),
    def!("sysinfo", libc::SYS_sysinfo, [ArgSpec::out(OutBuf)]),
    def!(
        "getpriority",
        libc::SYS_getpriority,
        [ArgSpec::with_values(Count, PRIO_WHICH), ArgSpec::new(Pid)]
    ),
    def!(
        "setpriority",
        libc::SYS_setpriority,
        [
            ArgSpec::with_values(Count, PRIO_WHICH),
            ArgSpec::new(Pid),
            ArgSpec::with_values(Count, PRIOS)
        ]
    ),
    // root-only
    def!("chroot", libc::SYS_chroot, [ArgSpec::new(DirPath)], root),
    def!(
        "reboot",
        libc::SYS_reboot,
        [
            ArgSpec::new(Address),
            ArgSpec::new(Address),
            ArgSpec::new(Count),
            ArgSpec::new(Address)
        ],
        root,
        disabled
    ),
    def!(
        "init_module",
        libc::SYS_init_module,
        [ArgSpec::new(InBuf), ArgSpec::new(Len), ArgSpec::new(InBuf)],
        root,
        disabled
    ),
    // dropping privileges mid-run would poison the whole worker pool
    def!(
        "setuid",
        libc::SYS_setuid,
        [ArgSpec::new(Count)],
        root,
        disabled
    ),
];
