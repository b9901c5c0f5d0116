//! Typed payload views over pool blocks.
//!
//! A pool block is raw bytes; a resource context interprets a held
//! block as one concrete resource. Descriptors and sockets store a raw
//! fd, paths store NUL-terminated bytes so they can be handed to the
//! kernel without copying.

use crate::pool::{Pool, BLOCK_DATA};
use std::ffi::CString;

/// What kind of resource a pool carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResKind {
    Fd,
    Sock,
    FilePath,
    DirPath,
}

/// Store a raw descriptor into a held block.
pub fn write_fd(pool: &Pool, idx: u32, fd: i32) {
    pool.write_payload(idx, &fd.to_le_bytes());
}

/// Read the descriptor back out of a held block. A block that was
/// never filled reads as -1.
pub fn read_fd(pool: &Pool, idx: u32) -> i32 {
    let mut buf = [0u8; 4];
    let n = pool.read_payload(idx, &mut buf);
    if n != 4 {
        return -1;
    }
    i32::from_le_bytes(buf)
}

/// Store a path into a held block, NUL terminator included. Paths
/// longer than the block payload are truncated at a byte boundary.
pub fn write_path(pool: &Pool, idx: u32, path: &[u8]) {
    let n = path.len().min(BLOCK_DATA - 1);
    let mut buf = [0u8; BLOCK_DATA];
    buf[..n].copy_from_slice(&path[..n]);
    buf[n] = 0;
    pool.write_payload(idx, &buf[..=n]);
}

/// Read the path out of a held block.
pub fn read_path(pool: &Pool, idx: u32) -> CString {
    let mut buf = [0u8; BLOCK_DATA];
    let n = pool.read_payload(idx, &mut buf);
    let end = buf[..n].iter().position(|&b| b == 0).unwrap_or(n);
    CString::new(&buf[..end]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fd_roundtrip() {
        let pool = Pool::new_boxed();
        pool.init(2).unwrap();
        let idx = pool.acquire().unwrap();
        write_fd(&pool, idx, 17);
        assert_eq!(read_fd(&pool, idx), 17);
        write_fd(&pool, idx, -1);
        assert_eq!(read_fd(&pool, idx), -1);
        pool.release(idx);
    }

    #[test]
    fn path_roundtrip() {
        let pool = Pool::new_boxed();
        pool.init(2).unwrap();
        let idx = pool.acquire().unwrap();
        write_path(&pool, idx, b"/tmp/harrow/file-3");
        assert_eq!(read_path(&pool, idx).as_bytes(), b"/tmp/harrow/file-3");
        pool.release(idx);
    }

    #[test]
    fn long_path_truncates() {
        let pool = Pool::new_boxed();
        pool.init(1).unwrap();
        let idx = pool.acquire().unwrap();
        let long = vec![b'a'; BLOCK_DATA * 2];
        write_path(&pool, idx, &long);
        let got = read_path(&pool, idx);
        assert_eq!(got.as_bytes().len(), BLOCK_DATA - 1);
        pool.release(idx);
    }
}
