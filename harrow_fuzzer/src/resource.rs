//! Resource prefill and on-demand synthesis.
//!
//! The pools are filled once by the orchestrator before any fork, so
//! every worker inherits the pooled descriptors. On-demand synthesis
//! runs inside the workers; every ad-hoc path is pushed to the trash
//! ring at creation so the Reaper can reclaim it later.

use anyhow::Context;
use harrow_core::context::{Region, TrashKind};
use harrow_core::gen::Synthesizer;
use harrow_core::res::{self, ResKind};
use std::ffi::CString;
use std::fs::{create_dir_all, File};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

fn sockserv_addr(region: &Region) -> Option<SocketAddr> {
    let port = region.state.sockserv_port.load(Ordering::Acquire);
    if port == 0 {
        return None;
    }
    Some(SocketAddr::from(([127, 0, 0, 1], port as u16)))
}

fn connect_sockserv(region: &Region) -> Option<i32> {
    let addr = sockserv_addr(region)?;
    match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
        Ok(stream) => Some(stream.into_raw_fd()),
        Err(e) => {
            log::warn!("socket synthesis: connect: {}", e);
            None
        }
    }
}

/// Fill every free block of every pool with a live resource. Runs in
/// the orchestrator before the first fork.
pub fn prefill(region: &Region, output: &Path) -> anyhow::Result<()> {
    let res_dir = output.join("res");
    create_dir_all(&res_dir).context("failed to create resource dir")?;

    fill_pool(region, ResKind::Fd, |i| {
        let path = res_dir.join(format!("file-{}", i));
        let f = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(PoolItem::Fd(f.into_raw_fd()))
    })?;

    fill_pool(region, ResKind::Sock, |_| match connect_sockserv(region) {
        Some(fd) => Ok(PoolItem::Fd(fd)),
        // no sockserv: pool stays partially bogus, generation degrades
        None => Ok(PoolItem::Fd(-1)),
    })?;

    fill_pool(region, ResKind::FilePath, |i| {
        let path = res_dir.join(format!("pfile-{}", i));
        File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(PoolItem::Path(path))
    })?;

    fill_pool(region, ResKind::DirPath, |i| {
        let path = res_dir.join(format!("pdir-{}", i));
        create_dir_all(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(PoolItem::Path(path))
    })?;

    log::info!(
        "pools prefilled: {} blocks each",
        region.fd_pool.block_count()
    );
    Ok(())
}

enum PoolItem {
    Fd(i32),
    Path(PathBuf),
}

/// Write one item into every block. Acquire-all then release-all keeps
/// each block visited exactly once.
fn fill_pool<F>(region: &Region, kind: ResKind, mut make: F) -> anyhow::Result<()>
where
    F: FnMut(usize) -> anyhow::Result<PoolItem>,
{
    let pool = region.pool(kind);
    let mut held = Vec::with_capacity(pool.block_count());
    while let Some(idx) = pool.acquire() {
        held.push(idx);
    }
    for (i, idx) in held.iter().enumerate() {
        match make(i)? {
            PoolItem::Fd(fd) => res::write_fd(pool, *idx, fd),
            PoolItem::Path(p) => res::write_path(pool, *idx, p.as_os_str().as_bytes()),
        }
    }
    for idx in held {
        pool.release(idx);
    }
    Ok(())
}

/// Worker-side synthesizer for cache misses. Every path it mints is
/// registered in the trash ring immediately, before the kernel ever
/// sees it.
pub struct AdhocSynth {
    region: &'static Region,
    adhoc_dir: PathBuf,
    seq: u64,
}

impl AdhocSynth {
    pub fn new(region: &'static Region, output: &Path) -> std::io::Result<AdhocSynth> {
        let adhoc_dir = output.join("adhoc");
        create_dir_all(&adhoc_dir)?;
        Ok(AdhocSynth {
            region,
            adhoc_dir,
            seq: 0,
        })
    }

    fn next_path(&mut self, prefix: &str) -> PathBuf {
        self.seq += 1;
        self.adhoc_dir
            .join(format!("{}-{}-{}", prefix, std::process::id(), self.seq))
    }

    fn to_cstring(path: &Path) -> Option<CString> {
        CString::new(path.as_os_str().as_bytes()).ok()
    }
}

impl Synthesizer for AdhocSynth {
    fn fresh_fd(&mut self) -> Option<i32> {
        let path = self.next_path("fd");
        let f = File::create(&path).ok()?;
        self.region
            .trash
            .push(TrashKind::File, path.as_os_str().as_bytes());
        Some(f.into_raw_fd())
    }

    fn fresh_sock(&mut self) -> Option<i32> {
        connect_sockserv(self.region)
    }

    fn fresh_file_path(&mut self) -> Option<CString> {
        let path = self.next_path("file");
        File::create(&path).ok()?;
        self.region
            .trash
            .push(TrashKind::File, path.as_os_str().as_bytes());
        Self::to_cstring(&path)
    }

    fn fresh_dir_path(&mut self) -> Option<CString> {
        let path = self.next_path("dir");
        create_dir_all(&path).ok()?;
        self.region
            .trash
            .push(TrashKind::Dir, path.as_os_str().as_bytes());
        Self::to_cstring(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harrow_core::context::Region;

    fn leaked_region() -> &'static Region {
        Box::leak(Region::new_boxed())
    }

    #[test]
    fn prefill_fills_every_pool() {
        let region = leaked_region();
        region.init(4, 5000, 3000).unwrap();
        let dir = std::env::temp_dir().join(format!("harrow-prefill-{}", std::process::id()));
        prefill(region, &dir).unwrap();
        for kind in [ResKind::Fd, ResKind::FilePath, ResKind::DirPath] {
            assert_eq!(region.pool(kind).free_count(), 4);
        }
        // pooled fds must be real open descriptors
        let idx = region.fd_pool.acquire().unwrap();
        let fd = res::read_fd(&region.fd_pool, idx);
        assert!(fd >= 0);
        region.fd_pool.release(idx);
        // pooled paths must exist on disk
        let idx = region.file_pool.acquire().unwrap();
        let path = res::read_path(&region.file_pool, idx);
        assert!(Path::new(path.to_str().unwrap()).exists());
        region.file_pool.release(idx);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn adhoc_paths_go_to_trash() {
        let region = leaked_region();
        region.init(1, 5000, 3000).unwrap();
        let dir = std::env::temp_dir().join(format!("harrow-adhoc-{}", std::process::id()));
        let mut synth = AdhocSynth::new(region, &dir).unwrap();
        let before = region.trash.pending();
        let p = synth.fresh_file_path().unwrap();
        assert!(Path::new(p.to_str().unwrap()).exists());
        let d = synth.fresh_dir_path().unwrap();
        assert!(Path::new(d.to_str().unwrap()).exists());
        assert_eq!(region.trash.pending(), before + 2);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
