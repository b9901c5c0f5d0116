use anyhow::Context;
use harrow_core::context::MAX_WORKERS;
use harrow_core::pool::POOL_CAP;
use harrow_core::rng::PrngMode;
use std::env::current_dir;
use std::fs::canonicalize;
use std::path::PathBuf;

#[derive(Clone)]
pub struct Config {
    pub output: PathBuf,
    pub job: usize,
    /// Milliseconds with no forward progress before a worker counts as
    /// hung.
    pub hang_timeout_ms: u64,
    /// Milliseconds an ad-hoc resource must sit in the trash ring
    /// before the Reaper reclaims it.
    pub grace_ms: u64,
    pub prng_mode: PrngMode,
    /// Stop after this many tests, 0 for unbounded.
    pub max_tests: u64,
    /// Blocks to prefill in each resource pool.
    pub pool_blocks: usize,
    /// Path to a file listing syscall names to disable, one per line.
    pub disabled_calls: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output: current_dir().unwrap().join("output"),
            job: 4,
            hang_timeout_ms: 5000,
            grace_ms: 3000,
            prng_mode: PrngMode::Fast,
            max_tests: 0,
            pool_blocks: POOL_CAP,
            disabled_calls: None,
        }
    }
}

impl Config {
    pub fn check(&self) -> anyhow::Result<()> {
        if self.job == 0 || self.job > MAX_WORKERS {
            anyhow::bail!("job count must be in 1..={}, got {}", MAX_WORKERS, self.job);
        }
        if self.pool_blocks == 0 || self.pool_blocks > POOL_CAP {
            anyhow::bail!(
                "pool blocks must be in 1..={}, got {}",
                POOL_CAP,
                self.pool_blocks
            );
        }
        if self.hang_timeout_ms < 1000 {
            anyhow::bail!("hang timeout below 1000ms would kill healthy workers");
        }
        if self.output.is_dir() {
            anyhow::bail!(
                "output dir ({}) already existed, cleanup first",
                self.output.display()
            );
        }
        if let Some(d) = self.disabled_calls.as_ref() {
            if !d.is_file() {
                anyhow::bail!("bad disabled calls file: {}", d.display());
            }
        }
        Ok(())
    }

    pub fn fixup(&mut self) -> anyhow::Result<()> {
        self.output = canonicalize(&self.output).context("failed to canonicalize output dir")?;
        Ok(())
    }
}
