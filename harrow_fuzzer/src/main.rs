use env_logger::{Env, TimestampPrecision};
use harrow_core::rng::PrngMode;
use harrow_fuzzer::{boot, config::Config};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Settings {
    /// Parallel fuzzing workers.
    #[structopt(long, short = "j", default_value = "4")]
    job: usize,
    /// Directory to write kinds of output data.
    #[structopt(long, short = "o", default_value = "output")]
    output: PathBuf,
    /// Milliseconds without progress before a worker counts as hung.
    #[structopt(long, default_value = "5000")]
    hang_timeout: u64,
    /// Milliseconds before an ad-hoc resource is reclaimed.
    #[structopt(long, default_value = "3000")]
    grace_period: u64,
    /// Reseed the generator from OS entropy periodically.
    #[structopt(long)]
    os_entropy: bool,
    /// Stop after this many tests (0 runs until interrupted).
    #[structopt(long, default_value = "0")]
    max_tests: u64,
    /// Blocks to prefill in each resource pool.
    #[structopt(long, default_value = "64")]
    pool_blocks: usize,
    /// Path to a file of syscall names to disable.
    #[structopt(long)]
    disable_syscalls: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let settings = Settings::from_args();

    let log_env = Env::new()
        .filter_or("HARROW_LOG", "info")
        .default_write_style_or("auto");
    env_logger::Builder::from_env(log_env)
        .format_timestamp(Some(TimestampPrecision::Seconds))
        .init();

    let config = Config {
        output: settings.output,
        job: settings.job,
        hang_timeout_ms: settings.hang_timeout,
        grace_ms: settings.grace_period,
        prng_mode: if settings.os_entropy {
            PrngMode::Os
        } else {
            PrngMode::Fast
        },
        max_tests: settings.max_tests,
        pool_blocks: settings.pool_blocks,
        disabled_calls: settings.disable_syscalls,
    };

    boot(config)
}
