//! Generators for buffer arguments.

use super::{GenCtx, GenError};
use crate::rng::{rand_bytes, rand_range, rand_ratio};
use crate::table::ArgSpec;

const SMALL_BUF_MAX: u64 = 256;
const PAGE: u64 = 4096;

fn pick_buf_len() -> usize {
    let len = if rand_ratio(1, 10) {
        0
    } else if rand_ratio(1, 8) {
        PAGE
    } else {
        rand_range(SMALL_BUF_MAX)
    };
    len as usize
}

/// Filled input buffer. The buffer itself lives in the scratch arena;
/// the argument value is its address.
pub fn gen_in_buf(ctx: &mut GenCtx, _spec: &ArgSpec) -> Result<u64, GenError> {
    let len = pick_buf_len();
    let mut buf = vec![0u8; len];
    rand_bytes(&mut buf);
    let addr = ctx.scratch.keep_buf(buf);
    ctx.record_size(len as u64);
    ctx.scratch.set_last_buf_len(len as u64);
    Ok(addr)
}

/// Writable zeroed output buffer.
pub fn gen_out_buf(ctx: &mut GenCtx, _spec: &ArgSpec) -> Result<u64, GenError> {
    let len = pick_buf_len();
    let buf = vec![0u8; len];
    let addr = ctx.scratch.keep_buf(buf);
    ctx.record_size(len as u64);
    ctx.scratch.set_last_buf_len(len as u64);
    Ok(addr)
}
