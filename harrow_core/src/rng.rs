//! PRNG facade.
//!
//! Every consumer draws randomness through `rand_range`/`rand_bytes`
//! rather than owning an rng, so a forked worker only has to call
//! [`reseed`] once after `fork` to get an independent stream.

use crate::RngType;
use rand::{rngs::OsRng, Rng, RngCore, SeedableRng};
use std::cell::{Cell, RefCell};

/// Source of seed material for the per-process software rng.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrngMode {
    /// Seed once from the OS entropy source.
    Fast = 0,
    /// Reseed from the OS entropy source periodically.
    Os = 1,
}

impl PrngMode {
    pub fn from_raw(raw: u32) -> PrngMode {
        if raw == PrngMode::Os as u32 {
            PrngMode::Os
        } else {
            PrngMode::Fast
        }
    }
}

const RESEED_PERIOD: u64 = 64 * 1024;

thread_local! {
    static RNG: RefCell<RngType> = RefCell::new(RngType::from_entropy());
    static MODE: Cell<PrngMode> = Cell::new(PrngMode::Fast);
    static DRAWS: Cell<u64> = Cell::new(0);
}

/// Reseed the calling process' rng. Must be called once in every
/// forked process, otherwise parent and child replay the same stream.
pub fn reseed(mode: PrngMode) {
    MODE.with(|m| m.set(mode));
    DRAWS.with(|d| d.set(0));
    RNG.with(|r| *r.borrow_mut() = RngType::from_rng(OsRng).unwrap_or_else(|_| RngType::from_entropy()));
}

#[inline]
fn maybe_reseed() {
    let draws = DRAWS.with(|d| {
        let n = d.get() + 1;
        d.set(n);
        n
    });
    if draws % RESEED_PERIOD == 0 && MODE.with(|m| m.get()) == PrngMode::Os {
        RNG.with(|r| {
            *r.borrow_mut() = RngType::from_rng(OsRng).unwrap_or_else(|_| RngType::from_entropy())
        });
    }
}

/// Uniform value in `0..max`. `max == 0` yields 0.
pub fn rand_range(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    maybe_reseed();
    RNG.with(|r| r.borrow_mut().gen_range(0..max))
}

/// Fill `buf` with random bytes.
pub fn rand_bytes(buf: &mut [u8]) {
    maybe_reseed();
    RNG.with(|r| r.borrow_mut().fill_bytes(buf))
}

/// True with probability `numerator/denominator`.
pub fn rand_ratio(numerator: u32, denominator: u32) -> bool {
    maybe_reseed();
    RNG.with(|r| r.borrow_mut().gen_ratio(numerator, denominator))
}

/// One random `u64`, full range.
pub fn rand_u64() -> u64 {
    maybe_reseed();
    RNG.with(|r| r.borrow_mut().gen())
}

/// Choose one item of `items` uniformly.
pub fn choose<T: Copy>(items: &[T]) -> Option<T> {
    if items.is_empty() {
        return None;
    }
    let idx = rand_range(items.len() as u64) as usize;
    Some(items[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_range_bounds() {
        for max in [1u64, 2, 7, 1 << 32] {
            for _ in 0..64 {
                assert!(rand_range(max) < max);
            }
        }
        assert_eq!(rand_range(0), 0);
    }

    #[test]
    fn rand_bytes_fills() {
        let mut buf = [0u8; 256];
        rand_bytes(&mut buf);
        // 256 zero bytes after filling is a broken rng for all
        // practical purposes.
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn choose_small() {
        assert_eq!(choose::<u64>(&[]), None);
        assert_eq!(choose(&[42u64]), Some(42));
        let items = [1u64, 2, 3];
        for _ in 0..32 {
            assert!(items.contains(&choose(&items).unwrap()));
        }
    }

    #[test]
    fn reseed_keeps_working() {
        reseed(PrngMode::Os);
        assert!(rand_range(100) < 100);
        reseed(PrngMode::Fast);
        assert!(rand_range(100) < 100);
    }
}
