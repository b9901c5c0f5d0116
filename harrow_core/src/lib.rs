//! Core data structures and algorithms of harrow.

use ahash::{AHashMap, AHashSet};

pub mod context;
pub mod gen;
pub mod mutation;
pub mod pool;
pub mod res;
pub mod rng;
pub mod sync;
pub mod sys;
pub mod table;

pub type HashMap<K, V> = AHashMap<K, V>;
pub type HashSet<V> = AHashSet<V>;
pub type RngType = rand::rngs::SmallRng;

/// Upper bound on syscall arguments carried by a table entry.
pub const MAX_ARGS: usize = 7;
