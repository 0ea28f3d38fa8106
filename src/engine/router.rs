use std::hash::BuildHasher;

use ahash::{AHashMap, RandomState};
use parking_lot::RwLock;

// fixed seeds keep symbol placement stable across runs
const SEEDS: (u64, u64, u64, u64) = (0x6d64_6167, 0x7368_6172, 0x6473_796d, 0x626f_6f6b);

/// Maps a symbol to its owning shard: `hash(symbol) mod shard_count`, cached per symbol.
#[derive(Debug)]
pub struct ShardRouter {
    shard_count: usize,
    hasher: RandomState,
    cache: RwLock<AHashMap<String, usize>>,
}

impl ShardRouter {
    pub fn new(shard_count: usize) -> Self {
        Self {
            shard_count: shard_count.max(1),
            hasher: RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3),
            cache: RwLock::new(AHashMap::new()),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn shard_for(&self, symbol: &str) -> usize {
        if let Some(&idx) = self.cache.read().get(symbol) {
            return idx;
        }
        let idx = (self.hasher.hash_one(symbol) % self.shard_count as u64) as usize;
        *self.cache.write().entry(symbol.to_string()).or_insert(idx)
    }
}
