use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use xxhash_rust::xxh3::Xxh3;

/// Hash function over index keys. A trait seam so tests can substitute
/// deterministic functions with known bit patterns.
pub trait HashFunction<K>: Send + Sync {
    fn get_hash(&self, key: &K) -> u64;
}

/// Default hash function, backed by xxh3.
pub struct Xxh3HashFunction<K> {
    _marker: PhantomData<fn() -> K>,
}

impl<K> Xxh3HashFunction<K> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<K> Default for Xxh3HashFunction<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash> HashFunction<K> for Xxh3HashFunction<K> {
    fn get_hash(&self, key: &K) -> u64 {
        let mut hasher = Xxh3::new();
        key.hash(&mut hasher);
        hasher.finish()
    }
}
