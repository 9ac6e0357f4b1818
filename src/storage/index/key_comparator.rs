use std::cmp::Ordering;

/// Three-way comparison over index keys. The hash table only consumes
/// equality, but comparators expose full ordering so they can be shared with
/// ordered index types.
pub trait KeyComparator<K>: Send + Sync {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}
