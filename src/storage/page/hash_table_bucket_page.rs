use crate::storage::index::key_comparator::KeyComparator;
use crate::storage::page::hash_table_page_defs::{bitmap_size, bucket_array_size, Storable};
use std::cmp::Ordering;

/// Bucket page for the extendible hash table. Stores indexed (key, value)
/// pairs; non-unique keys are supported, but each exact pair appears at most
/// once.
///
/// Page layout (sizes in bytes, `N` = slot count):
/// ```text
/// | Occupied (ceil(N/8)) | Readable (ceil(N/8)) | Slot 0 | Slot 1 | ... | Slot N-1 |
/// ```
///
/// A slot's `occupied` bit is set the first time the slot is used and never
/// cleared while the bucket lives; the `readable` bit tracks whether the slot
/// currently holds a live pair. Scans may stop at the first never-occupied
/// slot, so removal leaves a tombstone rather than clearing `occupied`.
pub struct HashTableBucketPage<K, V> {
    occupied: Vec<u8>,
    readable: Vec<u8>,
    slots: Vec<Option<(K, V)>>,
}

impl<K, V> HashTableBucketPage<K, V>
where
    K: Storable,
    V: Storable + PartialEq,
{
    const ENTRY_SIZE: usize = K::STORED_SIZE + V::STORED_SIZE;

    /// Returns the number of slots in a bucket for this (key, value) shape.
    pub fn array_size() -> usize {
        bucket_array_size(Self::ENTRY_SIZE)
    }

    /// Decodes a bucket from a raw page buffer. A zeroed buffer decodes to an
    /// empty bucket.
    pub fn decode(data: &[u8]) -> Self {
        let size = Self::array_size();
        let bitmap = bitmap_size(size);
        debug_assert!(2 * bitmap + size * Self::ENTRY_SIZE <= data.len());

        let occupied = data[..bitmap].to_vec();
        let readable = data[bitmap..2 * bitmap].to_vec();

        let mut slots = Vec::with_capacity(size);
        for i in 0..size {
            if occupied[i / 8] & (1 << (i % 8)) != 0 {
                let at = 2 * bitmap + i * Self::ENTRY_SIZE;
                let key = K::load(&data[at..at + K::STORED_SIZE]);
                let value = V::load(&data[at + K::STORED_SIZE..at + Self::ENTRY_SIZE]);
                slots.push(Some((key, value)));
            } else {
                slots.push(None);
            }
        }

        Self {
            occupied,
            readable,
            slots,
        }
    }

    /// Encodes the bucket into a raw page buffer.
    pub fn encode(&self, data: &mut [u8]) {
        let bitmap = bitmap_size(self.size());
        data[..bitmap].copy_from_slice(&self.occupied);
        data[bitmap..2 * bitmap].copy_from_slice(&self.readable);
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some((key, value)) = slot {
                let at = 2 * bitmap + i * Self::ENTRY_SIZE;
                key.store(&mut data[at..at + K::STORED_SIZE]);
                value.store(&mut data[at + K::STORED_SIZE..at + Self::ENTRY_SIZE]);
            }
        }
    }

    /// Scans the bucket and appends every value stored under a key comparing
    /// equal to `key`. Returns whether anything matched.
    pub fn get_value<C: KeyComparator<K>>(&self, key: &K, cmp: &C, result: &mut Vec<V>) -> bool {
        let mut found = false;
        for i in 0..self.size() {
            if self.is_readable(i) {
                if let Some((slot_key, slot_value)) = &self.slots[i] {
                    if cmp.compare(slot_key, key) == Ordering::Equal {
                        result.push(slot_value.clone());
                        found = true;
                    }
                }
            } else if !self.is_occupied(i) {
                // Nothing was ever stored at or past this slot.
                break;
            }
        }
        found
    }

    /// Attempts to insert a (key, value) pair into the earliest free slot.
    ///
    /// Returns `false` if the exact pair is already present (the insert is a
    /// no-op) or if every slot holds a live pair.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: K, value: V, cmp: &C) -> bool {
        let size = self.size();
        let mut insert_index = size;
        for i in 0..size {
            if self.is_readable(i) {
                if let Some((slot_key, slot_value)) = &self.slots[i] {
                    if cmp.compare(slot_key, &key) == Ordering::Equal && *slot_value == value {
                        return false;
                    }
                }
            } else {
                if insert_index == size {
                    insert_index = i;
                }
                if !self.is_occupied(i) {
                    break;
                }
            }
        }

        if insert_index == size {
            return false;
        }
        self.slots[insert_index] = Some((key, value));
        self.set_occupied(insert_index);
        self.set_readable(insert_index);
        true
    }

    /// Removes the first live slot holding exactly (key, value). Clears only
    /// the `readable` bit; the slot remains occupied as a tombstone.
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, value: &V, cmp: &C) -> bool {
        for i in 0..self.size() {
            if self.is_readable(i) {
                if let Some((slot_key, slot_value)) = &self.slots[i] {
                    if cmp.compare(slot_key, key) == Ordering::Equal && slot_value == value {
                        self.remove_at(i);
                        return true;
                    }
                }
            } else if !self.is_occupied(i) {
                break;
            }
        }
        false
    }

    /// Clears the `readable` bit at `bucket_idx` unconditionally.
    pub fn remove_at(&mut self, bucket_idx: usize) {
        self.readable[bucket_idx / 8] &= !(1 << (bucket_idx % 8));
    }

    /// Returns the live pair at `bucket_idx`, if any.
    pub fn entry_at(&self, bucket_idx: usize) -> Option<&(K, V)> {
        if self.is_readable(bucket_idx) {
            self.slots[bucket_idx].as_ref()
        } else {
            None
        }
    }

    pub fn key_at(&self, bucket_idx: usize) -> Option<&K> {
        self.entry_at(bucket_idx).map(|(key, _)| key)
    }

    pub fn value_at(&self, bucket_idx: usize) -> Option<&V> {
        self.entry_at(bucket_idx).map(|(_, value)| value)
    }

    pub fn is_occupied(&self, bucket_idx: usize) -> bool {
        self.occupied[bucket_idx / 8] & (1 << (bucket_idx % 8)) != 0
    }

    fn set_occupied(&mut self, bucket_idx: usize) {
        self.occupied[bucket_idx / 8] |= 1 << (bucket_idx % 8);
    }

    pub fn is_readable(&self, bucket_idx: usize) -> bool {
        self.readable[bucket_idx / 8] & (1 << (bucket_idx % 8)) != 0
    }

    fn set_readable(&mut self, bucket_idx: usize) {
        self.readable[bucket_idx / 8] |= 1 << (bucket_idx % 8);
    }

    /// Returns the number of live pairs.
    pub fn num_readable(&self) -> u32 {
        self.readable.iter().map(|byte| byte.count_ones()).sum()
    }

    /// True iff every slot holds a live pair. The slot count need not be a
    /// multiple of 8, so the final bitmap byte is only partially meaningful.
    pub fn is_full(&self) -> bool {
        let size = self.size();
        let full_bytes = size / 8;
        if self.readable[..full_bytes].iter().any(|&byte| byte != 0xFF) {
            return false;
        }
        let rest = size % 8;
        rest == 0 || self.readable[full_bytes] == (1 << rest) - 1
    }

    /// True iff no slot holds a live pair.
    pub fn is_empty(&self) -> bool {
        self.readable.iter().all(|&byte| byte == 0)
    }

    /// Returns the total number of slots.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Returns every live (key, value) pair.
    pub fn get_all_items(&self) -> Vec<(K, V)> {
        (0..self.size())
            .filter_map(|i| self.entry_at(i).cloned())
            .collect()
    }

    /// Prints the bucket occupancy summary.
    pub fn print_bucket(&self) {
        let mut scanned = 0;
        let mut taken = 0;
        let mut free = 0;
        for i in 0..self.size() {
            if !self.is_occupied(i) {
                break;
            }
            scanned += 1;
            if self.is_readable(i) {
                taken += 1;
            } else {
                free += 1;
            }
        }
        println!(
            "Bucket capacity: {}, size: {}, taken: {}, free: {}",
            self.size(),
            scanned,
            taken,
            free
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::DB_PAGE_SIZE;
    use crate::common::rid::Rid;
    use crate::storage::index::int_comparator::IntComparator;

    fn empty_bucket() -> HashTableBucketPage<i32, Rid> {
        HashTableBucketPage::decode(&[0u8; DB_PAGE_SIZE])
    }

    #[test]
    fn test_insert_and_get_value() {
        let cmp = IntComparator::new();
        let mut bucket = empty_bucket();

        assert!(bucket.insert(1, Rid::new(1, 0), &cmp));
        assert!(bucket.insert(1, Rid::new(1, 1), &cmp));
        assert!(bucket.insert(2, Rid::new(2, 0), &cmp));

        let mut result = vec![];
        assert!(bucket.get_value(&1, &cmp, &mut result));
        assert_eq!(result, vec![Rid::new(1, 0), Rid::new(1, 1)]);

        result.clear();
        assert!(!bucket.get_value(&3, &cmp, &mut result));
        assert!(result.is_empty());
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let cmp = IntComparator::new();
        let mut bucket = empty_bucket();

        assert!(bucket.insert(1, Rid::new(1, 0), &cmp));
        assert!(!bucket.insert(1, Rid::new(1, 0), &cmp));
        assert_eq!(bucket.num_readable(), 1);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let cmp = IntComparator::new();
        let mut bucket = empty_bucket();

        assert!(bucket.insert(1, Rid::new(1, 0), &cmp));
        assert!(bucket.insert(2, Rid::new(2, 0), &cmp));
        assert!(bucket.remove(&1, &Rid::new(1, 0), &cmp));
        assert!(!bucket.remove(&1, &Rid::new(1, 0), &cmp));

        // Slot 0 is a tombstone: occupied, not readable. The scan must step
        // past it and still find key 2 in slot 1.
        assert!(bucket.is_occupied(0));
        assert!(!bucket.is_readable(0));
        let mut result = vec![];
        assert!(bucket.get_value(&2, &cmp, &mut result));
        assert_eq!(result, vec![Rid::new(2, 0)]);
    }

    #[test]
    fn test_tombstone_reused_by_insert() {
        let cmp = IntComparator::new();
        let mut bucket = empty_bucket();

        assert!(bucket.insert(1, Rid::new(1, 0), &cmp));
        assert!(bucket.remove(&1, &Rid::new(1, 0), &cmp));
        assert!(bucket.insert(7, Rid::new(7, 0), &cmp));
        assert_eq!(bucket.key_at(0), Some(&7));
    }

    #[test]
    fn test_is_full_with_partial_tail_byte() {
        // (i32, Rid) slots give an array size that is not a multiple of 8,
        // exercising the tail-byte handling in is_full.
        let size = HashTableBucketPage::<i32, Rid>::array_size();
        assert_ne!(size % 8, 0);

        let cmp = IntComparator::new();
        let mut bucket = empty_bucket();
        for i in 0..size as i32 - 1 {
            assert!(bucket.insert(i, Rid::new(i, 0), &cmp));
        }
        assert!(!bucket.is_full());

        assert!(bucket.insert(size as i32, Rid::new(size as i32, 0), &cmp));
        assert!(bucket.is_full());
        assert_eq!(bucket.num_readable(), size as u32);

        // A full bucket rejects a fresh pair without erroring.
        assert!(!bucket.insert(-1, Rid::new(0, 9), &cmp));
    }

    #[test]
    fn test_is_empty() {
        let cmp = IntComparator::new();
        let mut bucket = empty_bucket();
        assert!(bucket.is_empty());

        assert!(bucket.insert(1, Rid::new(1, 0), &cmp));
        assert!(!bucket.is_empty());

        assert!(bucket.remove(&1, &Rid::new(1, 0), &cmp));
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let cmp = IntComparator::new();
        let mut bucket = empty_bucket();
        assert!(bucket.insert(1, Rid::new(1, 0), &cmp));
        assert!(bucket.insert(2, Rid::new(2, 0), &cmp));
        assert!(bucket.remove(&1, &Rid::new(1, 0), &cmp));

        let mut data = [0u8; DB_PAGE_SIZE];
        bucket.encode(&mut data);
        let decoded = HashTableBucketPage::<i32, Rid>::decode(&data);

        assert!(decoded.is_occupied(0));
        assert!(!decoded.is_readable(0));
        assert_eq!(decoded.entry_at(1), Some(&(2, Rid::new(2, 0))));
        assert_eq!(decoded.num_readable(), 1);
    }

    #[test]
    fn test_get_all_items() {
        let cmp = IntComparator::new();
        let mut bucket = empty_bucket();
        for i in 0..5 {
            assert!(bucket.insert(i, Rid::new(i, 0), &cmp));
        }
        assert!(bucket.remove(&2, &Rid::new(2, 0), &cmp));

        let items = bucket.get_all_items();
        assert_eq!(items.len(), 4);
        assert!(!items.iter().any(|(key, _)| *key == 2));
    }
}
