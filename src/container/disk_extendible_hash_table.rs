use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::PageId;
use crate::common::exception::IndexError;
use crate::container::hash_function::HashFunction;
use crate::storage::index::key_comparator::KeyComparator;
use crate::storage::page::hash_table_bucket_page::HashTableBucketPage;
use crate::storage::page::hash_table_directory_page::{
    HashTableDirectoryPage, DIRECTORY_MAX_DEPTH,
};
use crate::storage::page::hash_table_page_defs::Storable;
use crate::storage::page::page_guard::PageGuard;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// Disk-backed extendible hash table built over a buffer pool manager.
/// Non-unique keys are supported, but each exact (key, value) pair is stored
/// at most once. The table grows by directory doubling and bucket splitting
/// and shrinks by bucket merging and directory halving.
///
/// Concurrency follows a two-level latching protocol: a table-wide
/// reader-writer latch (read mode for point operations, write mode for
/// structural changes) above the per-page latches embedded in the buffer
/// pool's frames. Latches are always acquired table first, then bucket, and
/// never more than two bucket latches at once (old before new during a
/// split).
pub struct DiskExtendibleHashTable<K, V, C, H> {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    hash_fn: H,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C, H> DiskExtendibleHashTable<K, V, C, H>
where
    K: Storable,
    V: Storable + PartialEq,
    C: KeyComparator<K>,
    H: HashFunction<K>,
{
    /// Creates a new table: a directory at depth zero whose single slot
    /// points at one empty bucket.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        hash_fn: H,
    ) -> Result<Self, IndexError> {
        let index_name = name.into();
        let dir_guard = bpm.new_page_guarded().ok_or(IndexError::AllocFailed)?;
        let bucket_guard = bpm.new_page_guarded().ok_or(IndexError::AllocFailed)?;
        let directory_page_id = dir_guard.get_page_id();

        let mut directory = HashTableDirectoryPage::new();
        directory.set_bucket_page_id(0, bucket_guard.get_page_id());
        {
            let mut data = dir_guard.page().write();
            directory.encode(&mut data[..]);
        }
        dir_guard.mark_dirty();
        // The bucket page is born zeroed, which already decodes as an empty
        // bucket; it only needs to reach disk.
        bucket_guard.mark_dirty();

        info!(
            "created extendible hash table '{}' with directory page {}",
            index_name, directory_page_id
        );
        Ok(Self {
            index_name,
            bpm,
            comparator,
            hash_fn,
            directory_page_id,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        })
    }

    pub fn get_index_name(&self) -> &str {
        &self.index_name
    }

    /// Narrows the key's 64-bit hash to the 32 bits used for directory
    /// indexing.
    fn hash(&self, key: &K) -> u32 {
        self.hash_fn.get_hash(key) as u32
    }

    fn key_to_directory_index(&self, key: &K, directory: &HashTableDirectoryPage) -> u32 {
        directory.hash_to_bucket_index(self.hash(key))
    }

    fn key_to_page_id(&self, key: &K, directory: &HashTableDirectoryPage) -> PageId {
        directory.get_bucket_page_id(self.key_to_directory_index(key, directory))
    }

    fn fetch_directory(&self) -> Result<(PageGuard, HashTableDirectoryPage), IndexError> {
        let guard = self
            .bpm
            .fetch_page_guarded(self.directory_page_id)
            .ok_or(IndexError::FetchFailed(self.directory_page_id))?;
        let directory = {
            let data = guard.page().read();
            HashTableDirectoryPage::decode(&data[..])
        };
        Ok((guard, directory))
    }

    fn fetch_bucket(&self, bucket_page_id: PageId) -> Result<PageGuard, IndexError> {
        self.bpm
            .fetch_page_guarded(bucket_page_id)
            .ok_or(IndexError::FetchFailed(bucket_page_id))
    }

    /// Collects every value stored under `key`.
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, IndexError> {
        let _table = self.table_latch.read();
        let (_dir_guard, directory) = self.fetch_directory()?;
        let bucket_page_id = self.key_to_page_id(key, &directory);
        let bucket_guard = self.fetch_bucket(bucket_page_id)?;

        let mut result = vec![];
        {
            let data = bucket_guard.page().read();
            let bucket = HashTableBucketPage::<K, V>::decode(&data[..]);
            bucket.get_value(key, &self.comparator, &mut result);
        }
        Ok(result)
    }

    /// Inserts the (key, value) pair. Returns `Ok(false)` when the exact
    /// pair already exists or when the pair cannot be placed even after a
    /// split (directory at maximum depth, or every pair in the bucket shares
    /// the discriminating hash bit).
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, IndexError> {
        let (inserted, bucket_full) = {
            let _table = self.table_latch.read();
            let (_dir_guard, directory) = self.fetch_directory()?;
            let bucket_page_id = self.key_to_page_id(key, &directory);
            let bucket_guard = self.fetch_bucket(bucket_page_id)?;

            let mut data = bucket_guard.page().write();
            let mut bucket = HashTableBucketPage::<K, V>::decode(&data[..]);
            let inserted = bucket.insert(key.clone(), value.clone(), &self.comparator);
            bucket.encode(&mut data[..]);
            // The attempt may have changed bookkeeping even when it failed.
            bucket_guard.mark_dirty();
            (inserted, bucket.is_full())
        };

        if !inserted && bucket_full {
            return self.split_insert(key, value);
        }
        Ok(inserted)
    }

    /// Slow insertion path: splits the key's bucket (doubling the directory
    /// when its local depth equals the global depth), redistributes the
    /// bucket's pairs under the deepened prefix, then retries the pending
    /// pair. Runs entirely under the table write latch.
    fn split_insert(&self, key: &K, value: &V) -> Result<bool, IndexError> {
        let _table = self.table_latch.write();
        let (dir_guard, mut directory) = self.fetch_directory()?;
        let old_bucket_index = self.key_to_directory_index(key, &directory);
        let old_bucket_page_id = directory.get_bucket_page_id(old_bucket_index);
        let local_depth = directory.get_local_depth(old_bucket_index);
        let old_guard = self.fetch_bucket(old_bucket_page_id)?;

        {
            // Another thread may have split or removed between our latch
            // windows; if there is room now, no split is needed.
            let mut old_data = old_guard.page().write();
            let mut old_bucket = HashTableBucketPage::<K, V>::decode(&old_data[..]);
            if !old_bucket.is_full() {
                let inserted = old_bucket.insert(key.clone(), value.clone(), &self.comparator);
                old_bucket.encode(&mut old_data[..]);
                old_guard.mark_dirty();
                return Ok(inserted);
            }
        }

        if local_depth >= DIRECTORY_MAX_DEPTH {
            debug!(
                "cannot split bucket {}: already at max depth {}",
                old_bucket_page_id, DIRECTORY_MAX_DEPTH
            );
            return Ok(false);
        }

        let new_guard = self.bpm.new_page_guarded().ok_or(IndexError::AllocFailed)?;
        let new_bucket_page_id = new_guard.get_page_id();
        new_guard.mark_dirty();
        debug!(
            "splitting bucket {} (local depth {}) into new bucket {}",
            old_bucket_page_id, local_depth, new_bucket_page_id
        );

        // Deepen the prefix of every entry in the old bucket's group. The
        // entries whose new bit matches the split target keep the old bucket.
        let old_local_mask = directory.get_local_depth_mask(old_bucket_index);
        let new_local_mask = (old_local_mask << 1) | 1;
        let new_local_hash = old_bucket_index & new_local_mask;
        let old_size = directory.size();
        for i in 0..old_size {
            if i & new_local_mask == new_local_hash {
                directory.incr_local_depth(i);
            }
        }

        if local_depth < directory.get_global_depth() {
            // Local split: redirect the half of the group whose new bit
            // differs, no directory growth.
            for i in 0..old_size {
                if directory.get_bucket_page_id(i) == old_bucket_page_id
                    && i & new_local_mask != new_local_hash
                {
                    directory.set_bucket_page_id(i, new_bucket_page_id);
                    directory.incr_local_depth(i);
                }
            }
        } else {
            // Directory doubling: the new upper half mirrors the lower half,
            // then the mirror of the split target is pointed at the new
            // bucket. Depths were already deepened above, so the mirror
            // inherits them.
            directory.incr_global_depth();
            for i in old_size..directory.size() {
                if directory.get_bucket_page_id(i) == old_bucket_page_id {
                    directory.set_bucket_page_id(i, new_bucket_page_id);
                }
            }
        }

        // Redistribute under both bucket latches, old before new.
        let inserted = {
            let mut old_data = old_guard.page().write();
            let mut new_data = new_guard.page().write();
            let mut old_bucket = HashTableBucketPage::<K, V>::decode(&old_data[..]);
            let mut new_bucket = HashTableBucketPage::<K, V>::decode(&new_data[..]);

            for i in 0..old_bucket.size() {
                let (slot_key, slot_value) = match old_bucket.entry_at(i) {
                    Some(entry) => entry.clone(),
                    None => continue,
                };
                if self.key_to_page_id(&slot_key, &directory) == new_bucket_page_id {
                    old_bucket.remove_at(i);
                    new_bucket.insert(slot_key, slot_value, &self.comparator);
                }
            }

            // Route the pending pair under the new depths. If every pair
            // shared the discriminating bit, its bucket may still be full
            // and the insert reports failure.
            let inserted = if self.key_to_page_id(key, &directory) == old_bucket_page_id {
                old_bucket.insert(key.clone(), value.clone(), &self.comparator)
            } else {
                new_bucket.insert(key.clone(), value.clone(), &self.comparator)
            };

            old_bucket.encode(&mut old_data[..]);
            new_bucket.encode(&mut new_data[..]);
            inserted
        };
        old_guard.mark_dirty();

        {
            let mut dir_data = dir_guard.page().write();
            directory.encode(&mut dir_data[..]);
        }
        dir_guard.mark_dirty();
        Ok(inserted)
    }

    /// Removes the (key, value) pair. If the removal empties the bucket, the
    /// bucket is merged with its split image and merges cascade while they
    /// keep applying.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, IndexError> {
        let (removed, bucket_empty) = {
            let _table = self.table_latch.read();
            let (_dir_guard, directory) = self.fetch_directory()?;
            let bucket_page_id = self.key_to_page_id(key, &directory);
            let bucket_guard = self.fetch_bucket(bucket_page_id)?;

            let mut data = bucket_guard.page().write();
            let mut bucket = HashTableBucketPage::<K, V>::decode(&data[..]);
            let removed = bucket.remove(key, value, &self.comparator);
            bucket.encode(&mut data[..]);
            bucket_guard.mark_dirty();
            (removed, bucket.is_empty())
        };

        if removed && bucket_empty {
            self.merge(key)?;
            while self.extra_merge(key)? {}
        }
        Ok(removed)
    }

    /// Single merge step: if the key's bucket is still empty and its split
    /// image sits at the same local depth, redirect the empty bucket's
    /// directory entries to the image, delete the empty bucket, and shallow
    /// both groups (shrinking the directory when possible). Runs under the
    /// table write latch.
    fn merge(&self, key: &K) -> Result<(), IndexError> {
        let _table = self.table_latch.write();
        let (dir_guard, mut directory) = self.fetch_directory()?;
        let index = self.key_to_directory_index(key, &directory);
        let bucket_page_id = directory.get_bucket_page_id(index);
        let local_depth = directory.get_local_depth(index);
        if local_depth == 0 {
            return Ok(());
        }

        let bucket_guard = self.fetch_bucket(bucket_page_id)?;
        let is_empty = {
            let data = bucket_guard.page().read();
            HashTableBucketPage::<K, V>::decode(&data[..]).is_empty()
        };
        if !is_empty {
            // A concurrent insert repopulated the bucket between latch
            // windows.
            return Ok(());
        }

        let image_index = directory.get_split_image_index(index);
        if directory.get_local_depth(image_index) != local_depth {
            // The sibling has been split further; nothing to coalesce.
            return Ok(());
        }
        let image_page_id = directory.get_bucket_page_id(image_index);
        debug!(
            "merging empty bucket {} into split image {}",
            bucket_page_id, image_page_id
        );

        let local_mask = directory.get_local_depth_mask(index);
        for i in 0..directory.size() {
            if i & local_mask == index & local_mask {
                directory.set_bucket_page_id(i, image_page_id);
            }
        }

        // Zero pins before the delete.
        drop(bucket_guard);
        if !self.bpm.delete_page(bucket_page_id) {
            warn!("failed to delete merged bucket page {}", bucket_page_id);
        }

        // Both halves of the former pair sit one level shallower now.
        let merged_mask = local_mask >> 1;
        for i in 0..directory.size() {
            if i & merged_mask == index & merged_mask {
                directory.decr_local_depth(i);
            }
        }
        if directory.can_shrink() {
            directory.decr_global_depth();
            debug!(
                "directory shrank to global depth {}",
                directory.get_global_depth()
            );
        }

        {
            let mut dir_data = dir_guard.page().write();
            directory.encode(&mut dir_data[..]);
        }
        dir_guard.mark_dirty();
        Ok(())
    }

    /// Opportunistic cascade step: if the key's current bucket's own split
    /// image is empty and of equal depth, merge the image into the bucket.
    /// Returns whether a merge occurred so the caller can loop until the
    /// directory stops coalescing.
    fn extra_merge(&self, key: &K) -> Result<bool, IndexError> {
        let _table = self.table_latch.write();
        let (dir_guard, mut directory) = self.fetch_directory()?;
        let index = self.key_to_directory_index(key, &directory);
        let bucket_page_id = directory.get_bucket_page_id(index);
        let local_depth = directory.get_local_depth(index);
        if local_depth == 0 {
            return Ok(false);
        }

        let image_index = directory.get_split_image_index(index);
        if directory.get_local_depth(image_index) != local_depth {
            return Ok(false);
        }
        let image_page_id = directory.get_bucket_page_id(image_index);
        let image_guard = self.fetch_bucket(image_page_id)?;
        let image_empty = {
            let data = image_guard.page().read();
            HashTableBucketPage::<K, V>::decode(&data[..]).is_empty()
        };
        if !image_empty {
            return Ok(false);
        }
        debug!(
            "cascading merge of empty bucket {} into bucket {}",
            image_page_id, bucket_page_id
        );

        for i in 0..directory.size() {
            let page_id = directory.get_bucket_page_id(i);
            if page_id == image_page_id {
                directory.set_bucket_page_id(i, bucket_page_id);
                directory.decr_local_depth(i);
            } else if page_id == bucket_page_id {
                directory.decr_local_depth(i);
            }
        }

        drop(image_guard);
        if !self.bpm.delete_page(image_page_id) {
            warn!("failed to delete merged bucket page {}", image_page_id);
        }
        if directory.can_shrink() {
            directory.decr_global_depth();
            debug!(
                "directory shrank to global depth {}",
                directory.get_global_depth()
            );
        }

        {
            let mut dir_data = dir_guard.page().write();
            directory.encode(&mut dir_data[..]);
        }
        dir_guard.mark_dirty();
        Ok(true)
    }

    /// Returns the directory's current global depth.
    pub fn get_global_depth(&self) -> Result<u32, IndexError> {
        let _table = self.table_latch.read();
        let (_dir_guard, directory) = self.fetch_directory()?;
        Ok(directory.get_global_depth())
    }

    /// Checks the directory invariants and that every stored pair is
    /// reachable through its hash. Panics on violation.
    pub fn verify_integrity(&self) -> Result<(), IndexError> {
        let _table = self.table_latch.read();
        let (_dir_guard, directory) = self.fetch_directory()?;
        directory.verify_integrity();

        let mut visited = HashSet::new();
        for index in 0..directory.size() {
            let bucket_page_id = directory.get_bucket_page_id(index);
            if !visited.insert(bucket_page_id) {
                continue;
            }
            let bucket_guard = self.fetch_bucket(bucket_page_id)?;
            let data = bucket_guard.page().read();
            let bucket = HashTableBucketPage::<K, V>::decode(&data[..]);
            for (slot_key, _) in bucket.get_all_items() {
                assert_eq!(
                    self.key_to_page_id(&slot_key, &directory),
                    bucket_page_id,
                    "stored key does not route back to its bucket page {}",
                    bucket_page_id
                );
            }
        }
        Ok(())
    }

    /// Prints the directory and the occupancy of every bucket.
    pub fn print_table(&self) -> Result<(), IndexError> {
        let _table = self.table_latch.read();
        let (_dir_guard, directory) = self.fetch_directory()?;
        directory.print_directory();
        let mut visited = HashSet::new();
        for index in 0..directory.size() {
            let bucket_page_id = directory.get_bucket_page_id(index);
            if !visited.insert(bucket_page_id) {
                continue;
            }
            let bucket_guard = self.fetch_bucket(bucket_page_id)?;
            let data = bucket_guard.page().read();
            HashTableBucketPage::<K, V>::decode(&data[..]).print_bucket();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::lru_k_replacer::LRUKReplacer;
    use crate::common::logger::initialize_logger;
    use crate::common::rid::Rid;
    use crate::container::hash_function::Xxh3HashFunction;
    use crate::storage::disk::disk_manager::FileDiskManager;
    use crate::storage::index::int_comparator::IntComparator;
    use tempfile::TempDir;

    struct TestContext {
        bpm: Arc<BufferPoolManager>,
        _temp_dir: TempDir,
    }

    impl TestContext {
        fn new(name: &str) -> Self {
            initialize_logger();
            const BUFFER_POOL_SIZE: usize = 50;
            const K: usize = 2;

            let temp_dir = TempDir::new().unwrap();
            let disk_manager =
                Arc::new(FileDiskManager::new(temp_dir.path().join(format!("{name}.db"))).unwrap());
            let replacer = LRUKReplacer::new(BUFFER_POOL_SIZE, K);
            let bpm = Arc::new(BufferPoolManager::new(
                BUFFER_POOL_SIZE,
                disk_manager,
                replacer,
            ));

            Self {
                bpm,
                _temp_dir: temp_dir,
            }
        }

        fn bpm(&self) -> Arc<BufferPoolManager> {
            Arc::clone(&self.bpm)
        }
    }

    #[test]
    fn test_insert_and_get() {
        let ctx = TestContext::new("test_insert_and_get");
        let ht = DiskExtendibleHashTable::new(
            "test_table",
            ctx.bpm(),
            IntComparator::new(),
            Xxh3HashFunction::new(),
        )
        .unwrap();

        assert!(ht.insert(&1, &Rid::new(1, 0)).unwrap());
        assert!(ht.insert(&2, &Rid::new(2, 0)).unwrap());

        assert_eq!(ht.get_value(&1).unwrap(), vec![Rid::new(1, 0)]);
        assert_eq!(ht.get_value(&2).unwrap(), vec![Rid::new(2, 0)]);
        assert!(ht.get_value(&3).unwrap().is_empty());
        ht.verify_integrity().unwrap();
    }

    #[test]
    fn test_non_unique_keys() {
        let ctx = TestContext::new("test_non_unique_keys");
        let ht = DiskExtendibleHashTable::new(
            "test_table",
            ctx.bpm(),
            IntComparator::new(),
            Xxh3HashFunction::new(),
        )
        .unwrap();

        assert!(ht.insert(&1, &Rid::new(1, 0)).unwrap());
        assert!(ht.insert(&1, &Rid::new(1, 1)).unwrap());

        let mut values = ht.get_value(&1).unwrap();
        values.sort_by_key(|rid| rid.get_slot_num());
        assert_eq!(values, vec![Rid::new(1, 0), Rid::new(1, 1)]);
    }

    #[test]
    fn test_remove() {
        let ctx = TestContext::new("test_remove");
        let ht = DiskExtendibleHashTable::new(
            "test_table",
            ctx.bpm(),
            IntComparator::new(),
            Xxh3HashFunction::new(),
        )
        .unwrap();

        assert!(ht.insert(&1, &Rid::new(1, 1)).unwrap());
        assert!(ht.remove(&1, &Rid::new(1, 1)).unwrap());
        assert!(ht.get_value(&1).unwrap().is_empty());
        assert!(!ht.remove(&1, &Rid::new(1, 1)).unwrap());
    }

    #[test]
    fn test_grow_past_one_bucket() {
        let ctx = TestContext::new("test_grow_past_one_bucket");
        let ht = DiskExtendibleHashTable::new(
            "test_table",
            ctx.bpm(),
            IntComparator::new(),
            Xxh3HashFunction::new(),
        )
        .unwrap();

        let capacity = HashTableBucketPage::<i32, Rid>::array_size() as i32;
        for i in 0..capacity * 2 {
            assert!(ht.insert(&i, &Rid::new(i, 0)).unwrap(), "insert {} failed", i);
        }
        assert!(ht.get_global_depth().unwrap() >= 1);
        ht.verify_integrity().unwrap();

        for i in 0..capacity * 2 {
            assert_eq!(ht.get_value(&i).unwrap(), vec![Rid::new(i, 0)]);
        }
    }
}
