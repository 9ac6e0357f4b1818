use crate::common::config::{PageId, INVALID_PAGE_ID};
use log::warn;
use std::collections::HashMap;

/// Maximum number of hash bits the directory may consume; the directory
/// never holds more than `2^DIRECTORY_MAX_DEPTH` entries.
pub const DIRECTORY_MAX_DEPTH: u32 = 9;
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << DIRECTORY_MAX_DEPTH;

const GLOBAL_DEPTH_OFFSET: usize = 0;
// 4 bytes of padding after the depth keep the page id array 4-byte aligned.
const LOCAL_DEPTHS_OFFSET: usize = 8;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

/// Directory page for the extendible hash table.
///
/// Page layout (sizes in bytes):
/// ```text
/// | GlobalDepth (4) | Padding (4) | LocalDepths (512) | BucketPageIds (2048) | Free |
/// ```
///
/// The full `2^DIRECTORY_MAX_DEPTH` arrays are materialized on the page;
/// only the first `2^global_depth` entries are live at any moment.
pub struct HashTableDirectoryPage {
    global_depth: u32,
    local_depths: [u8; DIRECTORY_ARRAY_SIZE],
    bucket_page_ids: [PageId; DIRECTORY_ARRAY_SIZE],
}

impl HashTableDirectoryPage {
    /// Creates an empty directory: depth zero, every slot invalid.
    pub fn new() -> Self {
        Self {
            global_depth: 0,
            local_depths: [0; DIRECTORY_ARRAY_SIZE],
            bucket_page_ids: [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE],
        }
    }

    /// Decodes a directory from a raw page buffer.
    pub fn decode(data: &[u8]) -> Self {
        let global_depth = u32::from_le_bytes(
            data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
                .try_into()
                .unwrap(),
        );
        let mut local_depths = [0u8; DIRECTORY_ARRAY_SIZE];
        local_depths
            .copy_from_slice(&data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE]);

        let mut bucket_page_ids = [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE];
        for (i, page_id) in bucket_page_ids.iter_mut().enumerate() {
            let at = BUCKET_PAGE_IDS_OFFSET + i * 4;
            *page_id = PageId::from_le_bytes(data[at..at + 4].try_into().unwrap());
        }

        Self {
            global_depth,
            local_depths,
            bucket_page_ids,
        }
    }

    /// Encodes the directory into a raw page buffer.
    pub fn encode(&self, data: &mut [u8]) {
        data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&self.global_depth.to_le_bytes());
        data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE]
            .copy_from_slice(&self.local_depths);
        for (i, page_id) in self.bucket_page_ids.iter().enumerate() {
            let at = BUCKET_PAGE_IDS_OFFSET + i * 4;
            data[at..at + 4].copy_from_slice(&page_id.to_le_bytes());
        }
    }

    /// Returns the directory index the given hash routes to.
    pub fn hash_to_bucket_index(&self, hash: u32) -> u32 {
        hash & self.get_global_depth_mask()
    }

    pub fn get_bucket_page_id(&self, bucket_idx: u32) -> PageId {
        self.bucket_page_ids[bucket_idx as usize]
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: u32, bucket_page_id: PageId) {
        self.bucket_page_ids[bucket_idx as usize] = bucket_page_id;
    }

    /// Returns the sibling index that shared a bucket with `bucket_idx`
    /// before the bucket's most recent split.
    pub fn get_split_image_index(&self, bucket_idx: u32) -> u32 {
        bucket_idx ^ (1 << (self.get_local_depth(bucket_idx) - 1))
    }

    /// Returns a mask of `global_depth` low-order 1 bits.
    pub fn get_global_depth_mask(&self) -> u32 {
        (1 << self.global_depth) - 1
    }

    /// Returns a mask of `local_depth` low-order 1 bits for the bucket at
    /// `bucket_idx`.
    pub fn get_local_depth_mask(&self, bucket_idx: u32) -> u32 {
        (1 << self.get_local_depth(bucket_idx)) - 1
    }

    pub fn get_global_depth(&self) -> u32 {
        self.global_depth
    }

    /// Doubles the directory. The upper half mirrors the lower half, so new
    /// entries alias the buckets their lower-half twins point to.
    pub fn incr_global_depth(&mut self) {
        if self.global_depth >= DIRECTORY_MAX_DEPTH {
            warn!(
                "refusing to grow directory past max depth {}",
                DIRECTORY_MAX_DEPTH
            );
            return;
        }
        let old_size = self.size() as usize;
        for i in 0..old_size {
            self.bucket_page_ids[old_size + i] = self.bucket_page_ids[i];
            self.local_depths[old_size + i] = self.local_depths[i];
        }
        self.global_depth += 1;
    }

    /// Halves the directory. Upper-half entries become unreachable; their
    /// contents are left in place.
    pub fn decr_global_depth(&mut self) {
        if self.global_depth == 0 {
            warn!("refusing to shrink directory below depth 0");
            return;
        }
        self.global_depth -= 1;
    }

    /// True when no live slot uses every global bit, i.e. the directory can
    /// drop its top bit without splitting any bucket across entries.
    pub fn can_shrink(&self) -> bool {
        if self.global_depth == 0 {
            return false;
        }
        (0..self.size()).all(|i| u32::from(self.local_depths[i as usize]) < self.global_depth)
    }

    /// Returns the number of live directory entries.
    pub fn size(&self) -> u32 {
        1 << self.global_depth
    }

    pub fn max_size(&self) -> u32 {
        DIRECTORY_ARRAY_SIZE as u32
    }

    pub fn get_local_depth(&self, bucket_idx: u32) -> u32 {
        u32::from(self.local_depths[bucket_idx as usize])
    }

    pub fn set_local_depth(&mut self, bucket_idx: u32, local_depth: u8) {
        self.local_depths[bucket_idx as usize] = local_depth;
    }

    pub fn incr_local_depth(&mut self, bucket_idx: u32) {
        self.local_depths[bucket_idx as usize] += 1;
    }

    pub fn decr_local_depth(&mut self, bucket_idx: u32) {
        self.local_depths[bucket_idx as usize] -= 1;
    }

    /// Verifies the directory invariants:
    ///
    /// 1. every live local depth is at most the global depth;
    /// 2. a bucket with local depth `l` is referenced by exactly
    ///    `2^(global_depth - l)` entries;
    /// 3. entries referencing the same bucket agree on its local depth.
    ///
    /// Panics on violation.
    pub fn verify_integrity(&self) {
        let size = self.size();
        let mut reference_counts: HashMap<PageId, u32> = HashMap::new();
        let mut depths: HashMap<PageId, u32> = HashMap::new();

        for bucket_idx in 0..size {
            let local_depth = self.get_local_depth(bucket_idx);
            assert!(
                local_depth <= self.global_depth,
                "local depth {} exceeds global depth {} at index {}",
                local_depth,
                self.global_depth,
                bucket_idx
            );

            let page_id = self.get_bucket_page_id(bucket_idx);
            *reference_counts.entry(page_id).or_insert(0) += 1;

            match depths.get(&page_id) {
                Some(&seen) => assert_eq!(
                    seen, local_depth,
                    "local depth mismatch for bucket page {} at index {}",
                    page_id, bucket_idx
                ),
                None => {
                    depths.insert(page_id, local_depth);
                }
            }
        }

        for (page_id, count) in &reference_counts {
            let local_depth = depths[page_id];
            let expected = 1 << (self.global_depth - local_depth);
            assert_eq!(
                *count, expected,
                "bucket page {} referenced by {} entries, expected {}",
                page_id, count, expected
            );
        }
    }

    /// Prints the live directory entries.
    pub fn print_directory(&self) {
        println!(
            "======== DIRECTORY (size: {} | global_depth: {}) ========",
            self.size(),
            self.global_depth
        );
        println!("| bucket_idx | page_id | local_depth |");
        for idx in 0..self.size() {
            println!(
                "| {:>10} | {:>7} | {:>11} |",
                idx,
                self.get_bucket_page_id(idx),
                self.get_local_depth(idx)
            );
        }
        println!("================ END DIRECTORY ================");
    }
}

impl Default for HashTableDirectoryPage {
    fn default() -> Self {
        Self::new()
    }
}
