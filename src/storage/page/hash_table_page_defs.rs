use crate::common::config::{PageId, DB_PAGE_SIZE};
use crate::common::rid::Rid;

/// Fixed-width codec for the key and value types held in hash table pages.
/// Pages are raw byte buffers on disk; anything stored in a bucket slot must
/// encode to exactly `STORED_SIZE` bytes.
pub trait Storable: Clone {
    const STORED_SIZE: usize;

    fn store(&self, buf: &mut [u8]);
    fn load(buf: &[u8]) -> Self;
}

impl Storable for i32 {
    const STORED_SIZE: usize = 4;

    fn store(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn load(buf: &[u8]) -> Self {
        i32::from_le_bytes(buf[..4].try_into().unwrap())
    }
}

impl Storable for u32 {
    const STORED_SIZE: usize = 4;

    fn store(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn load(buf: &[u8]) -> Self {
        u32::from_le_bytes(buf[..4].try_into().unwrap())
    }
}

impl Storable for u64 {
    const STORED_SIZE: usize = 8;

    fn store(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn load(buf: &[u8]) -> Self {
        u64::from_le_bytes(buf[..8].try_into().unwrap())
    }
}

impl Storable for Rid {
    const STORED_SIZE: usize = 8;

    fn store(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.get_page_id().to_le_bytes());
        buf[4..8].copy_from_slice(&self.get_slot_num().to_le_bytes());
    }

    fn load(buf: &[u8]) -> Self {
        let page_id = PageId::from_le_bytes(buf[..4].try_into().unwrap());
        let slot_num = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        Rid::new(page_id, slot_num)
    }
}

/// Number of (key, value) slots in a bucket page: the largest `N` such that
/// two `ceil(N / 8)`-byte bitmaps plus `N` entries fit in one page.
pub const fn bucket_array_size(entry_size: usize) -> usize {
    (4 * DB_PAGE_SIZE) / (4 * entry_size + 1)
}

/// Bytes needed for a bitmap covering `array_size` slots.
pub const fn bitmap_size(array_size: usize) -> usize {
    (array_size + 7) / 8
}
