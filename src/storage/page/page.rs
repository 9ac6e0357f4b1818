use crate::common::config::{PageId, DB_PAGE_SIZE};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Page is the basic unit of storage within the database system. It wraps a
/// raw data buffer held in main memory along with the book-keeping used by
/// the buffer pool manager: pin count, dirty flag, and page id.
///
/// The data buffer sits behind a reader-writer lock which doubles as the
/// per-page latch: `read()` takes the read latch, `write()` the write latch.
pub struct Page {
    page_id: PageId,
    data: RwLock<Box<[u8; DB_PAGE_SIZE]>>,
    pin_count: AtomicI32,
    is_dirty: AtomicBool,
}

impl Page {
    /// Constructor. Zeroes out the page data and pins the page once.
    pub fn new(page_id: PageId) -> Self {
        Page {
            page_id,
            data: RwLock::new(Box::new([0; DB_PAGE_SIZE])),
            pin_count: AtomicI32::new(1),
            is_dirty: AtomicBool::new(false),
        }
    }

    pub fn get_page_id(&self) -> PageId {
        self.page_id
    }

    /// Acquires the page read latch and returns a guard over the raw bytes.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8; DB_PAGE_SIZE]>> {
        self.data.read()
    }

    /// Acquires the page write latch and returns a guard over the raw bytes.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8; DB_PAGE_SIZE]>> {
        self.data.write()
    }

    pub fn get_pin_count(&self) -> i32 {
        self.pin_count.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::SeqCst)
    }

    pub fn set_dirty(&self, is_dirty: bool) {
        self.is_dirty.store(is_dirty, Ordering::SeqCst);
    }

    pub(crate) fn increment_pin_count(&self) -> i32 {
        self.pin_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn decrement_pin_count(&self) -> i32 {
        self.pin_count.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_page_is_zeroed_and_pinned() {
        let page = Page::new(5);
        assert_eq!(page.get_page_id(), 5);
        assert_eq!(page.get_pin_count(), 1);
        assert!(!page.is_dirty());
        assert!(page.read().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pin_accounting() {
        let page = Page::new(0);
        assert_eq!(page.increment_pin_count(), 2);
        assert_eq!(page.decrement_pin_count(), 1);
        assert_eq!(page.decrement_pin_count(), 0);
    }

    #[test]
    fn test_latched_writes_visible_to_readers() {
        let page = Page::new(0);
        {
            let mut data = page.write();
            data[10] = 0x5A;
        }
        assert_eq!(page.read()[10], 0x5A);
    }
}
