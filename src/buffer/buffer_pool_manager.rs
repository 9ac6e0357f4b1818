use crate::buffer::lru_k_replacer::LRUKReplacer;
use crate::common::config::{FrameId, PageId};
use crate::storage::disk::disk_manager::DiskManager;
use crate::storage::page::page::Page;
use crate::storage::page::page_guard::PageGuard;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Manages the frames of in-memory pages, moving them to and from disk
/// through the `DiskManager` and choosing eviction victims with an LRU-K
/// replacer. Pages are handed out pinned; callers pair every `new_page` /
/// `fetch_page` with exactly one `unpin_page`.
pub struct BufferPoolManager {
    pool_size: usize,
    next_page_id: AtomicI32,
    disk_manager: Arc<dyn DiskManager>,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    frames: Vec<Option<Arc<Page>>>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LRUKReplacer,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<dyn DiskManager>, replacer: LRUKReplacer) -> Self {
        Self {
            pool_size,
            next_page_id: AtomicI32::new(0),
            disk_manager,
            inner: Mutex::new(PoolInner {
                frames: vec![None; pool_size],
                page_table: HashMap::with_capacity(pool_size),
                free_list: (0..pool_size).collect(),
                replacer,
            }),
        }
    }

    pub fn get_pool_size(&self) -> usize {
        self.pool_size
    }

    /// Creates and pins a brand-new page. Returns `None` when every frame is
    /// pinned.
    pub fn new_page(&self) -> Option<Arc<Page>> {
        let mut inner = self.inner.lock();
        let frame_id = self.acquire_frame(&mut inner)?;

        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);
        let page = Arc::new(Page::new(page_id));
        debug!("allocated page {} in frame {}", page_id, frame_id);

        inner.frames[frame_id] = Some(Arc::clone(&page));
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);
        Some(page)
    }

    /// Fetches and pins the page with `page_id`, reading it from disk when it
    /// is not resident. Returns `None` when it would need a frame and every
    /// frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Option<Arc<Page>> {
        let mut inner = self.inner.lock();

        if let Some(frame_id) = inner.page_table.get(&page_id).copied() {
            let page = inner.frames[frame_id].clone()?;
            page.increment_pin_count();
            inner.replacer.record_access(frame_id);
            inner.replacer.set_evictable(frame_id, false);
            return Some(page);
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let page = Arc::new(Page::new(page_id));
        {
            let mut data = page.write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut data) {
                warn!("failed to read page {} from disk: {}", page_id, e);
                inner.free_list.push_back(frame_id);
                return None;
            }
        }

        inner.frames[frame_id] = Some(Arc::clone(&page));
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);
        Some(page)
    }

    /// Creates a new page wrapped in a guard that unpins on drop.
    pub fn new_page_guarded(self: &Arc<Self>) -> Option<PageGuard> {
        let page = self.new_page()?;
        Some(PageGuard::new(Arc::clone(self), page))
    }

    /// Fetches a page wrapped in a guard that unpins on drop.
    pub fn fetch_page_guarded(self: &Arc<Self>, page_id: PageId) -> Option<PageGuard> {
        let page = self.fetch_page(page_id)?;
        Some(PageGuard::new(Arc::clone(self), page))
    }

    /// Releases one pin on `page_id`, ORing in the dirty flag. Once the pin
    /// count reaches zero the frame becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let Some(page) = inner.frames[frame_id].clone() else {
            return false;
        };
        if page.get_pin_count() <= 0 {
            warn!("unpin of page {} with no outstanding pins", page_id);
            return false;
        }
        if is_dirty {
            page.set_dirty(true);
        }
        if page.decrement_pin_count() == 0 {
            inner.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Drops `page_id` from the pool and frees its frame. Fails while the
    /// page is pinned. Deleting a non-resident page is a no-op success.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return true;
        };
        if let Some(page) = inner.frames[frame_id].as_ref() {
            if page.get_pin_count() > 0 {
                return false;
            }
        }
        inner.page_table.remove(&page_id);
        inner.frames[frame_id] = None;
        inner.replacer.remove(frame_id);
        inner.free_list.push_back(frame_id);
        debug!("deleted page {} from frame {}", page_id, frame_id);
        true
    }

    /// Writes `page_id` back to disk and clears its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let Some(page) = inner.frames[frame_id].as_ref() else {
            return false;
        };
        let data = page.read();
        if self.disk_manager.write_page(page_id, &data).is_err() {
            return false;
        }
        page.set_dirty(false);
        true
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) {
        let inner = self.inner.lock();
        for page in inner.frames.iter().flatten() {
            let data = page.read();
            if let Err(e) = self.disk_manager.write_page(page.get_page_id(), &data) {
                warn!("failed to flush page {}: {}", page.get_page_id(), e);
                continue;
            }
            page.set_dirty(false);
        }
    }

    /// Finds a frame for a new resident page, evicting (and writing back) a
    /// victim if the free list is empty.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Option<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Some(frame_id);
        }

        let frame_id = inner.replacer.evict()?;
        if let Some(old_page) = inner.frames[frame_id].take() {
            let old_page_id = old_page.get_page_id();
            if old_page.is_dirty() {
                let data = old_page.read();
                if let Err(e) = self.disk_manager.write_page(old_page_id, &data) {
                    warn!("failed to write back evicted page {}: {}", old_page_id, e);
                }
            }
            inner.page_table.remove(&old_page_id);
            debug!("evicted page {} from frame {}", old_page_id, frame_id);
        }
        Some(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::DB_PAGE_SIZE;
    use crate::common::logger::initialize_logger;
    use crate::storage::disk::disk_manager::FileDiskManager;
    use tempfile::TempDir;

    fn make_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, TempDir) {
        initialize_logger();
        let temp_dir = TempDir::new().unwrap();
        let disk_manager =
            Arc::new(FileDiskManager::new(temp_dir.path().join("test.db")).unwrap());
        let replacer = LRUKReplacer::new(pool_size, 2);
        let bpm = Arc::new(BufferPoolManager::new(pool_size, disk_manager, replacer));
        (bpm, temp_dir)
    }

    #[test]
    fn test_new_page_until_pool_exhausted() {
        let (bpm, _temp_dir) = make_bpm(3);

        let pages: Vec<_> = (0..3).map(|_| bpm.new_page().unwrap()).collect();
        assert!(bpm.new_page().is_none());

        // Unpinning one page frees a frame for the next allocation.
        assert!(bpm.unpin_page(pages[0].get_page_id(), false));
        assert!(bpm.new_page().is_some());
    }

    #[test]
    fn test_data_survives_eviction() {
        let (bpm, _temp_dir) = make_bpm(2);

        let page = bpm.new_page().unwrap();
        let page_id = page.get_page_id();
        {
            let mut data = page.write();
            data[0..5].copy_from_slice(b"hello");
        }
        assert!(bpm.unpin_page(page_id, true));

        // Churn through enough pages to evict the original.
        for _ in 0..4 {
            let p = bpm.new_page().unwrap();
            assert!(bpm.unpin_page(p.get_page_id(), false));
        }

        let page = bpm.fetch_page(page_id).unwrap();
        assert_eq!(&page.read()[0..5], b"hello");
        assert!(bpm.unpin_page(page_id, false));
    }

    #[test]
    fn test_pinned_page_not_evicted() {
        let (bpm, _temp_dir) = make_bpm(2);

        let pinned = bpm.new_page().unwrap();
        let other = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(other.get_page_id(), false));

        // Only one frame is evictable; the pinned page must survive.
        for _ in 0..3 {
            let p = bpm.new_page().unwrap();
            assert!(bpm.unpin_page(p.get_page_id(), false));
        }
        assert_eq!(pinned.get_pin_count(), 1);
        assert!(bpm.fetch_page(pinned.get_page_id()).is_some());
        assert!(bpm.unpin_page(pinned.get_page_id(), false));
        assert!(bpm.unpin_page(pinned.get_page_id(), false));
    }

    #[test]
    fn test_delete_page_requires_zero_pins() {
        let (bpm, _temp_dir) = make_bpm(2);

        let page = bpm.new_page().unwrap();
        let page_id = page.get_page_id();
        assert!(!bpm.delete_page(page_id));

        assert!(bpm.unpin_page(page_id, false));
        assert!(bpm.delete_page(page_id));

        // The freed frame is reusable immediately.
        assert!(bpm.new_page().is_some());
    }

    #[test]
    fn test_unpin_unknown_page() {
        let (bpm, _temp_dir) = make_bpm(2);
        assert!(!bpm.unpin_page(99, false));
    }

    #[test]
    fn test_guard_unpins_on_drop() {
        let (bpm, _temp_dir) = make_bpm(2);

        let page_id = {
            let guard = bpm.new_page_guarded().unwrap();
            assert_eq!(guard.page().get_pin_count(), 1);
            guard.get_page_id()
        };

        // Guard dropped: the page is unpinned and deletable.
        assert!(bpm.delete_page(page_id));
    }

    #[test]
    fn test_flush_page_writes_through() {
        let (bpm, _temp_dir) = make_bpm(2);

        let page = bpm.new_page().unwrap();
        let page_id = page.get_page_id();
        {
            let mut data = page.write();
            data[0] = 0x7E;
        }
        assert!(bpm.unpin_page(page_id, true));
        assert!(bpm.flush_page(page_id));
        assert!(!page.is_dirty());

        let mut raw = [0u8; DB_PAGE_SIZE];
        // Fetch again after flush; contents must match.
        let fetched = bpm.fetch_page(page_id).unwrap();
        raw.copy_from_slice(&**fetched.read());
        assert_eq!(raw[0], 0x7E);
        assert!(bpm.unpin_page(page_id, false));
    }
}
