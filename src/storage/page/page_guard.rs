use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::PageId;
use crate::storage::page::page::Page;
use std::cell::Cell;
use std::sync::Arc;

/// Scoped view of a pinned page. Holding the guard keeps the page pinned;
/// dropping it releases exactly one pin, passing along the dirty flag the
/// holder set. Guarantees the fetch/unpin pairing on every exit path.
pub struct PageGuard {
    bpm: Arc<BufferPoolManager>,
    page: Arc<Page>,
    dirty: Cell<bool>,
}

impl PageGuard {
    pub fn new(bpm: Arc<BufferPoolManager>, page: Arc<Page>) -> Self {
        Self {
            bpm,
            page,
            dirty: Cell::new(false),
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn get_page_id(&self) -> PageId {
        self.page.get_page_id()
    }

    /// Records that the holder modified the page; the unpin on drop will
    /// carry the dirty flag.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page.get_page_id(), self.dirty.get());
    }
}
