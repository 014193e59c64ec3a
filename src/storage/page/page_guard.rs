use std::sync::Arc;

use crate::buffer::parallel_buffer_pool::ParallelBufferPool;
use crate::common::config::PageId;
use crate::storage::page::page::{MutRefPageData, Page, RefPageData};

/// RAII wrapper over a pinned page.
///
/// The guard remembers whether the page was written through it and unpins
/// with the right dirty flag when dropped, so early returns cannot leak a
/// pin. Data guards borrow from the page guard and therefore must be
/// released before it goes away.
pub struct PageGuard {
    bpm: Arc<ParallelBufferPool>,
    page: Page,
    is_dirty: bool,
}

impl PageGuard {
    pub fn new(bpm: Arc<ParallelBufferPool>, page: Page) -> PageGuard {
        Self {
            bpm,
            page,
            is_dirty: false,
        }
    }

    pub fn get_page_id(&self) -> PageId {
        // A guarded page is pinned and therefore always holds a valid id.
        self.page.get_page_id().unwrap()
    }

    /// Shared latch over the page content.
    pub fn get_data(&self) -> RefPageData<'_> {
        self.page.get_data()
    }

    /// Exclusive latch over the page content; marks the page dirty.
    pub fn get_data_mut(&mut self) -> MutRefPageData<'_> {
        self.is_dirty = true;
        self.page.get_data_mut()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let page_id = self.get_page_id();
        self.bpm.unpin_page(page_id, self.is_dirty);
    }
}
