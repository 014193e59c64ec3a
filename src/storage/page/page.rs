use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::common::config::{PageId, PAGE_SIZE};

pub type RefPageData<'a> = MappedRwLockReadGuard<'a, [u8; PAGE_SIZE]>;
pub type MutRefPageData<'a> = MappedRwLockWriteGuard<'a, [u8; PAGE_SIZE]>;

/// Page is the basic unit of storage within the database system. It wraps an
/// in-memory copy of a disk page together with the book-keeping the buffer
/// pool needs: page id, pin count and dirty flag.
///
/// The inner `RwLock` doubles as the page latch. `get_data` holds a shared
/// latch for as long as the returned guard lives, `get_data_mut` an exclusive
/// one. Callers must drop any data guard before unpinning the page, since
/// pin-count updates also go through the lock.
#[derive(Debug, Clone)]
pub struct Page(Arc<RwLock<PageInner>>);

#[derive(Debug)]
struct PageInner {
    // In-memory copy of the page's bytes.
    data: [u8; PAGE_SIZE],

    // Id of the page currently held, `None` while the frame is free.
    page_id: Option<PageId>,

    // Number of pins preventing this page from being evicted.
    pin_count: i32,

    // True if the in-memory bytes differ from the on-disk copy.
    is_dirty: bool,
}

impl Page {
    /// Creates a free page with zeroed content.
    pub fn new() -> Page {
        let inner = PageInner {
            data: [0; PAGE_SIZE],
            page_id: None,
            pin_count: 0,
            is_dirty: false,
        };
        Page(Arc::new(RwLock::new(inner)))
    }

    /// Returns the frame to its freshly-constructed state.
    pub fn reset(&self) {
        let mut p = self.0.write();
        p.data.fill(0);
        p.page_id = None;
        p.pin_count = 0;
        p.is_dirty = false;
    }

    /// Shared latch over the page content.
    pub fn get_data(&self) -> RefPageData<'_> {
        RwLockReadGuard::map(self.0.read(), |i| &i.data)
    }

    /// Exclusive latch over the page content.
    pub fn get_data_mut(&self) -> MutRefPageData<'_> {
        RwLockWriteGuard::map(self.0.write(), |i| &mut i.data)
    }

    pub fn set_page_id(&self, page_id: PageId) {
        self.0.write().page_id = Some(page_id);
    }

    pub fn get_page_id(&self) -> Option<PageId> {
        self.0.read().page_id
    }

    pub fn get_pin_count(&self) -> i32 {
        self.0.read().pin_count
    }

    pub fn pin(&self) {
        self.0.write().pin_count += 1;
    }

    pub fn unpin(&self) {
        self.0.write().pin_count -= 1;
    }

    pub fn is_dirty(&self) -> bool {
        self.0.read().is_dirty
    }

    pub fn set_dirty(&self, is_dirty: bool) {
        self.0.write().is_dirty = is_dirty;
    }
}

impl Default for Page {
    fn default() -> Page {
        Page::new()
    }
}
