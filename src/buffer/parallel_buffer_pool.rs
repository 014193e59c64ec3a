use std::sync::Arc;

use parking_lot::Mutex;

use super::buffer_pool_instance::BufferPoolInstance;
use crate::common::config::PageId;
use crate::storage::disk::DiskManager;
use crate::storage::page::{Page, PageGuard};

/// Front-end sharding pages across several [`BufferPoolInstance`]s.
///
/// Every per-page call is routed to the owning instance by
/// `page_id mod num_instances`; since each instance allocates ids in its own
/// residue class, routing needs no shared state at all. Only the round-robin
/// allocation cursor is latched.
pub struct ParallelBufferPool {
    instances: Vec<BufferPoolInstance>,
    /// Instance to try first on the next `new_page`.
    start_new_page_idx: Mutex<usize>,
}

impl ParallelBufferPool {
    pub fn new(
        num_instances: usize,
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
    ) -> ParallelBufferPool {
        assert!(num_instances > 0);
        Self {
            instances: (0..num_instances)
                .map(|i| {
                    BufferPoolInstance::new(pool_size, num_instances, i, disk_manager.clone())
                })
                .collect(),
            start_new_page_idx: Mutex::new(0),
        }
    }

    /// Total number of frames across all instances.
    pub fn get_pool_size(&self) -> usize {
        self.instances.len() * self.instances[0].get_pool_size()
    }

    pub fn get_num_instances(&self) -> usize {
        self.instances.len()
    }

    /// The instance responsible for the given page id.
    fn instance_for(&self, page_id: PageId) -> &BufferPoolInstance {
        &self.instances[page_id as usize % self.instances.len()]
    }

    /// Allocates a new pinned page, trying each instance round-robin from
    /// the cursor until one has a frame. Returns `None` once every instance
    /// refused.
    pub fn new_page(&self) -> Option<Page> {
        let mut start = self.start_new_page_idx.lock();
        for _ in 0..self.instances.len() {
            let idx = *start;
            *start = (*start + 1) % self.instances.len();
            if let Some(page) = self.instances[idx].new_page() {
                return Some(page);
            }
        }
        None
    }

    pub fn fetch_page(&self, page_id: PageId) -> Option<Page> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> bool {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> bool {
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_all_pages(&self) {
        for instance in &self.instances {
            instance.flush_all_pages();
        }
    }

    /// Like [`ParallelBufferPool::new_page`], wrapped in a guard that unpins
    /// on drop.
    pub fn new_page_guarded(self: &Arc<Self>) -> Option<PageGuard> {
        let page = self.new_page()?;
        Some(PageGuard::new(self.clone(), page))
    }

    /// Like [`ParallelBufferPool::fetch_page`], wrapped in a guard that
    /// unpins on drop.
    pub fn fetch_page_guarded(self: &Arc<Self>, page_id: PageId) -> Option<PageGuard> {
        let page = self.fetch_page(page_id)?;
        Some(PageGuard::new(self.clone(), page))
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn parallel_pool(dir: &TempDir, num_instances: usize, pool_size: usize) -> ParallelBufferPool {
        let db_name = dir.path().join("test.db");
        let disk_manager = Arc::new(DiskManager::new(db_name.to_str().unwrap()));
        ParallelBufferPool::new(num_instances, pool_size, disk_manager)
    }

    #[test]
    fn allocation_respects_residue_classes() {
        let dir = TempDir::new("test").unwrap();
        let num_instances = 5;
        let bpm = parallel_pool(&dir, num_instances, 3);
        assert_eq!(15, bpm.get_pool_size());

        // Round-robin allocation visits every instance once per lap, so ids
        // come out 0, 1, 2, ... while the pool has room.
        for expected in 0..num_instances as PageId {
            let page = bpm.new_page().unwrap();
            assert_eq!(Some(expected), page.get_page_id());
        }

        // Second lap hands out each instance's next id in its class.
        for expected in num_instances as PageId..2 * num_instances as PageId {
            let page = bpm.new_page().unwrap();
            assert_eq!(Some(expected), page.get_page_id());
        }
    }

    #[test]
    fn new_page_skips_full_instances() {
        let dir = TempDir::new("test").unwrap();
        let bpm = parallel_pool(&dir, 2, 1);

        // Fill both single-frame instances.
        let p0 = bpm.new_page().unwrap();
        let p1 = bpm.new_page().unwrap();
        assert!(bpm.new_page().is_none());

        // Free the frame of instance 0 only; the cursor still walks the ring
        // and finds it.
        let id0 = p0.get_page_id().unwrap();
        assert!(bpm.unpin_page(id0, false));
        let p2 = bpm.new_page().unwrap();
        assert_eq!(0, p2.get_page_id().unwrap() as usize % 2);

        drop(p1);
    }

    #[test]
    fn per_page_calls_route_by_modulus() {
        let dir = TempDir::new("test").unwrap();
        let bpm = parallel_pool(&dir, 3, 4);

        let mut ids = Vec::new();
        for _ in 0..6 {
            let page = bpm.new_page().unwrap();
            let id = page.get_page_id().unwrap();
            page.get_data_mut()[0] = id as u8 + 1;
            ids.push(id);
        }
        for &id in &ids {
            assert!(bpm.unpin_page(id, true));
        }
        bpm.flush_all_pages();

        for &id in &ids {
            let page = bpm.fetch_page(id).unwrap();
            assert_eq!(id as u8 + 1, page.get_data()[0]);
            assert!(bpm.unpin_page(id, false));
        }

        assert!(bpm.delete_page(ids[0]));
        assert!(!bpm.unpin_page(ids[0], false));
    }

    #[test]
    fn guards_unpin_on_drop() {
        let dir = TempDir::new("test").unwrap();
        let bpm = Arc::new(parallel_pool(&dir, 2, 1));

        let page_id = {
            let mut guard = bpm.new_page_guarded().unwrap();
            guard.get_data_mut()[..2].copy_from_slice(b"ok");
            guard.get_page_id()
        };

        // Both frames must be reusable now that the guard is gone.
        let g1 = bpm.new_page_guarded().unwrap();
        let g2 = bpm.new_page_guarded().unwrap();
        drop(g1);
        drop(g2);

        let guard = bpm.fetch_page_guarded(page_id).unwrap();
        assert_eq!(b"ok", &guard.get_data()[..2]);
    }
}
