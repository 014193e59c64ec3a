use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::lru_replacer::LruReplacer;
use crate::common::config::{FrameId, PageId, INVALID_PAGE_ID};
use crate::storage::disk::{DiskManager, DiskRequest, DiskScheduler};
use crate::storage::page::Page;

/// One shard of the buffer pool: a fixed arena of frames caching disk pages,
/// with an LRU replacer picking eviction victims among the unpinned ones.
///
/// Every operation is serialized by the single `state` latch; disk I/O for
/// victim write-back and page reads happens while it is held, which is an
/// accepted cost for this engine.
pub struct BufferPoolInstance {
    /// Number of frames in this instance.
    pool_size: usize,
    /// Total number of instances in the owning parallel pool.
    num_instances: usize,
    /// Which shard this instance is; allocated page ids fall in the residue
    /// class `instance_index` modulo `num_instances`.
    instance_index: usize,

    /// Frame arena. Fixed at construction; frames are reused, never moved.
    pages: Vec<Page>,
    /// Worker draining this instance's disk traffic.
    disk_scheduler: DiskScheduler,
    disk_manager: Arc<DiskManager>,
    /// Page table, free list, replacer and allocation cursor.
    state: Mutex<PoolState>,
}

struct PoolState {
    /// Maps resident page ids to the frame holding them.
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page at all. Consulted before the replacer.
    free_list: VecDeque<FrameId>,
    /// Tracks unpinned frames for eviction.
    replacer: LruReplacer,
    /// Next page id this instance will hand out.
    next_page_id: PageId,
}

impl BufferPoolInstance {
    pub fn new(
        pool_size: usize,
        num_instances: usize,
        instance_index: usize,
        disk_manager: Arc<DiskManager>,
    ) -> BufferPoolInstance {
        assert!(num_instances > 0, "a standalone instance is a pool of one");
        assert!(
            instance_index < num_instances,
            "instance index out of range for the pool"
        );
        Self {
            pool_size,
            num_instances,
            instance_index,
            pages: (0..pool_size).map(|_| Page::new()).collect(),
            disk_scheduler: DiskScheduler::new(disk_manager.clone()),
            disk_manager,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list: (0..pool_size).collect(),
                replacer: LruReplacer::new(pool_size),
                next_page_id: instance_index as PageId,
            }),
        }
    }

    /// Number of frames in this instance.
    pub fn get_pool_size(&self) -> usize {
        self.pool_size
    }

    /// Creates a brand-new page and pins it. The frame comes from the free
    /// list if possible, otherwise a victim is evicted (written back first if
    /// dirty). The new page is zeroed, never read from disk. Returns `None`
    /// if every frame is pinned.
    pub fn new_page(&self) -> Option<Page> {
        let mut state = self.state.lock();
        let frame_id = self.find_victim(&mut state)?;

        let page_id = Self::allocate_page(
            &mut state,
            self.num_instances,
            self.instance_index,
        );
        let page = &self.pages[frame_id];
        page.set_page_id(page_id);
        page.pin();
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        Some(page.clone())
    }

    /// Returns the requested page pinned, reading it from disk if it is not
    /// resident. Returns `None` if it would need a frame and every frame is
    /// pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Option<Page> {
        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let page = &self.pages[frame_id];
            page.pin();
            state.replacer.pin(frame_id);
            return Some(page.clone());
        }

        let frame_id = self.find_victim(&mut state)?;
        let page = &self.pages[frame_id];
        page.set_page_id(page_id);
        page.pin();
        self.schedule_read(page);
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        Some(page.clone())
    }

    /// Drops one pin from the page. `is_dirty` is OR-combined into the
    /// frame's dirty flag, never cleared here. When the pin count reaches
    /// zero the frame becomes evictable. Returns false if the page is not
    /// resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let page = &self.pages[frame_id];
        if page.get_pin_count() <= 0 {
            return false;
        }
        // Another user of this page may have dirtied it already, so a clean
        // unpin must not clear the flag.
        if is_dirty {
            page.set_dirty(true);
        }
        page.unpin();
        if page.get_pin_count() == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes the page out regardless of its dirty flag and clears the flag.
    /// Pin state is untouched. Returns false for invalid or non-resident
    /// page ids.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        if page_id == INVALID_PAGE_ID {
            return false;
        }
        let state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let page = &self.pages[frame_id];
        self.schedule_write(page);
        page.set_dirty(false);
        true
    }

    /// Writes every resident page out, establishing a durability point.
    pub fn flush_all_pages(&self) {
        let state = self.state.lock();
        for &frame_id in state.page_table.values() {
            let page = &self.pages[frame_id];
            self.schedule_write(page);
            page.set_dirty(false);
        }
    }

    /// Removes a page from the pool and reports its id as free. Returns true
    /// if the page was not resident (nothing to do) or was deleted; false if
    /// it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };
        let page = &self.pages[frame_id];
        if page.get_pin_count() > 0 {
            return false;
        }
        if page.is_dirty() {
            self.schedule_write(page);
        }
        state.page_table.remove(&page_id);
        state.replacer.pin(frame_id);
        page.reset();
        state.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        true
    }

    /// Picks a frame for reuse: free list first, then the replacer. Evicted
    /// dirty pages are written back before the frame is handed out. `None`
    /// when every frame is pinned.
    fn find_victim(&self, state: &mut PoolState) -> Option<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Some(frame_id);
        }
        let frame_id = state.replacer.victim()?;
        let page = &self.pages[frame_id];
        if page.is_dirty() {
            self.schedule_write(page);
        }
        state.page_table.remove(&page.get_page_id().unwrap());
        page.reset();
        Some(frame_id)
    }

    fn allocate_page(
        state: &mut PoolState,
        num_instances: usize,
        instance_index: usize,
    ) -> PageId {
        let page_id = state.next_page_id;
        state.next_page_id += num_instances as PageId;
        debug_assert_eq!(page_id as usize % num_instances, instance_index);
        page_id
    }

    fn schedule_write(&self, page: &Page) {
        let (tx, rx) = oneshot::channel();
        self.disk_scheduler.schedule(DiskRequest::Write {
            page: page.clone(),
            callback: tx,
        });
        rx.blocking_recv().unwrap();
    }

    fn schedule_read(&self, page: &Page) {
        let (tx, rx) = oneshot::channel();
        self.disk_scheduler.schedule(DiskRequest::Read {
            page: page.clone(),
            callback: tx,
        });
        rx.blocking_recv().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use rand::distributions::{Distribution, Uniform};
    use tempdir::TempDir;

    use super::*;
    use crate::common::config::PAGE_SIZE;

    fn single_instance(dir: &TempDir, pool_size: usize) -> BufferPoolInstance {
        let db_name = dir.path().join("test.db");
        let disk_manager = Arc::new(DiskManager::new(db_name.to_str().unwrap()));
        BufferPoolInstance::new(pool_size, 1, 0, disk_manager)
    }

    #[test]
    fn binary_data_roundtrip() {
        let dir = TempDir::new("test").unwrap();
        let buffer_pool_size = 10;
        let bpm = single_instance(&dir, buffer_pool_size);

        let mut rng = rand::thread_rng();
        let uniform_dist = Uniform::from(u8::MIN..=u8::MAX);

        let page0 = bpm.new_page();

        // Scenario: The buffer pool is empty. We should be able to create a new page.
        assert!(page0.is_some());

        let mut random_binary_data: Vec<u8> =
            (0..PAGE_SIZE).map(|_| uniform_dist.sample(&mut rng)).collect();

        // Insert terminal characters both in the middle and at the end.
        random_binary_data[PAGE_SIZE / 2] = 0;
        random_binary_data[PAGE_SIZE - 1] = 0;

        // Scenario: Once we have a page, we should be able to read and write content.
        let page0 = page0.unwrap();
        page0.get_data_mut().copy_from_slice(&random_binary_data);
        assert_eq!(random_binary_data.as_slice(), &page0.get_data()[..]);

        // Scenario: We should be able to create new pages until we fill up the
        // buffer pool.
        for _i in 1..buffer_pool_size {
            assert!(bpm.new_page().is_some());
        }

        // Scenario: Once the buffer pool is full, we should not be able to
        // create any new pages.
        for _i in buffer_pool_size..buffer_pool_size * 2 {
            assert!(bpm.new_page().is_none());
        }

        // Scenario: After unpinning pages {0, 1, 2, 3, 4} we should be able to
        // create 5 new pages.
        for i in 0..5 {
            assert!(bpm.unpin_page(i, true));
            bpm.flush_page(i);
        }
        for _i in 0..5 {
            let page = bpm.new_page();
            assert!(page.is_some());
            // Unpin here to allow future fetching.
            bpm.unpin_page(page.unwrap().get_page_id().unwrap(), false);
        }

        // Scenario: We should be able to fetch the data we wrote a while ago.
        let page0 = bpm.fetch_page(0);
        assert!(page0.is_some());
        let page0 = page0.unwrap();
        assert_eq!(random_binary_data.as_slice(), &page0.get_data()[..]);
        assert!(bpm.unpin_page(0, true));
    }

    #[test]
    fn pin_evict_fetch_cycle() {
        let dir = TempDir::new("test").unwrap();
        let buffer_pool_size = 10;
        let bpm = single_instance(&dir, buffer_pool_size);

        let page0 = bpm.new_page();

        // Scenario: The buffer pool is empty. We should be able to create a new page.
        assert!(page0.is_some());
        assert_eq!(Some(0), page0.as_ref().unwrap().get_page_id());

        // Scenario: Once we have a page, we should be able to read and write content.
        let page0 = page0.unwrap();
        let data = "Hello".as_bytes();
        page0.get_data_mut()[..data.len()].copy_from_slice(data);
        assert_eq!(data, &(page0.get_data())[..data.len()]);

        // Scenario: We should be able to create new pages until we fill up the
        // buffer pool.
        for _i in 1..buffer_pool_size {
            assert!(bpm.new_page().is_some());
        }

        // Scenario: Once the buffer pool is full, we should not be able to
        // create any new pages.
        for _i in buffer_pool_size..buffer_pool_size * 2 {
            assert!(bpm.new_page().is_none());
        }

        // Scenario: After unpinning pages {0, 1, 2, 3, 4} and pinning another
        // 4 new pages, there would still be one buffer page left for reading
        // page 0.
        for i in 0..5 {
            assert!(bpm.unpin_page(i as PageId, true));
        }
        for _i in 0..4 {
            assert!(bpm.new_page().is_some());
        }

        // Scenario: We should be able to fetch the data we wrote a while ago.
        let page0 = bpm.fetch_page(0);
        assert!(page0.is_some());
        let page0 = page0.unwrap();
        assert_eq!(data, &(page0.get_data())[..data.len()]);

        // Scenario: If we unpin page 0 and then make a new page, all the
        // buffer pages should now be pinned. Fetching page 0 again should fail.
        assert!(bpm.unpin_page(0, true));
        assert!(bpm.new_page().is_some());
        assert!(bpm.fetch_page(0).is_none());
    }

    #[test]
    fn unpin_protocol() {
        let dir = TempDir::new("test").unwrap();
        let bpm = single_instance(&dir, 2);

        let page0 = bpm.new_page().unwrap();
        let page_id = page0.get_page_id().unwrap();

        // Double unpin fails rather than underflowing the pin count.
        assert!(bpm.unpin_page(page_id, false));
        assert!(!bpm.unpin_page(page_id, false));

        // Unpinning a page that is not resident fails.
        assert!(!bpm.unpin_page(999, false));

        // A clean unpin must not wipe out dirtiness recorded earlier.
        let page0 = bpm.fetch_page(page_id).unwrap();
        let _second_pin = bpm.fetch_page(page_id).unwrap();
        page0.get_data_mut()[0] = 42;
        assert!(bpm.unpin_page(page_id, true));
        assert!(bpm.unpin_page(page_id, false));
        assert!(page0.is_dirty());
    }

    #[test]
    fn flush_clears_dirty_and_persists() {
        let dir = TempDir::new("test").unwrap();
        let db_name = dir.path().join("test.db");
        let disk_manager = Arc::new(DiskManager::new(db_name.to_str().unwrap()));
        let bpm = BufferPoolInstance::new(2, 1, 0, disk_manager.clone());

        assert!(!bpm.flush_page(INVALID_PAGE_ID));
        assert!(!bpm.flush_page(3));

        let page0 = bpm.new_page().unwrap();
        let page_id = page0.get_page_id().unwrap();
        page0.get_data_mut()[..5].copy_from_slice(b"fnord");
        bpm.unpin_page(page_id, true);

        assert!(bpm.flush_page(page_id));
        assert!(!page0.is_dirty());

        let mut buf = [0u8; PAGE_SIZE];
        disk_manager.read_page(page_id, &mut buf);
        assert_eq!(b"fnord", &buf[..5]);
    }

    #[test]
    fn delete_page_contract() {
        let dir = TempDir::new("test").unwrap();
        let bpm = single_instance(&dir, 2);

        // Deleting a page that is not resident succeeds trivially.
        assert!(bpm.delete_page(77));

        let page0 = bpm.new_page().unwrap();
        let page_id = page0.get_page_id().unwrap();

        // Pinned pages cannot be deleted.
        assert!(!bpm.delete_page(page_id));

        bpm.unpin_page(page_id, true);
        assert!(bpm.delete_page(page_id));
        assert_eq!(None, page0.get_page_id());

        // The freed frame is usable again.
        assert!(bpm.new_page().is_some());
        assert!(bpm.new_page().is_some());
    }
}
