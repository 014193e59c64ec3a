use std::collections::HashMap;

use itertools::Itertools;
use tracing::{debug, warn};

use crate::common::config::PageId;

/// Deepest directory the page layout supports; the directory arrays are
/// sized for `2^MAX_BUCKET_DEPTH` entries.
pub const MAX_BUCKET_DEPTH: u32 = 9;
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_BUCKET_DEPTH;

const OFFSET_PAGE_ID: usize = 0;
const OFFSET_LSN: usize = 4;
const OFFSET_GLOBAL_DEPTH: usize = 8;
const OFFSET_BUCKET_PAGE_IDS: usize = 12;
const OFFSET_LOCAL_DEPTHS: usize = OFFSET_BUCKET_PAGE_IDS + 4 * DIRECTORY_ARRAY_SIZE;

/// Directory page of an extendible hash table, viewed over the raw bytes of
/// a buffer-pool page.
///
/// Layout (little-endian): page id (4), LSN (4), global depth (4, low byte
/// significant), `DIRECTORY_ARRAY_SIZE` bucket page ids (4 each), then one
/// local-depth byte per directory slot. The view borrows the bytes; the
/// buffer pool keeps owning them.
pub struct HashTableDirectoryPage<T> {
    data: T,
}

impl<T: AsRef<[u8]>> HashTableDirectoryPage<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }

    pub fn get_page_id(&self) -> PageId {
        self.read_i32(OFFSET_PAGE_ID)
    }

    pub fn get_lsn(&self) -> i32 {
        self.read_i32(OFFSET_LSN)
    }

    pub fn get_global_depth(&self) -> u32 {
        self.read_i32(OFFSET_GLOBAL_DEPTH) as u32
    }

    /// Mask of `global_depth` ones from the LSB upwards; a key's directory
    /// slot is `hash & mask`.
    pub fn get_global_depth_mask(&self) -> u32 {
        (1 << self.get_global_depth()) - 1
    }

    /// Directory slot a hash value falls into.
    pub fn index_of(&self, hash: u32) -> usize {
        (hash & self.get_global_depth_mask()) as usize
    }

    /// Current number of directory slots, `2^global_depth`.
    pub fn size(&self) -> usize {
        1 << self.get_global_depth()
    }

    pub fn get_bucket_page_id(&self, bucket_idx: usize) -> PageId {
        self.read_i32(OFFSET_BUCKET_PAGE_IDS + 4 * bucket_idx)
    }

    pub fn get_local_depth(&self, bucket_idx: usize) -> u32 {
        self.data.as_ref()[OFFSET_LOCAL_DEPTHS + bucket_idx] as u32
    }

    /// Sibling slot produced by the most recent split of this bucket: the
    /// index with the highest locally-distinguished bit flipped.
    pub fn get_split_image_index(&self, bucket_idx: usize) -> usize {
        let local_depth = self.get_local_depth(bucket_idx);
        debug_assert!(local_depth > 0, "a depth-0 bucket has no split image");
        bucket_idx ^ (1 << (local_depth - 1))
    }

    /// True iff every local depth is strictly below the global depth, i.e.
    /// the upper directory half carries no information.
    pub fn can_shrink(&self) -> bool {
        (0..self.size()).all(|idx| self.get_local_depth(idx) < self.get_global_depth())
    }

    /// Asserts the directory invariants: every local depth bounded by the
    /// global depth, a single local depth per bucket page, and each bucket
    /// page referenced from exactly `2^(global_depth - local_depth)` slots.
    pub fn verify_integrity(&self) {
        let global_depth = self.get_global_depth();
        let mut page_id_to_ld: HashMap<PageId, u32> = HashMap::new();

        for idx in 0..self.size() {
            let page_id = self.get_bucket_page_id(idx);
            let local_depth = self.get_local_depth(idx);
            assert!(local_depth <= global_depth);

            if let Some(&ld) = page_id_to_ld.get(&page_id) {
                if ld != local_depth {
                    warn!(
                        "inconsistent local depth for page {}: {} vs {}",
                        page_id, local_depth, ld
                    );
                    self.print_directory();
                    panic!("bucket page {} has two local depths", page_id);
                }
            } else {
                page_id_to_ld.insert(page_id, local_depth);
            }
        }

        let counts = (0..self.size())
            .map(|idx| self.get_bucket_page_id(idx))
            .counts();
        for (page_id, count) in counts {
            let required = 1usize << (global_depth - page_id_to_ld[&page_id]);
            if count != required {
                warn!(
                    "page {} referenced {} times, expected {}",
                    page_id, count, required
                );
                self.print_directory();
                panic!("bucket page {} has the wrong reference count", page_id);
            }
        }
    }

    pub fn print_directory(&self) {
        debug!("======== directory (global_depth: {}) ========", self.get_global_depth());
        debug!("| bucket_idx | page_id | local_depth |");
        for idx in 0..self.size() {
            debug!(
                "| {} | {} | {} |",
                idx,
                self.get_bucket_page_id(idx),
                self.get_local_depth(idx)
            );
        }
        debug!("================ end directory ================");
    }

    fn read_i32(&self, offset: usize) -> i32 {
        i32::from_le_bytes(self.data.as_ref()[offset..offset + 4].try_into().unwrap())
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> HashTableDirectoryPage<T> {
    pub fn set_page_id(&mut self, page_id: PageId) {
        self.write_i32(OFFSET_PAGE_ID, page_id);
    }

    pub fn set_lsn(&mut self, lsn: i32) {
        self.write_i32(OFFSET_LSN, lsn);
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: usize, bucket_page_id: PageId) {
        self.write_i32(OFFSET_BUCKET_PAGE_IDS + 4 * bucket_idx, bucket_page_id);
    }

    pub fn set_local_depth(&mut self, bucket_idx: usize, local_depth: u32) {
        debug_assert!(local_depth <= self.get_global_depth());
        self.data.as_mut()[OFFSET_LOCAL_DEPTHS + bucket_idx] = local_depth as u8;
    }

    /// Doubles the directory: every new slot `i + 2^global_depth` starts out
    /// pointing at the same bucket, with the same local depth, as slot `i`.
    /// No bucket data moves.
    pub fn incr_global_depth(&mut self) {
        let global_depth = self.get_global_depth();
        assert!(global_depth < MAX_BUCKET_DEPTH);
        let old_size = self.size();
        for idx in 0..old_size {
            let page_id = self.get_bucket_page_id(idx);
            let local_depth = self.get_local_depth(idx);
            self.set_bucket_page_id(old_size + idx, page_id);
            self.data.as_mut()[OFFSET_LOCAL_DEPTHS + old_size + idx] = local_depth as u8;
        }
        self.write_i32(OFFSET_GLOBAL_DEPTH, (global_depth + 1) as i32);
    }

    /// Halves the directory; the upper half simply becomes unreachable.
    pub fn decr_global_depth(&mut self) {
        let global_depth = self.get_global_depth();
        assert!(global_depth > 0);
        self.write_i32(OFFSET_GLOBAL_DEPTH, (global_depth - 1) as i32);
    }

    fn write_i32(&mut self, offset: usize, value: i32) {
        self.data.as_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::PAGE_SIZE;

    #[test]
    fn header_fields_roundtrip() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut dir = HashTableDirectoryPage::new(&mut buf[..]);

        dir.set_page_id(7);
        dir.set_lsn(3);
        dir.set_bucket_page_id(0, 21);
        dir.set_local_depth(0, 0);

        assert_eq!(7, dir.get_page_id());
        assert_eq!(3, dir.get_lsn());
        assert_eq!(0, dir.get_global_depth());
        assert_eq!(1, dir.size());
        assert_eq!(21, dir.get_bucket_page_id(0));
        assert_eq!(0, dir.get_local_depth(0));

        // Pin down the wire layout, not just the accessors.
        assert_eq!(7i32.to_le_bytes(), buf[0..4]);
        assert_eq!(21i32.to_le_bytes(), buf[12..16]);
        assert_eq!(0u8, buf[OFFSET_LOCAL_DEPTHS]);
    }

    #[test]
    fn growth_duplicates_the_lower_half() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut dir = HashTableDirectoryPage::new(&mut buf[..]);
        dir.set_bucket_page_id(0, 5);
        dir.set_local_depth(0, 0);

        dir.incr_global_depth();
        assert_eq!(1, dir.get_global_depth());
        assert_eq!(2, dir.size());
        assert_eq!(1, dir.get_global_depth_mask());
        assert_eq!(5, dir.get_bucket_page_id(1));
        assert_eq!(0, dir.get_local_depth(1));
        dir.verify_integrity();

        // Split bucket 0 at depth 1, then grow again: slots 2 and 3 mirror
        // slots 0 and 1.
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        dir.set_bucket_page_id(1, 9);
        dir.incr_global_depth();
        assert_eq!(4, dir.size());
        assert_eq!(5, dir.get_bucket_page_id(2));
        assert_eq!(9, dir.get_bucket_page_id(3));
        assert_eq!(1, dir.get_local_depth(2));
        dir.verify_integrity();

        assert!(dir.can_shrink());
        dir.decr_global_depth();
        assert_eq!(2, dir.size());
        dir.verify_integrity();
    }

    #[test]
    fn split_image_flips_the_top_local_bit() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut dir = HashTableDirectoryPage::new(&mut buf[..]);
        dir.incr_global_depth();
        dir.incr_global_depth();
        for idx in 0..4 {
            dir.set_local_depth(idx, 2);
        }
        assert_eq!(0b10, dir.get_split_image_index(0b00));
        assert_eq!(0b00, dir.get_split_image_index(0b10));
        assert_eq!(0b11, dir.get_split_image_index(0b01));

        for idx in 0..4 {
            dir.set_local_depth(idx, 1);
        }
        assert_eq!(0b1, dir.get_split_image_index(0b0));
    }

    #[test]
    fn can_shrink_requires_all_depths_below_global() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut dir = HashTableDirectoryPage::new(&mut buf[..]);
        dir.set_bucket_page_id(0, 2);
        dir.incr_global_depth();
        assert!(dir.can_shrink());

        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        assert!(!dir.can_shrink());
    }
}
