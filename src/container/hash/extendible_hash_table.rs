use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::buffer::ParallelBufferPool;
use crate::common::config::PageId;
use crate::storage::page::{HashTableBucketPage, HashTableDirectoryPage, DIRECTORY_ARRAY_SIZE};
use crate::storage::page::Storable;

enum TryInsert {
    /// The shared-latch attempt finished: inserted, or rejected a duplicate,
    /// or could not pin the needed pages.
    Done(bool),
    /// The target bucket is full; the caller must split and retry.
    BucketFull,
}

/// Disk-backed extendible hash table: one directory page plus one bucket
/// page per bucket, all living in the buffer pool.
///
/// `table_latch` protects the directory structure. Lookups and in-bucket
/// mutation take it shared and rely on the per-page latches underneath;
/// splits and merges take it exclusive. Bucket-page latches are always
/// released before the table latch, so the two levels cannot deadlock.
pub struct ExtendibleHashTable<K, V> {
    bpm: Arc<ParallelBufferPool>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Storable + Hash + Eq,
    V: Storable,
{
    /// Creates the table: allocates the directory page and bucket 0, with
    /// local depth = global depth = 0. An existing table would instead be
    /// reopened by remembering its directory page id.
    pub fn new(bpm: Arc<ParallelBufferPool>) -> ExtendibleHashTable<K, V> {
        let mut dir_guard = bpm
            .new_page_guarded()
            .expect("buffer pool exhausted while creating the hash table directory");
        let directory_page_id = dir_guard.get_page_id();
        let bucket_guard = bpm
            .new_page_guarded()
            .expect("buffer pool exhausted while creating bucket 0");
        let bucket_page_id = bucket_guard.get_page_id();
        {
            let mut data = dir_guard.get_data_mut();
            let mut dir = HashTableDirectoryPage::new(&mut data[..]);
            dir.set_page_id(directory_page_id);
            dir.set_bucket_page_id(0, bucket_page_id);
            dir.set_local_depth(0, 0);
        }
        drop(bucket_guard);
        drop(dir_guard);
        Self {
            bpm,
            directory_page_id,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        }
    }

    /// Collects every value stored under `key`.
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let _table = self.table_latch.read();
        let Some(dir_guard) = self.bpm.fetch_page_guarded(self.directory_page_id) else {
            return Vec::new();
        };
        let bucket_page_id = {
            let data = dir_guard.get_data();
            let dir = HashTableDirectoryPage::new(&data[..]);
            dir.get_bucket_page_id(dir.index_of(Self::hash_of(key)))
        };
        drop(dir_guard);

        let Some(bucket_guard) = self.bpm.fetch_page_guarded(bucket_page_id) else {
            return Vec::new();
        };
        let data = bucket_guard.get_data();
        HashTableBucketPage::<_, K, V>::new(&data[..]).get_value(key)
    }

    /// Inserts the pair, splitting the target bucket as often as needed.
    /// Returns false for an exact duplicate, or when the directory is
    /// already at its maximum depth and the offending bucket cannot split
    /// any further, or when the buffer pool refuses a page.
    pub fn insert(&self, key: &K, value: &V) -> bool {
        loop {
            match self.try_insert(key, value) {
                TryInsert::Done(ok) => return ok,
                TryInsert::BucketFull => {
                    if !self.split_insert(key) {
                        return false;
                    }
                }
            }
        }
    }

    /// Removes the exact pair. If the bucket becomes empty, tries to merge
    /// it with its split image; a failed merge never fails the remove.
    pub fn remove(&self, key: &K, value: &V) -> bool {
        let (removed, emptied) = {
            let _table = self.table_latch.read();
            let Some(dir_guard) = self.bpm.fetch_page_guarded(self.directory_page_id) else {
                return false;
            };
            let bucket_page_id = {
                let data = dir_guard.get_data();
                let dir = HashTableDirectoryPage::new(&data[..]);
                dir.get_bucket_page_id(dir.index_of(Self::hash_of(key)))
            };
            drop(dir_guard);

            let Some(mut bucket_guard) = self.bpm.fetch_page_guarded(bucket_page_id) else {
                return false;
            };
            let mut data = bucket_guard.get_data_mut();
            let mut bucket = HashTableBucketPage::<_, K, V>::new(&mut data[..]);
            let removed = bucket.remove(key, value);
            (removed, removed && bucket.is_empty())
        };
        if emptied {
            self.merge(key);
        }
        removed
    }

    /// Current global depth of the directory.
    pub fn get_global_depth(&self) -> u32 {
        let _table = self.table_latch.read();
        let dir_guard = self
            .bpm
            .fetch_page_guarded(self.directory_page_id)
            .expect("directory page must be fetchable");
        let data = dir_guard.get_data();
        HashTableDirectoryPage::new(&data[..]).get_global_depth()
    }

    /// Asserts the directory invariants; see
    /// [`HashTableDirectoryPage::verify_integrity`].
    pub fn verify_integrity(&self) {
        let _table = self.table_latch.read();
        let dir_guard = self
            .bpm
            .fetch_page_guarded(self.directory_page_id)
            .expect("directory page must be fetchable");
        let data = dir_guard.get_data();
        HashTableDirectoryPage::new(&data[..]).verify_integrity();
    }

    /// One insert attempt under the shared table latch.
    fn try_insert(&self, key: &K, value: &V) -> TryInsert {
        let _table = self.table_latch.read();
        let Some(dir_guard) = self.bpm.fetch_page_guarded(self.directory_page_id) else {
            return TryInsert::Done(false);
        };
        let bucket_page_id = {
            let data = dir_guard.get_data();
            let dir = HashTableDirectoryPage::new(&data[..]);
            dir.get_bucket_page_id(dir.index_of(Self::hash_of(key)))
        };
        drop(dir_guard);

        let Some(mut bucket_guard) = self.bpm.fetch_page_guarded(bucket_page_id) else {
            return TryInsert::Done(false);
        };
        let mut data = bucket_guard.get_data_mut();
        let mut bucket = HashTableBucketPage::<_, K, V>::new(&mut data[..]);
        if bucket.contains(key, value) {
            TryInsert::Done(false)
        } else if bucket.insert(key, value) {
            TryInsert::Done(true)
        } else {
            TryInsert::BucketFull
        }
    }

    /// Splits the bucket `key` hashes to, growing the directory when the
    /// bucket's local depth has caught up with the global depth. Returns
    /// true if the split happened and the insert should be retried.
    ///
    /// Runs under the exclusive table latch and re-reads the directory,
    /// since the world may have changed since the shared-latch attempt.
    fn split_insert(&self, key: &K) -> bool {
        let _table = self.table_latch.write();
        let Some(mut dir_guard) = self.bpm.fetch_page_guarded(self.directory_page_id) else {
            return false;
        };
        let mut dir_data = dir_guard.get_data_mut();
        let mut dir = HashTableDirectoryPage::new(&mut dir_data[..]);

        let idx = dir.index_of(Self::hash_of(key));
        let local_depth = dir.get_local_depth(idx);
        if local_depth == dir.get_global_depth() && dir.size() >= DIRECTORY_ARRAY_SIZE {
            debug!("directory already at maximum depth, giving up the insert");
            return false;
        }
        let old_bucket_page_id = dir.get_bucket_page_id(idx);

        // Pin both bucket pages before touching the directory, so a refused
        // allocation aborts the split with the directory unchanged.
        let Some(mut split_guard) = self.bpm.new_page_guarded() else {
            return false;
        };
        let split_page_id = split_guard.get_page_id();
        let Some(mut old_guard) = self.bpm.fetch_page_guarded(old_bucket_page_id) else {
            return false;
        };

        if local_depth == dir.get_global_depth() {
            dir.incr_global_depth();
        }
        let new_local_depth = local_depth + 1;

        // Rewire the directory: among the slots sharing the old bucket,
        // those whose newly distinguished bit differs from `idx` move to the
        // split image; every one of them now distinguishes one more bit.
        let bit = 1usize << (new_local_depth - 1);
        for slot in 0..dir.size() {
            if dir.get_bucket_page_id(slot) == old_bucket_page_id {
                if slot & bit != idx & bit {
                    dir.set_bucket_page_id(slot, split_page_id);
                }
                dir.set_local_depth(slot, new_local_depth);
            }
        }

        let mut old_data = old_guard.get_data_mut();
        let mut old_bucket = HashTableBucketPage::<_, K, V>::new(&mut old_data[..]);
        let mut split_data = split_guard.get_data_mut();
        let mut split_bucket = HashTableBucketPage::<_, K, V>::new(&mut split_data[..]);

        let entries = old_bucket.get_existed_data();
        old_bucket.reset();
        for (k, v) in &entries {
            if (Self::hash_of(k) as usize) & bit == idx & bit {
                old_bucket.insert(k, v);
            } else {
                split_bucket.insert(k, v);
            }
        }
        debug!(
            "split bucket page {} into {} at local depth {}",
            old_bucket_page_id, split_page_id, new_local_depth
        );
        true
    }

    /// Folds the bucket `key` hashed to back into its split image, then
    /// shrinks the directory as far as possible. Aborts silently unless the
    /// bucket is still empty, has a positive local depth, and agrees on
    /// depth with its split image.
    fn merge(&self, key: &K) {
        let _table = self.table_latch.write();
        let Some(mut dir_guard) = self.bpm.fetch_page_guarded(self.directory_page_id) else {
            return;
        };
        let mut dir_data = dir_guard.get_data_mut();
        let mut dir = HashTableDirectoryPage::new(&mut dir_data[..]);

        let idx = dir.index_of(Self::hash_of(key));
        let local_depth = dir.get_local_depth(idx);
        if local_depth == 0 {
            return;
        }
        let split_idx = dir.get_split_image_index(idx);
        if dir.get_local_depth(split_idx) != local_depth {
            return;
        }
        let bucket_page_id = dir.get_bucket_page_id(idx);
        let split_page_id = dir.get_bucket_page_id(split_idx);
        if bucket_page_id == split_page_id {
            return;
        }

        // Re-check emptiness under the exclusive latch; a concurrent insert
        // may have refilled the bucket since the remove released its latches.
        {
            let Some(bucket_guard) = self.bpm.fetch_page_guarded(bucket_page_id) else {
                return;
            };
            let data = bucket_guard.get_data();
            if !HashTableBucketPage::<_, K, V>::new(&data[..]).is_empty() {
                return;
            }
        }
        if !self.bpm.delete_page(bucket_page_id) {
            warn!(
                "empty bucket page {} is still pinned, skipping the merge",
                bucket_page_id
            );
            return;
        }

        let new_local_depth = local_depth - 1;
        for slot in 0..dir.size() {
            let page_id = dir.get_bucket_page_id(slot);
            if page_id == bucket_page_id || page_id == split_page_id {
                dir.set_bucket_page_id(slot, split_page_id);
                dir.set_local_depth(slot, new_local_depth);
            }
        }
        while dir.can_shrink() {
            dir.decr_global_depth();
        }
        debug!("merged bucket page {} into {}", bucket_page_id, split_page_id);
    }

    fn hash_of(key: &K) -> u32 {
        // DefaultHasher::new() is keyed with constants, so hashes are stable
        // across processes and a persisted directory stays valid.
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}
