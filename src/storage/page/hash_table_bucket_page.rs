use std::marker::PhantomData;

use crate::common::config::PAGE_SIZE;
use crate::storage::page::codec::Storable;

/// Number of `(key, value)` slots a bucket page can hold: the largest `N`
/// with `ceil(N/8) * 2 + N * slot_size <= PAGE_SIZE`, where the two bitmap
/// arrays cost one bit per slot each.
pub fn bucket_array_size<K: Storable, V: Storable>() -> usize {
    (4 * PAGE_SIZE) / (4 * (K::STORED_SIZE + V::STORED_SIZE) + 1)
}

/// Bucket page of an extendible hash table, viewed over the raw bytes of a
/// buffer-pool page.
///
/// Layout: `occupied` bitmap, `readable` bitmap (both `ceil(N/8)` bytes,
/// slot `i`'s bit at `byte[i / 8] >> (i % 8)`), then `N` fixed-width slots.
/// `occupied` records that a slot was ever used; only `readable` says it
/// holds a live entry, so a cleared `readable` bit over a set `occupied` bit
/// is a tombstone.
///
/// The view has no synchronization of its own; the caller holds the page
/// latch.
pub struct HashTableBucketPage<T, K, V> {
    data: T,
    _marker: PhantomData<(K, V)>,
}

impl<T: AsRef<[u8]>, K: Storable, V: Storable> HashTableBucketPage<T, K, V> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    fn capacity() -> usize {
        bucket_array_size::<K, V>()
    }

    fn bitmap_len() -> usize {
        (Self::capacity() + 7) / 8
    }

    fn slot_offset(bucket_idx: usize) -> usize {
        2 * Self::bitmap_len() + bucket_idx * (K::STORED_SIZE + V::STORED_SIZE)
    }

    pub fn is_occupied(&self, bucket_idx: usize) -> bool {
        let byte = self.data.as_ref()[bucket_idx / 8];
        (byte >> (bucket_idx % 8)) & 1 == 1
    }

    pub fn is_readable(&self, bucket_idx: usize) -> bool {
        let byte = self.data.as_ref()[Self::bitmap_len() + bucket_idx / 8];
        (byte >> (bucket_idx % 8)) & 1 == 1
    }

    pub fn key_at(&self, bucket_idx: usize) -> K {
        let offset = Self::slot_offset(bucket_idx);
        K::load(&self.data.as_ref()[offset..offset + K::STORED_SIZE])
    }

    pub fn value_at(&self, bucket_idx: usize) -> V {
        let offset = Self::slot_offset(bucket_idx) + K::STORED_SIZE;
        V::load(&self.data.as_ref()[offset..offset + V::STORED_SIZE])
    }

    /// Collects the values stored under `key`.
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let mut result = Vec::new();
        for idx in 0..Self::capacity() {
            if self.is_readable(idx) && self.key_at(idx) == *key {
                result.push(self.value_at(idx));
            }
        }
        result
    }

    /// True iff the exact `(key, value)` pair is live in this bucket.
    pub fn contains(&self, key: &K, value: &V) -> bool {
        (0..Self::capacity()).any(|idx| {
            self.is_readable(idx) && self.key_at(idx) == *key && self.value_at(idx) == *value
        })
    }

    /// True iff every slot holds a live entry.
    pub fn is_full(&self) -> bool {
        self.num_readable() == Self::capacity()
    }

    /// True iff no slot holds a live entry.
    pub fn is_empty(&self) -> bool {
        (0..Self::capacity()).all(|idx| !self.is_readable(idx))
    }

    /// Number of live entries.
    pub fn num_readable(&self) -> usize {
        let full_bytes = Self::capacity() / 8;
        let readable = &self.data.as_ref()[Self::bitmap_len()..2 * Self::bitmap_len()];
        let mut num = readable[..full_bytes]
            .iter()
            .map(|byte| byte.count_ones() as usize)
            .sum();
        // The last byte may cover fewer than 8 slots; mask the excess bits.
        let remainder = Self::capacity() % 8;
        if remainder > 0 {
            let mask = (1u8 << remainder) - 1;
            num += (readable[full_bytes] & mask).count_ones() as usize;
        }
        num
    }

    /// Snapshot of all live `(key, value)` pairs, in slot order. Used to
    /// redistribute a bucket while splitting.
    pub fn get_existed_data(&self) -> Vec<(K, V)> {
        (0..Self::capacity())
            .filter(|&idx| self.is_readable(idx))
            .map(|idx| (self.key_at(idx), self.value_at(idx)))
            .collect()
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>, K: Storable, V: Storable> HashTableBucketPage<T, K, V> {
    /// Inserts the pair into the first non-live slot. Fails on an exact
    /// `(key, value)` duplicate or when no slot is free.
    pub fn insert(&mut self, key: &K, value: &V) -> bool {
        if self.contains(key, value) {
            return false;
        }
        for idx in 0..Self::capacity() {
            if !self.is_readable(idx) {
                let offset = Self::slot_offset(idx);
                let data = self.data.as_mut();
                key.store(&mut data[offset..offset + K::STORED_SIZE]);
                value.store(
                    &mut data[offset + K::STORED_SIZE
                        ..offset + K::STORED_SIZE + V::STORED_SIZE],
                );
                self.set_occupied(idx);
                self.set_readable(idx);
                return true;
            }
        }
        false
    }

    /// Clears the `readable` bit of the slot holding the exact pair, leaving
    /// its `occupied` bit as a tombstone. Returns false if the pair is not
    /// live here.
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        for idx in 0..Self::capacity() {
            if self.is_readable(idx) && self.key_at(idx) == *key && self.value_at(idx) == *value {
                self.remove_at(idx);
                return true;
            }
        }
        false
    }

    pub fn remove_at(&mut self, bucket_idx: usize) {
        let byte = &mut self.data.as_mut()[Self::bitmap_len() + bucket_idx / 8];
        *byte &= !(1 << (bucket_idx % 8));
    }

    fn set_occupied(&mut self, bucket_idx: usize) {
        let byte = &mut self.data.as_mut()[bucket_idx / 8];
        *byte |= 1 << (bucket_idx % 8);
    }

    fn set_readable(&mut self, bucket_idx: usize) {
        let byte = &mut self.data.as_mut()[Self::bitmap_len() + bucket_idx / 8];
        *byte |= 1 << (bucket_idx % 8);
    }

    /// Zeroes both bitmaps and the slot array.
    pub fn reset(&mut self) {
        let end = Self::slot_offset(Self::capacity());
        self.data.as_mut()[..end].fill(0);
    }
}
