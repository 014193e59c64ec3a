use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    sync::atomic::{AtomicI32, Ordering},
};

use log::debug;
use parking_lot::Mutex;

use crate::common::config::{PageId, PAGE_SIZE};

/// DiskManager performs the reading and writing of pages to and from the
/// database file, providing a logical file layer for the buffer pool.
///
/// A single manager is shared by every buffer pool instance; the file handle
/// is guarded so concurrent instances cannot interleave their seeks.
/// I/O errors are considered fatal and abort the process.
pub struct DiskManager {
    // Protects file access across buffer pool instances.
    db_io: Mutex<File>,
    file_name: String,
    // Number of page writes issued.
    num_writes: AtomicI32,
    // Number of file syncs issued.
    num_flushes: AtomicI32,
    // Page ids handed back by DeletePage. Metadata only for now; allocation
    // stays strictly increasing per instance so the modulus routing holds.
    free_ids: Mutex<Vec<PageId>>,
}

impl DiskManager {
    /// Creates a new disk manager that reads and writes the given file,
    /// creating it if it does not exist yet.
    pub fn new(db_file: &str) -> Self {
        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .open(db_file)
            .or_else(|_| {
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .open(db_file)
            })
            .unwrap();

        Self {
            db_io: Mutex::new(db_io),
            file_name: db_file.to_string(),
            num_writes: AtomicI32::new(0),
            num_flushes: AtomicI32::new(0),
            free_ids: Mutex::new(Vec::new()),
        }
    }

    /// Write a page to the database file and sync it.
    pub fn write_page(&self, page_id: PageId, page_data: &[u8]) {
        assert_eq!(page_data.len(), PAGE_SIZE);
        assert!(page_id >= 0);

        let offset = page_id as usize * PAGE_SIZE;
        self.num_writes.fetch_add(1, Ordering::Relaxed);

        let mut db_io = self.db_io.lock();
        db_io.seek(SeekFrom::Start(offset as u64)).unwrap();
        if let Err(e) = db_io.write_all(page_data) {
            panic!("I/O error while writing page {}: {:?}", page_id, e);
        }
        // needs to flush to keep the disk file in sync
        db_io.flush().unwrap();
        self.num_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a page from the database file. Reading past the current end of
    /// file yields zeroed bytes, since a freshly allocated page may be
    /// fetched back before it was ever written out.
    pub fn read_page(&self, page_id: PageId, page_data: &mut [u8]) {
        assert_eq!(page_data.len(), PAGE_SIZE);
        assert!(page_id >= 0);

        let offset = page_id as usize * PAGE_SIZE;
        let mut db_io = self.db_io.lock();
        if offset >= db_io.metadata().unwrap().len() as usize {
            debug!("read of page {} past end of file", page_id);
            page_data.fill(0);
            return;
        }
        db_io.seek(SeekFrom::Start(offset as u64)).unwrap();
        match db_io.read(page_data) {
            Ok(read_count) => {
                if read_count < PAGE_SIZE {
                    debug!("read less than a page");
                    // fill the rest of the buffer with 0
                    page_data[read_count..].fill(0);
                }
            }
            Err(e) => panic!("I/O error while reading page {}: {:?}", page_id, e),
        };
    }

    /// Record that a page id is no longer in use.
    pub fn deallocate_page(&self, page_id: PageId) {
        self.free_ids.lock().push(page_id);
    }

    /// Returns the number of page writes issued so far.
    pub fn get_num_writes(&self) -> i32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Returns the number of file syncs issued so far.
    pub fn get_num_flushes(&self) -> i32 {
        self.num_flushes.load(Ordering::Relaxed)
    }

    pub fn get_file_name(&self) -> &str {
        &self.file_name
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn read_write_page() {
        let mut buf = [0; PAGE_SIZE];
        let mut data = [0; PAGE_SIZE];

        let dir = TempDir::new("test").unwrap();
        let db_file = dir.path().join("test.db");
        let dm = DiskManager::new(db_file.to_str().unwrap());
        let test_str = b"A test string.";
        data[..test_str.len()].copy_from_slice(test_str);

        dm.read_page(0, &mut buf); // tolerate reading a page never written
        assert_eq!(buf, [0; PAGE_SIZE]);

        dm.write_page(0, &data);
        dm.read_page(0, &mut buf);
        assert_eq!(buf, data);

        buf.fill(0);
        dm.write_page(5, &data);
        dm.read_page(5, &mut buf);
        assert_eq!(buf, data);
        assert_eq!(2, dm.get_num_writes());
    }

    #[test]
    fn short_read_zero_fills() {
        let mut data = [0xau8; PAGE_SIZE];
        let dir = TempDir::new("test").unwrap();
        let db_file = dir.path().join("test.db");
        let dm = DiskManager::new(db_file.to_str().unwrap());

        dm.write_page(0, &data);
        // Page 1 was never written; the read must come back zeroed, not fail.
        dm.read_page(1, &mut data);
        assert_eq!(data, [0; PAGE_SIZE]);
    }
}
