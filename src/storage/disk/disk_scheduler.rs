use std::sync::Arc;
use std::thread;

use tokio::sync::oneshot;

use crate::storage::disk::DiskManager;
use crate::storage::page::Page;

/// A write or read request for the disk manager to execute.
pub enum DiskRequest {
    Read {
        /// The page being read from disk; its page id names the disk page.
        page: Page,
        /// Signalled once the request has completed.
        callback: oneshot::Sender<()>,
    },
    Write {
        /// The page being written out to disk.
        page: Page,
        /// Signalled once the request has completed.
        callback: oneshot::Sender<()>,
    },
}

/// DiskScheduler funnels the disk traffic of one buffer pool instance
/// through a background worker thread.
///
/// A request is scheduled by passing a [`DiskRequest`] to `schedule`; the
/// caller blocks on the request's oneshot receiver when it needs the result.
/// The worker thread is spawned in the constructor and joined on drop.
pub struct DiskScheduler {
    /// Shared queue of requests. `None` tells the worker to stop.
    request_queue: std::sync::mpsc::Sender<Option<DiskRequest>>,

    /// The background thread issuing scheduled requests to the disk manager.
    background_thread: Option<thread::JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        Self {
            request_queue: tx,
            background_thread: Some(thread::spawn(move || {
                Self::start_worker_thread(rx, disk_manager)
            })),
        }
    }

    /// Schedules a request for the disk manager to execute.
    pub fn schedule(&self, r: DiskRequest) {
        self.request_queue.send(Some(r)).unwrap();
    }

    fn start_worker_thread(
        rx: std::sync::mpsc::Receiver<Option<DiskRequest>>,
        disk_manager: Arc<DiskManager>,
    ) {
        while let Ok(r) = rx.recv() {
            match r {
                Some(DiskRequest::Read { page, callback }) => {
                    disk_manager.read_page(page.get_page_id().unwrap(), &mut *page.get_data_mut());
                    callback.send(()).unwrap();
                }
                Some(DiskRequest::Write { page, callback }) => {
                    disk_manager.write_page(page.get_page_id().unwrap(), &*page.get_data());
                    callback.send(()).unwrap();
                }
                None => break,
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Wake the worker with an empty request so it exits its loop.
        self.request_queue.send(None).unwrap();
        self.background_thread.take().unwrap().join().unwrap();
    }
}
