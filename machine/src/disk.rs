//! Asynchronous sector disk.
//!
//! Requests copy their data immediately but complete later: the controller
//! accepts one operation at a time and posts a completion interrupt
//! [`DISK_TICKS`](crate::config::DISK_TICKS) after the request. The layer
//! above waits on that interrupt before looking at the data, so the early
//! copy is unobservable.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::{DISK_TICKS, SECTOR_SIZE};
use crate::interrupt::Interrupt;

type Callback = Box<dyn Fn() + Send + Sync>;

struct DiskInner {
    image: Vec<u8>,
    active: bool,
}

pub struct Disk {
    interrupt: Arc<Interrupt>,
    num_sectors: usize,
    inner: Mutex<DiskInner>,
    handler: Mutex<Option<Callback>>,
}

impl Disk {
    pub fn new(interrupt: Arc<Interrupt>, num_sectors: usize) -> Arc<Disk> {
        Arc::new(Disk {
            interrupt,
            num_sectors,
            inner: Mutex::new(DiskInner {
                image: vec![0; num_sectors * SECTOR_SIZE],
                active: false,
            }),
            handler: Mutex::new(None),
        })
    }

    pub fn num_sectors(&self) -> usize {
        self.num_sectors
    }

    pub fn interrupt(&self) -> Arc<Interrupt> {
        self.interrupt.clone()
    }

    /// Register the completion handler. The synchronous layer installs a
    /// closure that releases its interrupt-acknowledge semaphore.
    pub fn register_handler(&self, callback: Callback) {
        *self.handler.lock() = Some(callback);
    }

    pub fn read_request(self: &Arc<Self>, sector: usize, data: &mut [u8]) {
        assert!(sector < self.num_sectors, "sector {} out of range", sector);
        assert_eq!(data.len(), SECTOR_SIZE);
        {
            let mut inner = self.inner.lock();
            assert!(!inner.active, "disk handles one request at a time");
            inner.active = true;
            let off = sector * SECTOR_SIZE;
            data.copy_from_slice(&inner.image[off..off + SECTOR_SIZE]);
        }
        logger::debug!('d', "disk read request for sector {}", sector);
        self.schedule_done();
    }

    pub fn write_request(self: &Arc<Self>, sector: usize, data: &[u8]) {
        assert!(sector < self.num_sectors, "sector {} out of range", sector);
        assert_eq!(data.len(), SECTOR_SIZE);
        {
            let mut inner = self.inner.lock();
            assert!(!inner.active, "disk handles one request at a time");
            inner.active = true;
            let off = sector * SECTOR_SIZE;
            inner.image[off..off + SECTOR_SIZE].copy_from_slice(data);
        }
        logger::debug!('d', "disk write request for sector {}", sector);
        self.schedule_done();
    }

    fn schedule_done(self: &Arc<Self>) {
        let disk = self.clone();
        self.interrupt.schedule(
            DISK_TICKS,
            Box::new(move || {
                disk.inner.lock().active = false;
                if let Some(callback) = disk.handler.lock().as_ref() {
                    callback();
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn write_then_read_round_trips_after_completion() {
        let intr = Interrupt::new();
        let disk = Disk::new(intr.clone(), 8);
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        disk.register_handler(Box::new(move || {
            d.fetch_add(1, Ordering::SeqCst);
        }));

        let payload = [0xabu8; SECTOR_SIZE];
        disk.write_request(3, &payload);
        intr.idle();
        assert_eq!(done.load(Ordering::SeqCst), 1);

        let mut out = [0u8; SECTOR_SIZE];
        disk.read_request(3, &mut out);
        intr.idle();
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(out, payload);
    }

    #[test]
    #[should_panic(expected = "one request at a time")]
    fn overlapping_requests_are_fatal() {
        let intr = Interrupt::new();
        let disk = Disk::new(intr, 8);
        let buf = [0u8; SECTOR_SIZE];
        disk.write_request(0, &buf);
        disk.write_request(1, &buf);
    }
}
