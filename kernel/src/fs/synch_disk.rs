//! Synchronous, cached access to the raw asynchronous disk.
//!
//! The physical disk returns immediately and interrupts later; a
//! semaphore posted by the completion interrupt turns that into a
//! blocking call. In front of the device sits a sector cache with
//! second-chance reclaim and a write-behind queue: writes land in the
//! cache and are pushed to the device only when an entry must be
//! reclaimed, when the queue outgrows its bound, or on an explicit flush.
//!
//! Two locks: `disk_lock` serializes operations on the device itself,
//! `cache_lock` serializes cache metadata, so cache hits keep completing
//! while a miss is waiting on the device.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use machine::config::SECTOR_SIZE;
use machine::disk::Disk;

use crate::sched::scheduler::Scheduler;
use crate::sync::unicore::UPSafeCell;
use crate::sync::{Lock, Semaphore};

pub const CACHE_SIZE: usize = 64;
/// Deferred writes allowed before reclaim starts draining the queue.
pub const WRITE_QUEUE_BOUND: usize = 16;

#[derive(Clone, Copy)]
struct CacheEntry {
    valid: bool,
    used: bool,
    dirty: bool,
    sector: usize,
    data: [u8; SECTOR_SIZE],
}

impl CacheEntry {
    const fn empty() -> CacheEntry {
        CacheEntry {
            valid: false,
            used: false,
            dirty: false,
            sector: 0,
            data: [0; SECTOR_SIZE],
        }
    }
}

struct CacheInner {
    entries: Vec<CacheEntry>,
    victim: usize,
    // 等待写回的表项下标, 按写入顺序
    write_queue: VecDeque<usize>,
}

pub struct SynchDisk {
    disk: Arc<Disk>,
    semaphore: Arc<Semaphore>,
    disk_lock: Lock,
    cache_lock: Lock,
    inner: UPSafeCell<CacheInner>,
}

impl SynchDisk {
    pub fn new(sched: &Arc<Scheduler>, disk: Arc<Disk>) -> Arc<SynchDisk> {
        let semaphore = Arc::new(Semaphore::new(sched, "synch disk", 0));

        let ack = semaphore.clone();
        // 磁盘中断处理: 唤醒等待者
        disk.register_handler(Box::new(move || ack.v()));

        Arc::new(SynchDisk {
            disk,
            semaphore,
            disk_lock: Lock::new(sched, "synch disk lock"),
            cache_lock: Lock::new(sched, "disk cache lock"),
            inner: unsafe {
                UPSafeCell::new(CacheInner {
                    entries: vec![CacheEntry::empty(); CACHE_SIZE],
                    victim: 0,
                    write_queue: VecDeque::new(),
                })
            },
        })
    }

    pub fn num_sectors(&self) -> usize {
        self.disk.num_sectors()
    }

    /// Read a sector, returning only once the data is in `data`.
    pub fn read_sector(&self, sector: usize, data: &mut [u8]) {
        assert_eq!(data.len(), SECTOR_SIZE);

        self.cache_lock.acquire();
        if let Some(idx) = self.lookup(sector) {
            let mut inner = self.inner.exclusive_access();
            let entry = &mut inner.entries[idx];
            data.copy_from_slice(&entry.data);
            entry.used = true;
            drop(inner);
            self.cache_lock.release();
            return;
        }
        self.cache_lock.release();

        self.device_read(sector, data);

        self.cache_lock.acquire();
        self.install(sector, data, false);
        self.cache_lock.release();

        // Read ahead the next sector while the arm is nearby.
        let next = sector + 1;
        if next < self.disk.num_sectors() {
            self.cache_lock.acquire();
            let already = self.lookup(next).is_some();
            self.cache_lock.release();
            if !already {
                let mut ahead = [0u8; SECTOR_SIZE];
                self.device_read(next, &mut ahead);
                self.cache_lock.acquire();
                self.install(next, &ahead, false);
                self.cache_lock.release();
            }
        }
    }

    /// Write a sector. The data lands in the cache and is flushed behind
    /// the caller's back.
    pub fn write_sector(&self, sector: usize, data: &[u8]) {
        assert_eq!(data.len(), SECTOR_SIZE);

        self.cache_lock.acquire();
        if let Some(idx) = self.lookup(sector) {
            let mut inner = self.inner.exclusive_access();
            let entry = &mut inner.entries[idx];
            entry.data.copy_from_slice(data);
            entry.used = true;
            if !entry.dirty {
                entry.dirty = true;
                inner.write_queue.push_back(idx);
            }
            drop(inner);
            self.cache_lock.release();
            return;
        }
        self.install(sector, data, true);
        self.cache_lock.release();
    }

    /// Push every deferred write to the device.
    pub fn flush(&self) {
        self.cache_lock.acquire();
        while !self.inner.exclusive_access().write_queue.is_empty() {
            self.flush_one();
        }
        self.cache_lock.release();
    }

    // ---- internals, called with cache_lock held ----

    fn lookup(&self, sector: usize) -> Option<usize> {
        let inner = self.inner.exclusive_access();
        inner
            .entries
            .iter()
            .position(|e| e.valid && e.sector == sector)
    }

    fn install(&self, sector: usize, data: &[u8], dirty: bool) {
        // The device wait may have let someone else cache this sector; the
        // cached copy is at least as new as what we just read.
        if let Some(idx) = self.lookup(sector) {
            let mut inner = self.inner.exclusive_access();
            let entry = &mut inner.entries[idx];
            entry.used = true;
            if dirty {
                entry.data.copy_from_slice(data);
                if !entry.dirty {
                    entry.dirty = true;
                    inner.write_queue.push_back(idx);
                }
            }
            return;
        }

        let idx = self.reclaim();
        let mut inner = self.inner.exclusive_access();
        let entry = &mut inner.entries[idx];
        entry.valid = true;
        entry.used = true;
        entry.dirty = dirty;
        entry.sector = sector;
        entry.data.copy_from_slice(data);
        if dirty {
            inner.write_queue.push_back(idx);
        }
    }

    /// Second-chance victim selection: prefer invalid entries or clean
    /// unused ones, clearing use bits while scanning; if everything is
    /// dirty, drain one deferred write and take its entry.
    fn reclaim(&self) -> usize {
        if self.inner.exclusive_access().write_queue.len() > WRITE_QUEUE_BOUND {
            self.flush_one();
        }

        {
            let mut inner = self.inner.exclusive_access();
            for _ in 0..2 * CACHE_SIZE {
                let idx = inner.victim;
                inner.victim = (inner.victim + 1) % CACHE_SIZE;

                let entry = &mut inner.entries[idx];
                if !entry.valid || (!entry.used && !entry.dirty) {
                    return idx;
                }
                entry.used = false;
            }
        }

        // Every entry is dirty: make the oldest deferred write clean.
        self.flush_one()
    }

    /// Write the oldest queued entry to the device; returns its index.
    fn flush_one(&self) -> usize {
        let (idx, sector, data) = {
            let mut inner = self.inner.exclusive_access();
            let idx = inner
                .write_queue
                .pop_front()
                .expect("flush with an empty write queue");
            let entry = &inner.entries[idx];
            assert!(entry.valid && entry.dirty);
            (idx, entry.sector, entry.data)
        };

        self.device_write(sector, &data);

        self.inner.exclusive_access().entries[idx].dirty = false;
        idx
    }

    fn device_read(&self, sector: usize, data: &mut [u8]) {
        self.disk_lock.acquire();
        self.disk.read_request(sector, data);
        self.semaphore.p();
        self.disk_lock.release();
    }

    fn device_write(&self, sector: usize, data: &[u8]) {
        self.disk_lock.acquire();
        self.disk.write_request(sector, data);
        self.semaphore.p();
        self.disk_lock.release();
    }
}
