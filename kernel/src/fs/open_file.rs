//! Positioned handles over shared open files.
//!
//! Handles are reference counted: dropping the last handle on an inode
//! closes it in the file table, and, if the file was removed while open,
//! returns its blocks to the free map. Writing past the end of the file
//! grows it through the free-map path.

use alloc::sync::{Arc, Weak};

use machine::config::SECTOR_SIZE;

use crate::fs::file_system::FsInner;
use crate::fs::file_table::SharedFile;
use crate::fs::synch_disk::SynchDisk;
use crate::sync::unicore::UPSafeCell;

pub struct OpenFile {
    fs: Weak<FsInner>,
    disk: Arc<SynchDisk>,
    shared: Arc<SharedFile>,
    pos: UPSafeCell<usize>,
}

impl OpenFile {
    pub(crate) fn new(fs: Weak<FsInner>, disk: Arc<SynchDisk>, shared: Arc<SharedFile>) -> OpenFile {
        OpenFile {
            fs,
            disk,
            shared,
            pos: unsafe { UPSafeCell::new(0) },
        }
    }

    pub fn sector(&self) -> usize {
        self.shared.sector()
    }

    pub fn length(&self) -> usize {
        self.shared.length()
    }

    pub fn is_directory(&self) -> bool {
        self.shared.is_directory()
    }

    /// Take this file's lock; directory traversal and the read/write
    /// syscalls serialize on it.
    pub fn lock_file(&self) {
        self.shared.lock.acquire();
    }

    pub fn unlock_file(&self) {
        self.shared.lock.release();
    }

    pub fn seek(&self, position: usize) {
        self.pos.exclusive_session(|pos| *pos = position);
    }

    pub fn tell(&self) -> usize {
        self.pos.exclusive_session(|pos| *pos)
    }

    /// Read from the current position, advancing it.
    pub fn read(&self, into: &mut [u8]) -> usize {
        let position = self.tell();
        let num_read = self.read_at(into, position);
        self.pos.exclusive_session(|pos| *pos = position + num_read);
        num_read
    }

    /// Write at the current position, advancing it.
    pub fn write(&self, from: &[u8]) -> usize {
        let position = self.tell();
        let num_written = self.write_at(from, position);
        self.pos.exclusive_session(|pos| *pos = position + num_written);
        num_written
    }

    /// Read up to `into.len()` bytes starting at `offset`; short reads
    /// happen only at end of file.
    pub fn read_at(&self, into: &mut [u8], offset: usize) -> usize {
        // Work on a snapshot of the header so block-map walks never hold
        // the shared borrow across a disk wait.
        let header = self.shared.header.exclusive_access().clone();
        let length = header.length();
        if offset >= length || into.is_empty() {
            return 0;
        }
        let num_bytes = into.len().min(length - offset);

        let first = offset / SECTOR_SIZE;
        let last = (offset + num_bytes - 1) / SECTOR_SIZE;
        let mut buf = [0u8; SECTOR_SIZE];
        let mut copied = 0;

        for sector_index in first..=last {
            let sector = header.byte_to_sector(&self.disk, sector_index * SECTOR_SIZE);
            self.disk.read_sector(sector, &mut buf);

            let start = offset.max(sector_index * SECTOR_SIZE) - sector_index * SECTOR_SIZE;
            let end = (offset + num_bytes).min((sector_index + 1) * SECTOR_SIZE)
                - sector_index * SECTOR_SIZE;
            into[copied..copied + (end - start)].copy_from_slice(&buf[start..end]);
            copied += end - start;
        }
        assert_eq!(copied, num_bytes);
        num_bytes
    }

    /// Write `from` starting at `offset`, extending the file when the
    /// write lands past the end. If extension fails the write is
    /// truncated at the old boundary.
    pub fn write_at(&self, from: &[u8], offset: usize) -> usize {
        if from.is_empty() {
            return 0;
        }

        if offset + from.len() > self.length() {
            if let Some(fs) = self.fs.upgrade() {
                // 扩容失败就写到旧边界为止
                let _ = fs.extend_file(&self.shared, offset + from.len());
            }
        }

        let header = self.shared.header.exclusive_access().clone();
        let length = header.length();
        if offset >= length {
            return 0;
        }
        let num_bytes = from.len().min(length - offset);

        let first = offset / SECTOR_SIZE;
        let last = (offset + num_bytes - 1) / SECTOR_SIZE;
        let mut buf = [0u8; SECTOR_SIZE];
        let mut copied = 0;

        for sector_index in first..=last {
            let sector = header.byte_to_sector(&self.disk, sector_index * SECTOR_SIZE);

            let start = offset.max(sector_index * SECTOR_SIZE) - sector_index * SECTOR_SIZE;
            let end = (offset + num_bytes).min((sector_index + 1) * SECTOR_SIZE)
                - sector_index * SECTOR_SIZE;

            if start == 0 && end == SECTOR_SIZE {
                buf.copy_from_slice(&from[copied..copied + SECTOR_SIZE]);
            } else {
                // partial sector: read-modify-write
                self.disk.read_sector(sector, &mut buf);
                buf[start..end].copy_from_slice(&from[copied..copied + (end - start)]);
            }
            self.disk.write_sector(sector, &buf);
            copied += end - start;
        }
        assert_eq!(copied, num_bytes);
        num_bytes
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        if let Some(fs) = self.fs.upgrade() {
            fs.close_sector(self.shared.sector());
        }
    }
}

impl core::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenFile")
            .field("sector", &self.shared.sector())
            .field("length", &self.length())
            .finish()
    }
}
