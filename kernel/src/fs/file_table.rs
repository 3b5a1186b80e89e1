//! Process-wide table of open files.
//!
//! Each opened inode has exactly one [`SharedFile`], whatever the number
//! of handles on it: the per-file lock and the in-memory header live
//! there. The table tracks user counts and the remove-on-last-close flag;
//! every external entry point takes the table lock.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use crate::fs::file_header::FileHeader;
use crate::fs::synch_disk::SynchDisk;
use crate::sched::scheduler::Scheduler;
use crate::sync::unicore::UPSafeCell;
use crate::sync::Lock;

pub struct SharedFile {
    sector: usize,
    pub header: UPSafeCell<FileHeader>,
    pub lock: Lock,
}

impl SharedFile {
    fn new(sched: &Arc<Scheduler>, disk: &SynchDisk, sector: usize) -> Arc<SharedFile> {
        Arc::new(SharedFile {
            sector,
            header: unsafe { UPSafeCell::new(FileHeader::fetch_from(disk, sector)) },
            lock: Lock::new(sched, "file lock"),
        })
    }

    pub fn sector(&self) -> usize {
        self.sector
    }

    pub fn length(&self) -> usize {
        self.header.exclusive_access().length()
    }

    pub fn is_directory(&self) -> bool {
        self.header.exclusive_access().is_directory()
    }
}

struct TableEntry {
    shared: Arc<SharedFile>,
    users: usize,
    remove_on_close: bool,
}

pub struct FileTable {
    sched: Arc<Scheduler>,
    lock: Lock,
    inner: UPSafeCell<BTreeMap<usize, TableEntry>>,
}

/// What the caller owes the file system after a close.
#[derive(Debug, PartialEq, Eq)]
pub enum CloseAction {
    None,
    /// Last user of a removed file: free its header and data blocks.
    Liberate,
}

impl FileTable {
    pub fn new(sched: &Arc<Scheduler>) -> FileTable {
        FileTable {
            sched: sched.clone(),
            lock: Lock::new(sched, "file table lock"),
            inner: unsafe { UPSafeCell::new(BTreeMap::new()) },
        }
    }

    /// Fetch the shared state for `sector`, reading the header from disk
    /// on first open, and count the new user.
    pub fn open(&self, disk: &SynchDisk, sector: usize) -> Arc<SharedFile> {
        self.lock.acquire();
        // 先查表, 缺了再读盘补一项
        let hit = self
            .inner
            .exclusive_session(|map| map.get(&sector).map(|e| e.shared.clone()));
        let shared = match hit {
            Some(shared) => shared,
            None => {
                let shared = SharedFile::new(&self.sched, disk, sector);
                self.inner.exclusive_session(|map| {
                    map.insert(
                        sector,
                        TableEntry {
                            shared: shared.clone(),
                            users: 0,
                            remove_on_close: false,
                        },
                    );
                });
                shared
            }
        };
        self.inner
            .exclusive_session(|map| map.get_mut(&sector).unwrap().users += 1);
        self.lock.release();
        shared
    }

    /// Drop one user. The last close of a file marked for removal tells
    /// the caller to free its blocks.
    pub fn close(&self, sector: usize) -> CloseAction {
        self.lock.acquire();
        let action = self.inner.exclusive_session(|map| {
            let entry = map.get_mut(&sector).expect("close of an unopened file");
            entry.users -= 1;
            if entry.users == 0 {
                let liberate = entry.remove_on_close;
                map.remove(&sector);
                if liberate {
                    return CloseAction::Liberate;
                }
            }
            CloseAction::None
        });
        self.lock.release();
        action
    }

    /// Flag an open file for removal at last close. Returns false when
    /// the file is not open and the caller must free it directly.
    pub fn mark_for_remove(&self, sector: usize) -> bool {
        self.lock.acquire();
        let marked = self.inner.exclusive_session(|map| match map.get_mut(&sector) {
            Some(entry) => {
                entry.remove_on_close = true;
                true
            }
            None => false,
        });
        self.lock.release();
        marked
    }

    /// Is the inode at `sector` currently open?
    pub fn used(&self, sector: usize) -> bool {
        self.lock.acquire();
        let used = self
            .inner
            .exclusive_session(|map| map.contains_key(&sector));
        self.lock.release();
        used
    }
}
