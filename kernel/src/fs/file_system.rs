//! Overall file-system operation: boot-time format, path resolution and
//! the create/open/remove family.
//!
//! Directory traversal is hand-over-hand: each directory's file lock is
//! taken before the previous one is dropped, so concurrent traversals
//! hold at most two directory locks at once and cannot pass each other
//! inside a component. Every locked handle lives in an RAII guard so all
//! error paths unlock and close uniformly.

use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use sys_interface::config::FILE_NAME_MAX_LEN;

use crate::fs::bitmap::Bitmap;
use crate::fs::directory::{Directory, DIRECTORY_FILE_SIZE};
use crate::fs::file_header::FileHeader;
use crate::fs::file_table::{CloseAction, FileTable, SharedFile};
use crate::fs::open_file::OpenFile;
use crate::fs::synch_disk::SynchDisk;
use crate::fs::{FsError, FsResult, DIRECTORY_SECTOR, FREE_MAP_SECTOR};
use crate::sched::scheduler::Scheduler;
use crate::sync::unicore::UPSafeCell;

/// A file handle held locked; dropping the guard unlocks it (and closes
/// the handle if this was the last reference).
pub struct LockedFile {
    file: Arc<OpenFile>,
}

impl LockedFile {
    fn lock(file: Arc<OpenFile>) -> LockedFile {
        file.lock_file();
        LockedFile { file }
    }

    pub fn file(&self) -> &Arc<OpenFile> {
        &self.file
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        self.file.unlock_file();
    }
}

pub struct FsInner {
    me: Weak<FsInner>,
    sched: Arc<Scheduler>,
    disk: Arc<SynchDisk>,
    table: FileTable,
    num_sectors: usize,
    free_map_file: UPSafeCell<Option<Arc<OpenFile>>>,
    root_dir_file: UPSafeCell<Option<Arc<OpenFile>>>,
}

#[derive(Clone)]
pub struct FileSystem {
    inner: Arc<FsInner>,
}

impl FileSystem {
    /// Bring the file system up. With `format`, lay a fresh image down
    /// first: the free-map inode at sector 0, the root-directory inode at
    /// sector 1, then both files' initial contents.
    pub fn new(sched: &Arc<Scheduler>, disk: Arc<SynchDisk>, format: bool) -> FileSystem {
        logger::debug!('f', "initializing the file system");
        let num_sectors = disk.num_sectors();

        let inner = Arc::new_cyclic(|me| FsInner {
            me: me.clone(),
            sched: sched.clone(),
            disk: disk.clone(),
            table: FileTable::new(sched),
            num_sectors,
            free_map_file: unsafe { UPSafeCell::new(None) },
            root_dir_file: unsafe { UPSafeCell::new(None) },
        });

        if format {
            logger::debug!('f', "formatting the file system");
            let mut free_map = Bitmap::new(num_sectors);
            free_map.mark(FREE_MAP_SECTOR);
            free_map.mark(DIRECTORY_SECTOR);

            let mut map_header = FileHeader::new();
            map_header
                .allocate(&disk, &mut free_map, Bitmap::file_size(num_sectors), false)
                .expect("no room for the free-map file");
            let mut dir_header = FileHeader::new();
            dir_header
                .allocate(&disk, &mut free_map, DIRECTORY_FILE_SIZE, true)
                .expect("no room for the root directory");

            // Headers must hit the disk before the files can be opened.
            map_header.write_back(&disk, FREE_MAP_SECTOR);
            dir_header.write_back(&disk, DIRECTORY_SECTOR);

            let map_file = inner.open_sector(FREE_MAP_SECTOR);
            let dir_file = inner.open_sector(DIRECTORY_SECTOR);
            free_map.write_back(&map_file);
            Directory::new().write_back(&dir_file);

            *inner.free_map_file.exclusive_access() = Some(map_file);
            *inner.root_dir_file.exclusive_access() = Some(dir_file);
        } else {
            let map_file = inner.open_sector(FREE_MAP_SECTOR);
            let dir_file = inner.open_sector(DIRECTORY_SECTOR);
            *inner.free_map_file.exclusive_access() = Some(map_file);
            *inner.root_dir_file.exclusive_access() = Some(dir_file);
        }

        FileSystem { inner }
    }

    pub fn create(&self, path: &str, initial_size: usize) -> FsResult<()> {
        self.inner.create(path, initial_size)
    }

    pub fn open(&self, path: &str) -> FsResult<Arc<OpenFile>> {
        self.inner.open(path)
    }

    pub fn remove(&self, path: &str) -> FsResult<()> {
        self.inner.remove(path)
    }

    pub fn make_directory(&self, path: &str) -> FsResult<()> {
        self.inner.make_directory(path)
    }

    pub fn remove_directory(&self, path: &str) -> FsResult<()> {
        self.inner.remove_directory(path)
    }

    pub fn change_directory(&self, path: &str) -> FsResult<()> {
        self.inner.change_directory(path)
    }

    pub fn list(&self, path: &str) -> FsResult<Vec<String>> {
        self.inner.list(path)
    }

    /// Walk everything reachable from the two well-known sectors and
    /// verify it against the persisted free map. True means consistent.
    pub fn check(&self) -> bool {
        self.inner.check()
    }

    /// Drain the write-behind queue.
    pub fn flush(&self) {
        self.inner.disk.flush();
    }

    /// Free sectors according to the persisted map, for tests and stats.
    pub fn free_sector_count(&self) -> usize {
        let guard = self.inner.lock_free_map();
        let map = Bitmap::fetch_from(self.inner.num_sectors, guard.file());
        map.count_clear()
    }
}

impl FsInner {
    fn root_file(&self) -> Arc<OpenFile> {
        self.root_dir_file
            .exclusive_access()
            .clone()
            .expect("file system not initialized")
    }

    fn free_map_handle(&self) -> Arc<OpenFile> {
        self.free_map_file
            .exclusive_access()
            .clone()
            .expect("file system not initialized")
    }

    fn lock_free_map(&self) -> LockedFile {
        LockedFile::lock(self.free_map_handle())
    }

    /// Open a file by the sector of its header, bypassing directories.
    pub(crate) fn open_sector(&self, sector: usize) -> Arc<OpenFile> {
        let shared: Arc<SharedFile> = self.table.open(&self.disk, sector);
        Arc::new(OpenFile::new(self.me.clone(), self.disk.clone(), shared))
    }

    /// Close-side bookkeeping for a dropped handle.
    pub(crate) fn close_sector(&self, sector: usize) {
        if self.table.close(sector) == CloseAction::Liberate {
            self.liberate(sector);
        }
    }

    /// Grow an open file under the free-map lock.
    pub(crate) fn extend_file(&self, shared: &Arc<SharedFile>, new_size: usize) -> FsResult<()> {
        let guard = self.lock_free_map();
        let mut free_map = Bitmap::fetch_from(self.num_sectors, guard.file());
        let mut header = shared.header.exclusive_access().clone();
        header.extend(&self.disk, &mut free_map, new_size)?;
        header.write_back(&self.disk, shared.sector());
        free_map.write_back(guard.file());
        *shared.header.exclusive_access() = header;
        Ok(())
    }

    /// Free the blocks of a file that was removed while open; called at
    /// last close, when no directory entry reaches it anymore.
    fn liberate(&self, sector: usize) {
        logger::debug!('f', "liberating deferred-removed file at sector {}", sector);
        let header = FileHeader::fetch_from(&self.disk, sector);
        let guard = self.lock_free_map();
        let mut free_map = Bitmap::fetch_from(self.num_sectors, guard.file());
        header.deallocate(&self.disk, &mut free_map);
        free_map.clear(sector);
        free_map.write_back(guard.file());
    }

    /// Resolve `path` to its parent directory (locked) and the terminal
    /// component. A path ending in `/` resolves to the directory itself,
    /// with no terminal name.
    fn resolve(&self, path: &str) -> FsResult<(LockedFile, Option<String>)> {
        if path.is_empty() {
            return Err(FsError::BadPath);
        }

        let from_root = path.starts_with('/');
        let trailing_dir = path.ends_with('/');
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();

        let start = if from_root {
            self.root_file()
        } else {
            let cwd = self.sched.current().ex_inner().current_dir.clone();
            cwd.unwrap_or_else(|| self.root_file())
        };
        let mut dir = LockedFile::lock(start);

        if parts.is_empty() {
            // the path was just "/"
            return Ok((dir, None));
        }

        let descend_until = if trailing_dir {
            parts.len()
        } else {
            parts.len() - 1
        };

        for component in &parts[..descend_until] {
            let directory = Directory::fetch_from(dir.file());
            let sector = directory.find(component).ok_or(FsError::NotFound)?;
            let next = self.open_sector(sector);
            if !next.is_directory() {
                return Err(FsError::NotADirectory);
            }
            // 先锁住下一级再放开上一级
            let next = LockedFile::lock(next);
            drop(dir);
            dir = next;
        }

        if trailing_dir {
            Ok((dir, None))
        } else {
            Ok((dir, Some(parts[parts.len() - 1].to_string())))
        }
    }

    fn create(&self, path: &str, initial_size: usize) -> FsResult<()> {
        logger::debug!('f', "creating file {}, size {}", path, initial_size);

        let (dir, name) = self.resolve(path)?;
        let name = name.ok_or(FsError::BadPath)?;
        if name.len() > FILE_NAME_MAX_LEN {
            return Err(FsError::BadPath);
        }

        let mut directory = Directory::fetch_from(dir.file());
        if directory.find(&name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let map_guard = self.lock_free_map();
        let mut free_map = Bitmap::fetch_from(self.num_sectors, map_guard.file());
        let sector = free_map.find().ok_or(FsError::NoSpace)?;
        directory.add(&name, sector)?;

        let mut header = FileHeader::new();
        header.allocate(&self.disk, &mut free_map, initial_size, false)?;

        // Everything worked: flush the header, the map and the directory.
        header.write_back(&self.disk, sector);
        free_map.write_back(map_guard.file());
        directory.write_back(dir.file());
        Ok(())
    }

    fn open(&self, path: &str) -> FsResult<Arc<OpenFile>> {
        logger::debug!('f', "opening file {}", path);

        let (dir, name) = self.resolve(path)?;
        let name = name.ok_or(FsError::IsADirectory)?;

        let directory = Directory::fetch_from(dir.file());
        let sector = directory.find(&name).ok_or(FsError::NotFound)?;
        let file = self.open_sector(sector);
        if file.is_directory() {
            return Err(FsError::IsADirectory);
        }
        Ok(file)
    }

    fn remove(&self, path: &str) -> FsResult<()> {
        logger::debug!('f', "removing file {}", path);

        let (dir, name) = self.resolve(path)?;
        let name = name.ok_or(FsError::BadPath)?;

        let mut directory = Directory::fetch_from(dir.file());
        let sector = directory.find(&name).ok_or(FsError::NotFound)?;

        let header = FileHeader::fetch_from(&self.disk, sector);
        if header.is_directory() {
            return Err(FsError::IsADirectory);
        }

        if self.table.mark_for_remove(sector) {
            // Somebody still reads or writes it: the blocks go back to
            // the map at last close, the name goes away now.
            logger::debug!('f', "file {} is in use, removing later", path);
            directory.remove(&name);
            directory.write_back(dir.file());
            return Ok(());
        }

        let map_guard = self.lock_free_map();
        let mut free_map = Bitmap::fetch_from(self.num_sectors, map_guard.file());
        header.deallocate(&self.disk, &mut free_map);
        free_map.clear(sector);
        directory.remove(&name);

        directory.write_back(dir.file());
        free_map.write_back(map_guard.file());
        Ok(())
    }

    fn make_directory(&self, path: &str) -> FsResult<()> {
        logger::debug!('f', "creating directory {}", path);

        let (dir, name) = self.resolve(path)?;
        let name = name.ok_or(FsError::BadPath)?;
        if name.len() > FILE_NAME_MAX_LEN {
            return Err(FsError::BadPath);
        }

        let mut directory = Directory::fetch_from(dir.file());
        if directory.find(&name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let map_guard = self.lock_free_map();
        let mut free_map = Bitmap::fetch_from(self.num_sectors, map_guard.file());
        let sector = free_map.find().ok_or(FsError::NoSpace)?;
        directory.add(&name, sector)?;

        let mut header = FileHeader::new();
        header.allocate(&self.disk, &mut free_map, DIRECTORY_FILE_SIZE, true)?;
        header.write_back(&self.disk, sector);

        // A new directory starts out with an empty table on disk.
        {
            let new_dir = self.open_sector(sector);
            let guard = LockedFile::lock(new_dir);
            Directory::new().write_back(guard.file());
        }

        free_map.write_back(map_guard.file());
        directory.write_back(dir.file());
        Ok(())
    }

    fn remove_directory(&self, path: &str) -> FsResult<()> {
        logger::debug!('f', "removing directory {}", path);

        let (dir, name) = self.resolve(path)?;
        let name = name.ok_or(FsError::BadPath)?;

        let mut directory = Directory::fetch_from(dir.file());
        let sector = directory.find(&name).ok_or(FsError::NotFound)?;

        let header = FileHeader::fetch_from(&self.disk, sector);
        if !header.is_directory() {
            return Err(FsError::NotADirectory);
        }
        if self.table.used(sector) {
            return Err(FsError::InUse);
        }

        let empty = {
            let sub = self.open_sector(sector);
            let guard = LockedFile::lock(sub);
            Directory::fetch_from(guard.file()).is_empty()
        };
        if !empty {
            return Err(FsError::NotEmpty);
        }

        let map_guard = self.lock_free_map();
        let mut free_map = Bitmap::fetch_from(self.num_sectors, map_guard.file());
        header.deallocate(&self.disk, &mut free_map);
        free_map.clear(sector);
        directory.remove(&name);

        directory.write_back(dir.file());
        free_map.write_back(map_guard.file());
        Ok(())
    }

    fn change_directory(&self, path: &str) -> FsResult<()> {
        logger::debug!('f', "changing directory to {}", path);

        let (dir, name) = self.resolve(path)?;
        let target = match name {
            None => dir.file().clone(),
            Some(name) => {
                let directory = Directory::fetch_from(dir.file());
                let sector = directory.find(&name).ok_or(FsError::NotFound)?;
                let file = self.open_sector(sector);
                if !file.is_directory() {
                    return Err(FsError::NotADirectory);
                }
                file
            }
        };
        drop(dir);

        let current = self.sched.current();
        let old = current.ex_inner().current_dir.replace(target);
        drop(old);
        Ok(())
    }

    fn list(&self, path: &str) -> FsResult<Vec<String>> {
        let (dir, name) = self.resolve(path)?;
        match name {
            None => Ok(Directory::fetch_from(dir.file()).list()),
            Some(name) => {
                let directory = Directory::fetch_from(dir.file());
                let sector = directory.find(&name).ok_or(FsError::NotFound)?;
                let file = self.open_sector(sector);
                if !file.is_directory() {
                    return Err(FsError::NotADirectory);
                }
                let guard = LockedFile::lock(file);
                Ok(Directory::fetch_from(guard.file()).list())
            }
        }
    }

    // ---- consistency check ----

    fn check_sector(&self, sector: usize, shadow: &mut Bitmap, ok: &mut bool) {
        if sector >= self.num_sectors {
            logger::error!("check: sector number {} too big", sector);
            *ok = false;
            return;
        }
        if shadow.test(sector) {
            logger::error!("check: sector {} referenced twice", sector);
            *ok = false;
        } else {
            shadow.mark(sector);
        }
    }

    fn check_header(&self, header: &FileHeader, shadow: &mut Bitmap, ok: &mut bool) {
        use machine::config::SECTOR_SIZE;
        if header.num_sectors() < header.length().div_ceil(SECTOR_SIZE) {
            logger::error!("check: sector count not compatible with file size");
            *ok = false;
            return;
        }
        let mut sectors = Vec::new();
        header.each_sector(&self.disk, |s| sectors.push(s));
        for sector in sectors {
            self.check_sector(sector, shadow, ok);
        }
    }

    fn check_directory(&self, file: &Arc<OpenFile>, shadow: &mut Bitmap, ok: &mut bool) {
        let directory = {
            let guard = LockedFile::lock(file.clone());
            Directory::fetch_from(guard.file())
        };
        let mut seen: Vec<String> = Vec::new();
        for entry in directory.entries() {
            if entry.name.len() > FILE_NAME_MAX_LEN {
                logger::error!("check: file name too long");
                *ok = false;
            }
            if seen.iter().any(|n| n == &entry.name) {
                logger::error!("check: repeated file name {}", entry.name);
                *ok = false;
            } else {
                seen.push(entry.name.clone());
            }

            let sector = entry.sector as usize;
            self.check_sector(sector, shadow, ok);
            let header = FileHeader::fetch_from(&self.disk, sector);
            self.check_header(&header, shadow, ok);
            if header.is_directory() {
                let sub = self.open_sector(sector);
                self.check_directory(&sub, shadow, ok);
            }
        }
    }

    fn check(&self) -> bool {
        logger::debug!('f', "performing file-system check");
        let mut ok = true;

        let mut shadow = Bitmap::new(self.num_sectors);
        shadow.mark(FREE_MAP_SECTOR);
        shadow.mark(DIRECTORY_SECTOR);

        let map_header = FileHeader::fetch_from(&self.disk, FREE_MAP_SECTOR);
        if map_header.length() != Bitmap::file_size(self.num_sectors) {
            logger::error!("check: bad free-map header size");
            ok = false;
        }
        self.check_header(&map_header, &mut shadow, &mut ok);

        let dir_header = FileHeader::fetch_from(&self.disk, DIRECTORY_SECTOR);
        self.check_header(&dir_header, &mut shadow, &mut ok);
        self.check_directory(&self.root_file(), &mut shadow, &mut ok);

        let guard = self.lock_free_map();
        let free_map = Bitmap::fetch_from(self.num_sectors, guard.file());
        for sector in 0..self.num_sectors {
            if free_map.test(sector) != shadow.test(sector) {
                logger::error!("check: inconsistent bitmap at sector {}", sector);
                ok = false;
            }
        }
        ok
    }
}
