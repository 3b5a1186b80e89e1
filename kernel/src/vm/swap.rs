//! Per-process backing store.
//!
//! Each address space owns a swap file named after its id, created in the
//! root directory and deleted when the space goes away. Offset
//! `vpn * PAGE_SIZE` always holds the last swapped-out copy of virtual
//! page `vpn`.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;

use machine::config::PAGE_SIZE;
use machine::memory::MainMemory;

use crate::fs::file_system::FileSystem;
use crate::fs::open_file::OpenFile;

pub struct Swap {
    name: String,
    fs: FileSystem,
    mem: Arc<MainMemory>,
    file: Option<Arc<OpenFile>>,
}

impl Swap {
    pub fn new(fs: &FileSystem, mem: &Arc<MainMemory>, asid: usize) -> Swap {
        let name = format!("/SWAP.{}", asid);
        fs.create(&name, 0).expect("failed to create swap file");
        let file = fs.open(&name).expect("failed to open swap file");
        Swap {
            name,
            fs: fs.clone(),
            mem: mem.clone(),
            file: Some(file),
        }
    }

    /// Copy physical frame `ppn` out to the slot of virtual page `vpn`.
    pub fn write_swap(&self, vpn: usize, ppn: usize) {
        let mut page = [0u8; PAGE_SIZE];
        self.mem.read_frame(ppn, &mut page);
        let written = self
            .file
            .as_ref()
            .unwrap()
            .write_at(&page, vpn * PAGE_SIZE);
        assert_eq!(written, PAGE_SIZE, "swap area full");
    }

    /// Copy the slot of virtual page `vpn` back into frame `ppn`.
    pub fn pull_swap(&self, vpn: usize, ppn: usize) {
        let mut page = [0u8; PAGE_SIZE];
        let read = self.file.as_ref().unwrap().read_at(&mut page, vpn * PAGE_SIZE);
        assert_eq!(read, PAGE_SIZE, "pulling a page never written to swap");
        self.mem.write_frame(ppn, &page);
    }
}

impl Drop for Swap {
    fn drop(&mut self) {
        // close before unlinking
        self.file.take();
        let _ = self.fs.remove(&self.name);
    }
}
