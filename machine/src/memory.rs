//! Main memory and the software-managed MMU.
//!
//! Translation consults only the TLB; the page tables are a kernel
//! structure the hardware never walks. A miss is reported as a fault and
//! the kernel refills the TLB from the faulting space.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;
use sys_interface::Exception;

use crate::config::{MEMORY_SIZE, NUM_PHYS_PAGES, PAGE_SIZE, TLB_SIZE};

/// One translation, as seen by both the TLB and the kernel page tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslationEntry {
    pub virtual_page: usize,
    pub physical_page: usize,
    pub valid: bool,
    pub used: bool,
    pub dirty: bool,
    pub read_only: bool,
}

pub struct MainMemory {
    bytes: Mutex<Vec<u8>>,
}

impl MainMemory {
    pub fn new() -> MainMemory {
        MainMemory {
            bytes: Mutex::new(vec![0; MEMORY_SIZE]),
        }
    }

    pub fn read(&self, addr: usize, buf: &mut [u8]) {
        assert!(addr + buf.len() <= MEMORY_SIZE);
        buf.copy_from_slice(&self.bytes.lock()[addr..addr + buf.len()]);
    }

    pub fn write(&self, addr: usize, buf: &[u8]) {
        assert!(addr + buf.len() <= MEMORY_SIZE);
        self.bytes.lock()[addr..addr + buf.len()].copy_from_slice(buf);
    }

    pub fn read_frame(&self, ppn: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), PAGE_SIZE);
        self.read(ppn * PAGE_SIZE, buf);
    }

    pub fn write_frame(&self, ppn: usize, buf: &[u8]) {
        assert_eq!(buf.len(), PAGE_SIZE);
        self.write(ppn * PAGE_SIZE, buf);
    }

    /// Zero a byte range inside one frame.
    pub fn zero(&self, addr: usize, len: usize) {
        assert!(addr + len <= MEMORY_SIZE);
        self.bytes.lock()[addr..addr + len].fill(0);
    }
}

impl Default for MainMemory {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Mmu {
    tlb: Mutex<[TranslationEntry; TLB_SIZE]>,
    bad_vaddr: Mutex<usize>,
}

impl Mmu {
    pub fn new() -> Mmu {
        Mmu {
            tlb: Mutex::new([TranslationEntry::default(); TLB_SIZE]),
            bad_vaddr: Mutex::new(0),
        }
    }

    /// Translate a virtual address, updating use and dirty bits on the
    /// matching TLB entry. On failure the bad address register holds the
    /// offending address.
    pub fn translate(&self, vaddr: usize, writing: bool) -> Result<usize, Exception> {
        let vpn = vaddr / PAGE_SIZE;
        let offset = vaddr % PAGE_SIZE;

        let mut tlb = self.tlb.lock();
        for entry in tlb.iter_mut() {
            if entry.valid && entry.virtual_page == vpn {
                if writing && entry.read_only {
                    drop(tlb);
                    *self.bad_vaddr.lock() = vaddr;
                    return Err(Exception::ReadOnly);
                }
                entry.used = true;
                if writing {
                    entry.dirty = true;
                }
                if entry.physical_page >= NUM_PHYS_PAGES {
                    drop(tlb);
                    *self.bad_vaddr.lock() = vaddr;
                    return Err(Exception::BusError);
                }
                return Ok(entry.physical_page * PAGE_SIZE + offset);
            }
        }
        drop(tlb);
        *self.bad_vaddr.lock() = vaddr;
        Err(Exception::PageFault)
    }

    pub fn bad_vaddr(&self) -> usize {
        *self.bad_vaddr.lock()
    }

    pub fn entry(&self, slot: usize) -> TranslationEntry {
        self.tlb.lock()[slot]
    }

    pub fn set_entry(&self, slot: usize, entry: TranslationEntry) {
        self.tlb.lock()[slot] = entry;
    }

    /// Invalidate the slot holding `vpn`, if any, returning the entry it
    /// held so its use and dirty bits can be folded back.
    pub fn invalidate_vpn(&self, vpn: usize) -> Option<TranslationEntry> {
        let mut tlb = self.tlb.lock();
        for entry in tlb.iter_mut() {
            if entry.valid && entry.virtual_page == vpn {
                let old = *entry;
                entry.valid = false;
                return Some(old);
            }
        }
        None
    }

    pub fn invalidate_all(&self) {
        for entry in self.tlb.lock().iter_mut() {
            entry.valid = false;
        }
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_miss_and_hit() {
        let mmu = Mmu::new();
        assert_eq!(mmu.translate(0x80, false), Err(Exception::PageFault));
        assert_eq!(mmu.bad_vaddr(), 0x80);

        mmu.set_entry(
            0,
            TranslationEntry {
                virtual_page: 1,
                physical_page: 5,
                valid: true,
                ..Default::default()
            },
        );
        assert_eq!(mmu.translate(0x80 + 4, false), Ok(5 * PAGE_SIZE + 4));
        assert!(mmu.entry(0).used);
        assert!(!mmu.entry(0).dirty);

        assert_eq!(mmu.translate(0x80, true), Ok(5 * PAGE_SIZE));
        assert!(mmu.entry(0).dirty);
    }

    #[test]
    fn read_only_pages_reject_writes() {
        let mmu = Mmu::new();
        mmu.set_entry(
            2,
            TranslationEntry {
                virtual_page: 0,
                physical_page: 1,
                valid: true,
                read_only: true,
                ..Default::default()
            },
        );
        assert_eq!(mmu.translate(0, false), Ok(PAGE_SIZE));
        assert_eq!(mmu.translate(0, true), Err(Exception::ReadOnly));
    }

    #[test]
    fn memory_round_trip() {
        let mem = MainMemory::new();
        mem.write(130, b"hola");
        let mut buf = [0u8; 4];
        mem.read(130, &mut buf);
        assert_eq!(&buf, b"hola");

        let frame = [7u8; PAGE_SIZE];
        mem.write_frame(3, &frame);
        let mut out = [0u8; PAGE_SIZE];
        mem.read_frame(3, &mut out);
        assert_eq!(out, frame);
    }
}
