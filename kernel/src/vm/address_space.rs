//! Per-process address spaces.
//!
//! Pages are demand loaded: the table starts out all-invalid and a fault
//! either pulls the page from swap or materializes it from the
//! executable (or zeros, for bss). Eager construction is kept for runs
//! without paging: every frame is claimed and filled up front.
//!
//! The hardware TLB is software managed. On a context switch the TLB is
//! folded back into the page table and invalidated; faults refill it one
//! entry at a time, round robin.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use machine::config::{PAGE_SIZE, TLB_SIZE};
use machine::memory::{MainMemory, Mmu, TranslationEntry};
use machine::registers::{Registers, NEXT_PC_REG, PC_REG, STACK_REG};
use sys_interface::config::USER_STACK_SIZE;

use crate::sched::scheduler::Scheduler;
use crate::sync::unicore::UPSafeCell;
use crate::vm::core_map::CoreMap;
use crate::vm::executable::Executable;
use crate::vm::swap::Swap;

/// A page-table slot: the translation shared with the TLB plus the
/// swapped-out flag, which only the kernel tracks.
#[derive(Clone, Copy)]
struct Pte {
    entry: TranslationEntry,
    swapped: bool,
}

struct SpaceInner {
    page_table: Vec<Pte>,
    tlb_victim: usize,
}

pub struct AddressSpace {
    asid: usize,
    num_pages: usize,
    exe: Box<dyn Executable>,
    swap: Option<Swap>,
    sched: Arc<Scheduler>,
    mmu: Arc<Mmu>,
    mem: Arc<MainMemory>,
    core_map: Arc<CoreMap>,
    inner: UPSafeCell<SpaceInner>,
}

fn blank_table(num_pages: usize) -> Vec<Pte> {
    (0..num_pages)
        .map(|vpn| Pte {
            entry: TranslationEntry {
                virtual_page: vpn,
                ..Default::default()
            },
            swapped: false,
        })
        .collect()
}

impl AddressSpace {
    /// Demand-paged construction: nothing is resident yet and the space
    /// gets its own swap file.
    pub fn new(
        asid: usize,
        exe: Box<dyn Executable>,
        swap: Swap,
        sched: &Arc<Scheduler>,
        mmu: &Arc<Mmu>,
        mem: &Arc<MainMemory>,
        core_map: &Arc<CoreMap>,
    ) -> Arc<AddressSpace> {
        let size = exe.size() + USER_STACK_SIZE;
        let num_pages = size.div_ceil(PAGE_SIZE);
        logger::debug!(
            'a',
            "initializing address space {}, {} pages ({} bytes)",
            asid,
            num_pages,
            num_pages * PAGE_SIZE
        );

        Arc::new(AddressSpace {
            asid,
            num_pages,
            exe,
            swap: Some(swap),
            sched: sched.clone(),
            mmu: mmu.clone(),
            mem: mem.clone(),
            core_map: core_map.clone(),
            inner: unsafe {
                UPSafeCell::new(SpaceInner {
                    page_table: blank_table(num_pages),
                    tlb_victim: 0,
                })
            },
        })
    }

    /// Eager construction: claim a frame per page up front and copy the
    /// whole image in. Code must start at virtual 0, and initialized data
    /// must follow it contiguously.
    pub fn new_eager(
        asid: usize,
        exe: Box<dyn Executable>,
        sched: &Arc<Scheduler>,
        mmu: &Arc<Mmu>,
        mem: &Arc<MainMemory>,
        core_map: &Arc<CoreMap>,
    ) -> Arc<AddressSpace> {
        let size = exe.size() + USER_STACK_SIZE;
        let num_pages = size.div_ceil(PAGE_SIZE);
        assert!(
            num_pages <= core_map.free_frame_count(),
            "program too big for physical memory"
        );

        assert_eq!(exe.code_addr(), 0, "code must start at virtual 0");
        assert!(
            exe.init_data_size() == 0 || exe.init_data_addr() == exe.code_size(),
            "code and data segments must be contiguous"
        );

        let space = Arc::new(AddressSpace {
            asid,
            num_pages,
            exe,
            swap: None,
            sched: sched.clone(),
            mmu: mmu.clone(),
            mem: mem.clone(),
            core_map: core_map.clone(),
            inner: unsafe {
                UPSafeCell::new(SpaceInner {
                    page_table: blank_table(num_pages),
                    tlb_victim: 0,
                })
            },
        });

        for vpn in 0..num_pages {
            let ppn = core_map.map_phys_page(vpn);
            space.inner.exclusive_session(|inner| {
                inner.page_table[vpn].entry.physical_page = ppn;
                inner.page_table[vpn].entry.valid = true;
            });
            space.load_page(vpn, ppn);
        }
        space
    }

    pub fn asid(&self) -> usize {
        self.asid
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Set up user registers for starting at virtual 0, stack at the top
    /// of the space with a little slack.
    pub fn init_registers(&self, regs: &Registers) {
        regs.write(PC_REG, 0);
        regs.write(NEXT_PC_REG, 4);
        regs.write(STACK_REG, (self.num_pages * PAGE_SIZE - 16) as u32);
        logger::debug!(
            'a',
            "initializing stack register to {}",
            self.num_pages * PAGE_SIZE - 16
        );
    }

    /// Demand-fault resolution: make `vpn` resident and return its
    /// translation. Out-of-range pages return nothing and the caller
    /// raises a bus fault.
    pub fn translation_for(&self, vpn: usize) -> Option<TranslationEntry> {
        assert_eq!(
            self.asid,
            self.sched.current().tid(),
            "fault handled outside the owning thread"
        );

        if vpn >= self.num_pages {
            return None;
        }

        let (valid, swapped) = self
            .inner
            .exclusive_session(|inner| (inner.page_table[vpn].entry.valid, inner.page_table[vpn].swapped));

        if valid {
            // Resident already, only the TLB missed.
        } else if swapped {
            let ppn = self.core_map.map_phys_page(vpn);
            logger::debug!('x', "swapping in vpn {} asid {}", vpn, self.asid);
            self.swap.as_ref().unwrap().pull_swap(vpn, ppn);
            self.inner.exclusive_session(|inner| {
                let pte = &mut inner.page_table[vpn];
                pte.entry.physical_page = ppn;
                pte.entry.valid = true;
                pte.swapped = false;
            });
        } else {
            let ppn = self.core_map.map_phys_page(vpn);
            self.inner.exclusive_session(|inner| {
                let pte = &mut inner.page_table[vpn];
                pte.entry.physical_page = ppn;
                pte.entry.valid = true;
            });
            self.load_page(vpn, ppn);
        }

        Some(self.inner.exclusive_session(|inner| inner.page_table[vpn].entry))
    }

    /// Fill frame `ppn` with the pieces of `vpn` that the executable
    /// defines: code, initialized data, zeros for bss. The page is
    /// read-only iff it lies entirely inside the code segment.
    fn load_page(&self, vpn: usize, ppn: usize) {
        let vstart = vpn * PAGE_SIZE;
        let vend = vstart + PAGE_SIZE;

        let code_start = self.exe.code_addr();
        let code_end = code_start + self.exe.code_size();
        let data_start = self.exe.init_data_addr();
        let data_end = data_start + self.exe.init_data_size();
        let bss_start = if self.exe.init_data_size() > 0 {
            data_end
        } else {
            code_end
        };
        let bss_end = bss_start + self.exe.uninit_data_size();

        if vstart < code_end && vend > code_start {
            let copy_start = vstart.max(code_start);
            let copy_end = vend.min(code_end);
            let mut buf = vec![0u8; copy_end - copy_start];
            self.exe.read_code(&mut buf, copy_start - code_start);
            self.mem
                .write(ppn * PAGE_SIZE + (copy_start - vstart), &buf);
        }

        if self.exe.init_data_size() > 0 && vstart < data_end && vend > data_start {
            let copy_start = vstart.max(data_start);
            let copy_end = vend.min(data_end);
            let mut buf = vec![0u8; copy_end - copy_start];
            self.exe.read_data(&mut buf, copy_start - data_start);
            self.mem
                .write(ppn * PAGE_SIZE + (copy_start - vstart), &buf);
        }

        if self.exe.uninit_data_size() > 0 && vstart < bss_end && vend > bss_start {
            let zero_start = vstart.max(bss_start);
            let zero_end = vend.min(bss_end);
            self.mem
                .zero(ppn * PAGE_SIZE + (zero_start - vstart), zero_end - zero_start);
        }

        let read_only = code_start <= vstart && vend <= code_end;
        self.inner.exclusive_session(|inner| {
            inner.page_table[vpn].entry.read_only = read_only;
        });
    }

    /// Round-robin a TLB slot back into the page table and invalidate
    /// it; returns the freed slot.
    pub fn evict_tlb(&self) -> usize {
        let slot = self.inner.exclusive_session(|inner| {
            let slot = inner.tlb_victim;
            inner.tlb_victim = (inner.tlb_victim + 1) % TLB_SIZE;
            slot
        });

        let old = self.mmu.entry(slot);
        if old.valid {
            self.inner.exclusive_session(|inner| {
                inner.page_table[old.virtual_page].entry = old;
            });
            let mut invalid = old;
            invalid.valid = false;
            self.mmu.set_entry(slot, invalid);
        }
        slot
    }

    /// Context-switch out: every TLB entry goes back to the page table.
    pub fn save_state(&self) {
        for _ in 0..TLB_SIZE {
            self.evict_tlb();
        }
    }

    /// Context-switch in: the TLB holds nothing of ours yet.
    pub fn restore_state(&self) {
        self.mmu.invalidate_all();
    }

    /// Push `vpn` out of main memory. Only dirty, writable pages travel
    /// to swap; everything else can be rebuilt from the executable.
    pub fn swap_out(&self, vpn: usize) {
        let ppn = self.inner.exclusive_session(|inner| {
            let pte = &inner.page_table[vpn];
            assert!(pte.entry.valid, "swapping out a non-resident page");
            assert!(!pte.swapped, "swapping out a page already in swap");
            pte.entry.physical_page
        });

        // A TLB entry for this page may carry a fresher dirty bit.
        if let Some(old) = self.mmu.invalidate_vpn(vpn) {
            self.inner.exclusive_session(|inner| {
                let pte = &mut inner.page_table[vpn];
                pte.entry.dirty |= old.dirty;
                pte.entry.used |= old.used;
            });
        }

        let will_swap = self.inner.exclusive_session(|inner| {
            let pte = &mut inner.page_table[vpn];
            let will_swap = pte.entry.dirty && !pte.entry.read_only;
            pte.entry.valid = false;
            pte.swapped = will_swap;
            will_swap
        });

        if will_swap {
            logger::debug!('x', "swapping out vpn {} asid {}", vpn, self.asid);
            self.swap
                .as_ref()
                .expect("eager space has no swap")
                .write_swap(vpn, ppn);
        }
    }

    /// Use and dirty bits of a page, or nothing if it is not resident.
    pub fn use_dirty(&self, vpn: usize) -> Option<(bool, bool)> {
        self.inner.exclusive_session(|inner| {
            let pte = &inner.page_table[vpn];
            if pte.entry.valid {
                Some((pte.entry.used, pte.entry.dirty))
            } else {
                None
            }
        })
    }

    pub fn clear_use(&self, vpn: usize) {
        self.inner.exclusive_session(|inner| {
            inner.page_table[vpn].entry.used = false;
        });
    }
}
