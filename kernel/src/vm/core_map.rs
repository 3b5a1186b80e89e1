//! Global physical-frame table.
//!
//! Each frame of main memory records which process owns it and which
//! virtual page it holds; frames carry `(tid, vpn)` indices rather than
//! references, and owners are looked up through the thread table. When no
//! frame is free, an enhanced second-chance sweep picks a victim and the
//! owning space swaps it out.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use machine::config::NUM_PHYS_PAGES;

use crate::fs::bitmap::Bitmap;
use crate::sched::scheduler::Scheduler;
use crate::sync::unicore::UPSafeCell;

#[derive(Clone, Copy, Default)]
struct CoreEntry {
    tid: usize,
    vpn: usize,
}

struct CoreInner {
    entries: Vec<CoreEntry>,
    frames: Bitmap,
    victim: usize,
}

pub struct CoreMap {
    sched: Arc<Scheduler>,
    inner: UPSafeCell<CoreInner>,
}

impl CoreMap {
    pub fn new(sched: &Arc<Scheduler>) -> Arc<CoreMap> {
        Arc::new(CoreMap {
            sched: sched.clone(),
            inner: unsafe {
                UPSafeCell::new(CoreInner {
                    entries: vec![CoreEntry::default(); NUM_PHYS_PAGES],
                    frames: Bitmap::new(NUM_PHYS_PAGES),
                    victim: 0,
                })
            },
        })
    }

    pub fn free_frame_count(&self) -> usize {
        self.inner.exclusive_session(|inner| inner.frames.count_clear())
    }

    /// Give the current process a frame for virtual page `vpn`: a free
    /// one when available, an evicted one otherwise. The frame is
    /// registered to `(current, vpn)` before returning.
    pub fn map_phys_page(&self, vpn: usize) -> usize {
        let free = self.inner.exclusive_session(|inner| inner.frames.find());
        let ppn = match free {
            Some(ppn) => ppn,
            None => self.evict(),
        };

        let tid = self.sched.current().tid();
        self.inner.exclusive_session(|inner| {
            inner.entries[ppn] = CoreEntry { tid, vpn };
        });
        logger::debug!('a', "frame {} mapped to (tid {}, vpn {})", ppn, tid, vpn);
        ppn
    }

    /// Release every frame owned by `tid`, as when its process exits.
    pub fn free_all(&self, tid: usize) {
        self.inner.exclusive_session(|inner| {
            for ppn in 0..NUM_PHYS_PAGES {
                if inner.entries[ppn].tid == tid && inner.frames.test(ppn) {
                    inner.frames.clear(ppn);
                }
            }
        });
    }

    fn evict(&self) -> usize {
        // Fold the running space's TLB state into its page table so the
        // use and dirty bits below are current.
        let current = self.sched.current();
        if let Some(space) = current.space() {
            space.save_state();
        }

        let ppn = self.select_victim();
        let CoreEntry { tid, vpn } = self.inner.exclusive_session(|inner| inner.entries[ppn]);

        let owner = self
            .sched
            .table()
            .get(tid)
            .expect("core-map owner vanished");
        let space = owner.space().expect("core-map owner has no space");
        space.swap_out(vpn);

        ppn
    }

    /// Enhanced second chance, up to four passes over the frames:
    /// clean-and-unused, then unused (clearing use bits on the way), then
    /// clean, then anything. Frames whose page is mid-eviction are
    /// skipped.
    fn select_victim(&self) -> usize {
        let mut inner = self.inner.exclusive_access();
        for pass in 0..4 {
            for _ in 0..NUM_PHYS_PAGES {
                let ppn = inner.victim;
                inner.victim = (inner.victim + 1) % NUM_PHYS_PAGES;

                let CoreEntry { tid, vpn } = inner.entries[ppn];
                let owner = match self.sched.table().get(tid) {
                    Some(owner) => owner,
                    None => continue,
                };
                let space = match owner.space() {
                    Some(space) => space,
                    None => continue,
                };
                let (used, dirty) = match space.use_dirty(vpn) {
                    Some(bits) => bits,
                    None => continue, // page not valid: eviction in progress
                };

                let suitable = match pass {
                    0 => !used && !dirty,
                    1 => {
                        // second chance: strip the use bit while passing
                        if used {
                            space.clear_use(vpn);
                        }
                        !used
                    }
                    2 => !dirty,
                    _ => true,
                };
                if suitable {
                    return ppn;
                }
            }
        }
        panic!("no evictable frame in the core map");
    }
}
