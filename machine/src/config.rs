//! Machine geometry.
//!
//! Page size equals sector size so a page moves to and from backing store
//! in exactly one disk transfer.

/// Disk sector size in bytes.
pub const SECTOR_SIZE: usize = 128;

/// Virtual-memory page size in bytes.
pub const PAGE_SIZE: usize = SECTOR_SIZE;

/// Physical frames of main memory.
pub const NUM_PHYS_PAGES: usize = 32;

/// Main memory size in bytes.
pub const MEMORY_SIZE: usize = NUM_PHYS_PAGES * PAGE_SIZE;

/// Software-managed TLB slots.
pub const TLB_SIZE: usize = 4;

/// Default disk geometry when none is requested.
pub const DEFAULT_NUM_SECTORS: usize = 1024;

/// Simulated ticks between a disk request and its completion interrupt.
pub const DISK_TICKS: u64 = 100;
