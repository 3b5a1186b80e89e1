//! The simulated machine the kernel runs on.
//!
//! This crate is the hardware edge of the system: main memory, the
//! software-managed MMU, the user register file, the interrupt controller
//! (which owns simulated time), the asynchronous sector disk and the
//! console. Instruction decoding and executable parsing live outside; the
//! kernel only ever sees this interface.

pub mod config;
pub mod console;
pub mod context;
pub mod disk;
pub mod interrupt;
pub mod memory;
pub mod registers;

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

#[allow(dead_code)]
pub(crate) const LOG_LEVEL: logger::LogLevel = logger::LogLevel::INFO;

/// One simulated machine: every device plus the interrupt controller that
/// sequences them.
pub struct Machine {
    pub interrupt: Arc<interrupt::Interrupt>,
    pub memory: Arc<memory::MainMemory>,
    pub mmu: Arc<memory::Mmu>,
    pub regs: Arc<registers::Registers>,
    pub console: Arc<console::Console>,
    pub disk: Arc<disk::Disk>,
    halted: AtomicBool,
}

impl Machine {
    /// Build a machine with a blank disk of `num_sectors` sectors.
    pub fn new(num_sectors: usize) -> Arc<Machine> {
        let interrupt = interrupt::Interrupt::new();
        let disk = disk::Disk::new(interrupt.clone(), num_sectors);
        Arc::new(Machine {
            interrupt,
            memory: Arc::new(memory::MainMemory::new()),
            mmu: Arc::new(memory::Mmu::new()),
            regs: Arc::new(registers::Registers::new()),
            console: Arc::new(console::Console::new()),
            disk,
            halted: AtomicBool::new(false),
        })
    }

    /// Reuse an existing disk image, as after a reboot.
    pub fn with_disk(disk: Arc<disk::Disk>) -> Arc<Machine> {
        let interrupt = disk.interrupt();
        Arc::new(Machine {
            interrupt,
            memory: Arc::new(memory::MainMemory::new()),
            mmu: Arc::new(memory::Mmu::new()),
            regs: Arc::new(registers::Registers::new()),
            console: Arc::new(console::Console::new()),
            disk,
            halted: AtomicBool::new(false),
        })
    }

    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}
