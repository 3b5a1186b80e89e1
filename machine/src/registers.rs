//! User register file.
//!
//! A thread running a user program has two register sets: the host carries
//! the kernel one, this structure carries the user one. The kernel saves
//! and restores it across context switches.

use spin::Mutex;

pub const NUM_GP_REGS: usize = 32;
pub const NUM_TOTAL_REGS: usize = 38;

/// Syscall id and result register.
pub const R2: usize = 2;
/// First syscall argument register; arguments continue through `r7`.
pub const R4: usize = 4;
pub const R5: usize = 5;
pub const R6: usize = 6;
pub const R7: usize = 7;

pub const STACK_REG: usize = 29;
pub const RET_ADDR_REG: usize = 31;
pub const PC_REG: usize = 32;
pub const NEXT_PC_REG: usize = 33;
pub const PREV_PC_REG: usize = 34;

pub struct Registers {
    regs: Mutex<[u32; NUM_TOTAL_REGS]>,
}

impl Registers {
    pub fn new() -> Registers {
        Registers {
            regs: Mutex::new([0; NUM_TOTAL_REGS]),
        }
    }

    pub fn read(&self, reg: usize) -> u32 {
        self.regs.lock()[reg]
    }

    pub fn write(&self, reg: usize, value: u32) {
        self.regs.lock()[reg] = value;
    }

    /// Step past the syscall instruction, honouring the branch delay slot.
    pub fn advance_pc(&self) {
        let mut regs = self.regs.lock();
        regs[PREV_PC_REG] = regs[PC_REG];
        regs[PC_REG] = regs[NEXT_PC_REG];
        regs[NEXT_PC_REG] += 4;
    }

    pub fn snapshot(&self) -> [u32; NUM_TOTAL_REGS] {
        *self.regs.lock()
    }

    pub fn restore(&self, saved: &[u32; NUM_TOTAL_REGS]) {
        *self.regs.lock() = *saved;
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pc_advances_through_the_delay_slot() {
        let regs = Registers::new();
        regs.write(PC_REG, 100);
        regs.write(NEXT_PC_REG, 104);
        regs.advance_pc();
        assert_eq!(regs.read(PREV_PC_REG), 100);
        assert_eq!(regs.read(PC_REG), 104);
        assert_eq!(regs.read(NEXT_PC_REG), 108);
    }
}
