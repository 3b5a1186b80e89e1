//! Per-thread open-file table.
//!
//! Descriptors 0 and 1 are wired to the console and never reach the file
//! system.

use alloc::sync::Arc;
use alloc::vec::Vec;

use sys_interface::config::{CONSOLE_INPUT, CONSOLE_OUTPUT, MAX_OPEN_FILES};

use crate::fs::open_file::OpenFile;

#[derive(Clone)]
pub enum FdEntry {
    ConsoleInput,
    ConsoleOutput,
    File(Arc<OpenFile>),
}

pub struct FdTable {
    slots: Vec<Option<FdEntry>>,
}

impl FdTable {
    pub fn new() -> FdTable {
        let mut slots = Vec::new();
        slots.resize_with(MAX_OPEN_FILES, || None);
        slots[CONSOLE_INPUT] = Some(FdEntry::ConsoleInput);
        slots[CONSOLE_OUTPUT] = Some(FdEntry::ConsoleOutput);
        FdTable { slots }
    }

    /// Register an open file, returning its descriptor.
    pub fn add(&mut self, file: Arc<OpenFile>) -> Option<usize> {
        let fd = self.slots.iter().position(|slot| slot.is_none())?;
        self.slots[fd] = Some(FdEntry::File(file));
        Some(fd)
    }

    pub fn get(&self, fd: usize) -> Option<FdEntry> {
        self.slots.get(fd)?.clone()
    }

    /// Drop a descriptor, handing back whatever it held.
    pub fn remove(&mut self, fd: usize) -> Option<FdEntry> {
        if fd < CONSOLE_OUTPUT + 1 {
            // console descriptors stay put
            return None;
        }
        self.slots.get_mut(fd)?.take()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_descriptors_are_reserved() {
        let mut table = FdTable::new();
        assert!(matches!(table.get(0), Some(FdEntry::ConsoleInput)));
        assert!(matches!(table.get(1), Some(FdEntry::ConsoleOutput)));
        assert!(table.remove(0).is_none());
        assert!(table.remove(1).is_none());
    }

    #[test]
    fn missing_descriptor_is_none() {
        let table = FdTable::new();
        assert!(table.get(5).is_none());
        assert!(table.get(MAX_OPEN_FILES + 3).is_none());
    }
}
