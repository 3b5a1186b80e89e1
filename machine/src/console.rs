//! Console device.
//!
//! Input is fed by the harness, output is captured so tests can assert on
//! what a program printed. File descriptors 0 and 1 map here and never
//! touch the file system.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use spin::Mutex;

pub struct Console {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

impl Console {
    pub fn new() -> Console {
        Console {
            input: Mutex::new(VecDeque::new()),
            output: Mutex::new(Vec::new()),
        }
    }

    pub fn feed_input(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    pub fn get_char(&self) -> Option<u8> {
        self.input.lock().pop_front()
    }

    pub fn put_char(&self, byte: u8) {
        self.output.lock().push(byte);
    }

    /// Drain everything written so far.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.output.lock())
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
