//! What the address space needs to know about an executable image:
//! segment extents and positioned reads. Parsing an on-disk object format
//! into this shape happens outside the kernel core.

use alloc::vec::Vec;

pub trait Executable: Send + Sync {
    fn code_addr(&self) -> usize;
    fn code_size(&self) -> usize;
    fn init_data_addr(&self) -> usize;
    fn init_data_size(&self) -> usize;
    fn uninit_data_size(&self) -> usize;

    /// Read `buf.len()` bytes of the code segment starting at `offset`.
    fn read_code(&self, buf: &mut [u8], offset: usize);
    /// Read `buf.len()` bytes of the initialized-data segment.
    fn read_data(&self, buf: &mut [u8], offset: usize);

    /// Total image size: code, initialized data and bss.
    fn size(&self) -> usize {
        self.code_size() + self.init_data_size() + self.uninit_data_size()
    }
}

/// An executable held in memory, with code at virtual 0 and initialized
/// data immediately after it. The loader hook builds these; tests build
/// them directly.
pub struct MemExecutable {
    code: Vec<u8>,
    data: Vec<u8>,
    bss_size: usize,
}

impl MemExecutable {
    pub fn new(code: Vec<u8>, data: Vec<u8>, bss_size: usize) -> MemExecutable {
        MemExecutable {
            code,
            data,
            bss_size,
        }
    }
}

impl Executable for MemExecutable {
    fn code_addr(&self) -> usize {
        0
    }

    fn code_size(&self) -> usize {
        self.code.len()
    }

    fn init_data_addr(&self) -> usize {
        self.code.len()
    }

    fn init_data_size(&self) -> usize {
        self.data.len()
    }

    fn uninit_data_size(&self) -> usize {
        self.bss_size
    }

    fn read_code(&self, buf: &mut [u8], offset: usize) {
        buf.copy_from_slice(&self.code[offset..offset + buf.len()]);
    }

    fn read_data(&self, buf: &mut [u8], offset: usize) {
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
    }
}
