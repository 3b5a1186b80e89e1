//! Byte copies between user space and the kernel.
//!
//! A translation can miss simply because the page was never touched; the
//! copy retries once after running the demand-paging path. A second miss
//! on the same byte means the paging machinery is broken, which is
//! fatal. Addresses outside the space surface as a failed copy and the
//! syscall layer turns them into an error return.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use sys_interface::Exception;

use crate::kernel::Kernel;
use crate::userprog::exception;

/// Longest path or argument string a syscall will copy in.
pub const MAX_STRING_LEN: usize = 128;

fn translate_user(kernel: &Arc<Kernel>, vaddr: usize, writing: bool) -> Option<usize> {
    for _attempt in 0..2 {
        match kernel.machine.mmu.translate(vaddr, writing) {
            Ok(paddr) => return Some(paddr),
            Err(Exception::PageFault) => {
                // 缺页: 走按需调页, 然后重试一次
                if !exception::handle_page_fault(kernel, vaddr) {
                    return None;
                }
            }
            Err(_) => return None,
        }
    }
    panic!("user translation for {:#x} unresolved after retry", vaddr);
}

/// Copy a NUL-terminated string out of user memory.
pub fn read_str_from_user(kernel: &Arc<Kernel>, addr: usize) -> Option<String> {
    let mut bytes = Vec::new();
    for i in 0..MAX_STRING_LEN {
        let paddr = translate_user(kernel, addr + i, false)?;
        let mut byte = [0u8];
        kernel.machine.memory.read(paddr, &mut byte);
        if byte[0] == 0 {
            return String::from_utf8(bytes).ok();
        }
        bytes.push(byte[0]);
    }
    // unterminated string
    None
}

pub fn read_buffer_from_user(kernel: &Arc<Kernel>, addr: usize, len: usize) -> Option<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    for (i, slot) in bytes.iter_mut().enumerate() {
        let paddr = translate_user(kernel, addr + i, false)?;
        let mut byte = [0u8];
        kernel.machine.memory.read(paddr, &mut byte);
        *slot = byte[0];
    }
    Some(bytes)
}

pub fn write_buffer_to_user(kernel: &Arc<Kernel>, addr: usize, data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        match translate_user(kernel, addr + i, true) {
            Some(paddr) => kernel.machine.memory.write(paddr, &[byte]),
            None => return false,
        }
    }
    true
}
