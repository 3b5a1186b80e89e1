//! Exception entry points.
//!
//! The simulator stops on an exception and hands control here: syscalls
//! are decoded from the register file, page faults route into the
//! current address space, and everything else aborts the offending
//! process. Syscall identifiers arrive in `r2`, arguments in `r4..r7`,
//! and the result goes back in `r2` before the PC is advanced past the
//! delay slot.

use alloc::format;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use machine::config::PAGE_SIZE;
use machine::registers::{R2, R4, R5, R6, R7};
use sys_interface::syscall::*;
use sys_interface::Exception;

use crate::kernel::Kernel;
use crate::thread::Thread;
use crate::userprog::fdtable::{FdEntry, FdTable};
use crate::userprog::transfer;

pub fn handle_exception(kernel: &Arc<Kernel>, which: Exception) {
    match which {
        Exception::Syscall => syscall(kernel),
        Exception::PageFault => {
            let vaddr = kernel.machine.mmu.bad_vaddr();
            if !handle_page_fault(kernel, vaddr) {
                logger::debug!('e', "bus fault at address {:#x}", vaddr);
                kernel.exit_current(-1);
            }
        }
        other => {
            logger::error!("unexpected user exception {:?}, aborting process", other);
            kernel.exit_current(-1);
        }
    }
}

/// Resolve a fault on `vaddr` through the current space and refill one
/// TLB slot. False means the address is outside the space.
pub fn handle_page_fault(kernel: &Arc<Kernel>, vaddr: usize) -> bool {
    let vpn = vaddr / PAGE_SIZE;
    logger::debug!('e', "page fault for vpn {}", vpn);

    let current = kernel.scheduler.current();
    let space = match current.space() {
        Some(space) => space,
        None => return false,
    };
    let entry = match space.translation_for(vpn) {
        Some(entry) => entry,
        None => return false,
    };
    let slot = space.evict_tlb();
    kernel.machine.mmu.set_entry(slot, entry);
    true
}

fn syscall(kernel: &Arc<Kernel>) {
    let regs = &kernel.machine.regs;
    let id = regs.read(R2) as usize;
    let args = [
        regs.read(R4) as usize,
        regs.read(R5) as usize,
        regs.read(R6) as usize,
        regs.read(R7) as usize,
    ];
    logger::debug!('s', "syscall {} args {:?}", id, args);

    let result: i32 = match id {
        SYSCALL_HALT => {
            logger::info!("machine halting, flushing the file system");
            kernel.file_system.flush();
            kernel.machine.halt();
            0
        }
        SYSCALL_EXIT => kernel.exit_current(args[0] as i32),
        SYSCALL_EXEC => sys_exec(kernel, args[0]),
        SYSCALL_JOIN => sys_join(kernel, args[0]),
        SYSCALL_CREATE => sys_create(kernel, args[0]),
        SYSCALL_REMOVE => sys_remove(kernel, args[0]),
        SYSCALL_OPEN => sys_open(kernel, args[0]),
        SYSCALL_READ => sys_read(kernel, args[0], args[1], args[2]),
        SYSCALL_WRITE => sys_write(kernel, args[0], args[1], args[2]),
        SYSCALL_CLOSE => sys_close(kernel, args[0]),
        SYSCALL_PS => sys_ps(kernel),
        _ => {
            logger::error!("unknown syscall {}, aborting process", id);
            kernel.exit_current(-1);
        }
    };

    regs.write(R2, result as u32);
    regs.advance_pc();
}

/// Run `f` over the current thread's descriptor table, creating the
/// table on first use. `f` must not block.
fn with_files<R>(kernel: &Arc<Kernel>, f: impl FnOnce(&mut FdTable) -> R) -> R {
    let current = kernel.scheduler.current();
    let mut inner = current.ex_inner();
    if inner.files.is_none() {
        inner.files = Some(FdTable::new());
    }
    f(inner.files.as_mut().unwrap())
}

fn sys_create(kernel: &Arc<Kernel>, path_addr: usize) -> i32 {
    let path = match transfer::read_str_from_user(kernel, path_addr) {
        Some(path) => path,
        None => return -1,
    };
    match kernel.file_system.create(&path, 0) {
        Ok(()) => 0,
        Err(err) => {
            logger::debug!('s', "create {} failed: {:?}", path, err);
            -1
        }
    }
}

fn sys_remove(kernel: &Arc<Kernel>, path_addr: usize) -> i32 {
    let path = match transfer::read_str_from_user(kernel, path_addr) {
        Some(path) => path,
        None => return -1,
    };
    match kernel.file_system.remove(&path) {
        Ok(()) => 0,
        Err(err) => {
            logger::debug!('s', "remove {} failed: {:?}", path, err);
            -1
        }
    }
}

fn sys_open(kernel: &Arc<Kernel>, path_addr: usize) -> i32 {
    let path = match transfer::read_str_from_user(kernel, path_addr) {
        Some(path) => path,
        None => return -1,
    };
    let file = match kernel.file_system.open(&path) {
        Ok(file) => file,
        Err(err) => {
            logger::debug!('s', "open {} failed: {:?}", path, err);
            return -1;
        }
    };
    match with_files(kernel, |files| files.add(file)) {
        Some(fd) => fd as i32,
        None => -1,
    }
}

fn sys_close(kernel: &Arc<Kernel>, fd: usize) -> i32 {
    let removed = with_files(kernel, |files| files.remove(fd));
    match removed {
        Some(_) => 0,
        None => -1,
    }
}

fn sys_read(kernel: &Arc<Kernel>, buf_addr: usize, size: usize, fd: usize) -> i32 {
    match with_files(kernel, |files| files.get(fd)) {
        Some(FdEntry::ConsoleInput) => {
            let mut bytes = Vec::new();
            for _ in 0..size {
                match kernel.machine.console.get_char() {
                    Some(byte) => bytes.push(byte),
                    None => break,
                }
            }
            if transfer::write_buffer_to_user(kernel, buf_addr, &bytes) {
                bytes.len() as i32
            } else {
                -1
            }
        }
        Some(FdEntry::File(file)) => {
            let mut bytes = vec![0u8; size];
            file.lock_file();
            let num_read = file.read(&mut bytes);
            file.unlock_file();
            if transfer::write_buffer_to_user(kernel, buf_addr, &bytes[..num_read]) {
                num_read as i32
            } else {
                -1
            }
        }
        _ => -1,
    }
}

fn sys_write(kernel: &Arc<Kernel>, buf_addr: usize, size: usize, fd: usize) -> i32 {
    let bytes = match transfer::read_buffer_from_user(kernel, buf_addr, size) {
        Some(bytes) => bytes,
        None => return -1,
    };
    match with_files(kernel, |files| files.get(fd)) {
        Some(FdEntry::ConsoleOutput) => {
            for &byte in &bytes {
                kernel.machine.console.put_char(byte);
            }
            bytes.len() as i32
        }
        Some(FdEntry::File(file)) => {
            file.lock_file();
            let num_written = file.write(&bytes);
            file.unlock_file();
            num_written as i32
        }
        _ => -1,
    }
}

fn sys_exec(kernel: &Arc<Kernel>, path_addr: usize) -> i32 {
    let path = match transfer::read_str_from_user(kernel, path_addr) {
        Some(path) => path,
        None => return -1,
    };
    let file = match kernel.file_system.open(&path) {
        Ok(file) => file,
        Err(_) => return -1,
    };

    let mut image = vec![0u8; file.length()];
    file.lock_file();
    file.read_at(&mut image, 0);
    file.unlock_file();
    drop(file);

    let exe = match kernel.load_executable(&image) {
        Some(exe) => exe,
        None => return -1,
    };

    let thread = Thread::new(&kernel.scheduler, &path, true);
    let space = kernel.create_space(thread.tid(), exe);
    thread.set_space(space);
    thread.ex_inner().files = Some(FdTable::new());

    let tid = thread.tid();
    let k = kernel.clone();
    thread.fork(&kernel.scheduler, move || {
        let current = k.scheduler.current();
        let space = current.space().unwrap();
        space.restore_state();
        space.init_registers(&k.machine.regs);
        if let Some(runner) = k.user_runner() {
            (*runner)(k.clone());
        }
    });
    tid as i32
}

fn sys_join(kernel: &Arc<Kernel>, pid: usize) -> i32 {
    match kernel.scheduler.table().get(pid) {
        Some(thread) if thread.must_join() => thread.join(),
        _ => -1,
    }
}

fn sys_ps(kernel: &Arc<Kernel>) -> i32 {
    let current = kernel.scheduler.current();
    let listing = format!(
        "running: {}\n{}",
        current.name(),
        kernel.scheduler.ready_list()
    );
    for byte in listing.bytes() {
        kernel.machine.console.put_char(byte);
    }
    0
}
