//! Syscall ABI scenarios: the dispatcher decodes identifiers from `r2`
//! and arguments from `r4..r7`, results come back in `r2`, and user
//! pointers go through the demand-paged copy routines.

use std::sync::Arc;

use machine::registers::{R2, R4, R5, R6};
use sys_interface::syscall::*;
use sys_interface::Exception;

use nos::kernel::Kernel;
use nos::userprog::exception;
use nos::userprog::transfer;
use nos::vm::MemExecutable;

/// Give the current thread a space whose code bytes are `code`, so user
/// pointers have something to point at.
fn install_space(kernel: &Arc<Kernel>, code: &[u8]) {
    let current = kernel.scheduler.current();
    let exe = Box::new(MemExecutable::new(code.to_vec(), Vec::new(), 2048));
    let space = kernel.create_space(current.tid(), exe);
    current.set_space(space);
}

fn do_syscall(kernel: &Arc<Kernel>, id: usize, args: [usize; 3]) -> i32 {
    let regs = &kernel.machine.regs;
    regs.write(R2, id as u32);
    regs.write(R4, args[0] as u32);
    regs.write(R5, args[1] as u32);
    regs.write(R6, args[2] as u32);
    exception::handle_exception(kernel, Exception::Syscall);
    regs.read(R2) as i32
}

#[test]
fn file_syscalls_round_trip() {
    let kernel = Kernel::boot_default();
    install_space(&kernel, b"notas\0");
    let path_addr = 0;

    assert_eq!(do_syscall(&kernel, SYSCALL_CREATE, [path_addr, 0, 0]), 0);
    // creating it twice fails
    assert_eq!(do_syscall(&kernel, SYSCALL_CREATE, [path_addr, 0, 0]), -1);

    let fd = do_syscall(&kernel, SYSCALL_OPEN, [path_addr, 0, 0]);
    assert!(fd >= 2, "console descriptors must stay reserved");

    // Stage a payload in writable user memory, write it out, read it
    // back through a fresh descriptor.
    let buf_addr = 1024;
    let payload = b"sector payload";
    assert!(transfer::write_buffer_to_user(&kernel, buf_addr, payload));
    assert_eq!(
        do_syscall(&kernel, SYSCALL_WRITE, [buf_addr, payload.len(), fd as usize]),
        payload.len() as i32
    );
    assert_eq!(do_syscall(&kernel, SYSCALL_CLOSE, [fd as usize, 0, 0]), 0);

    let fd = do_syscall(&kernel, SYSCALL_OPEN, [path_addr, 0, 0]);
    let read_addr = 1536;
    assert_eq!(
        do_syscall(&kernel, SYSCALL_READ, [read_addr, payload.len(), fd as usize]),
        payload.len() as i32
    );
    let back = transfer::read_buffer_from_user(&kernel, read_addr, payload.len()).unwrap();
    assert_eq!(back, payload);
    assert_eq!(do_syscall(&kernel, SYSCALL_CLOSE, [fd as usize, 0, 0]), 0);

    assert_eq!(do_syscall(&kernel, SYSCALL_REMOVE, [path_addr, 0, 0]), 0);
    assert_eq!(do_syscall(&kernel, SYSCALL_OPEN, [path_addr, 0, 0]), -1);

    // closing a closed descriptor fails
    assert_eq!(do_syscall(&kernel, SYSCALL_CLOSE, [fd as usize, 0, 0]), -1);
}

#[test]
fn console_write_bypasses_the_file_system() {
    let kernel = Kernel::boot_default();
    install_space(&kernel, b"\0");

    let buf_addr = 512;
    let message = b"hola mundo";
    assert!(transfer::write_buffer_to_user(&kernel, buf_addr, message));
    assert_eq!(
        do_syscall(&kernel, SYSCALL_WRITE, [buf_addr, message.len(), 1]),
        message.len() as i32
    );
    assert_eq!(kernel.machine.console.take_output(), message);

    kernel.machine.console.feed_input(b"eco");
    let read_addr = 640;
    assert_eq!(do_syscall(&kernel, SYSCALL_READ, [read_addr, 16, 0]), 3);
    let back = transfer::read_buffer_from_user(&kernel, read_addr, 3).unwrap();
    assert_eq!(back, b"eco");
}

/// `Exec` launches a program through the injected loader and runner;
/// `Join` collects the status its `Exit` reported.
#[test]
fn exec_and_join_a_user_program() {
    let kernel = Kernel::boot_default();

    kernel.set_loader(Box::new(|image| {
        Some(Box::new(MemExecutable::new(image.to_vec(), Vec::new(), 1024)))
    }));
    // The stand-in for the MIPS loop: touch user memory, then Exit(42).
    kernel.set_user_runner(Arc::new(|k: Arc<Kernel>| {
        assert!(transfer::write_buffer_to_user(&k, 900, b"mark"));
        let back = transfer::read_buffer_from_user(&k, 900, 4).unwrap();
        assert_eq!(back, b"mark");

        let regs = &k.machine.regs;
        regs.write(R2, SYSCALL_EXIT as u32);
        regs.write(R4, 42);
        exception::handle_exception(&k, Exception::Syscall);
        unreachable!("exit returned");
    }));

    // Lay the program down as a file.
    let program = b"user program image";
    kernel.file_system.create("prog", 0).unwrap();
    {
        let file = kernel.file_system.open("prog").unwrap();
        assert_eq!(file.write_at(program, 0), program.len());
    }

    install_space(&kernel, b"prog\0");
    let pid = do_syscall(&kernel, SYSCALL_EXEC, [0, 0, 0]);
    assert!(pid > 0);

    assert_eq!(do_syscall(&kernel, SYSCALL_JOIN, [pid as usize, 0, 0]), 42);

    // Joining a pid that never existed fails.
    assert_eq!(do_syscall(&kernel, SYSCALL_JOIN, [999, 0, 0]), -1);

    assert_eq!(do_syscall(&kernel, SYSCALL_PS, [0, 0, 0]), 0);
    let listing = String::from_utf8(kernel.machine.console.take_output()).unwrap();
    assert!(listing.contains("running: main"));
}
