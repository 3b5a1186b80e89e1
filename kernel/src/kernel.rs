//! Kernel assembly: one value owning every process-wide singleton.
//!
//! Nothing in the kernel is ambient: the scheduler, the core map, the
//! file system and the file table are built here at boot and handed down
//! by reference. Interrupt disabling remains the primitive that makes
//! them safe to share.

use alloc::boxed::Box;
use alloc::sync::Arc;

use machine::config::DEFAULT_NUM_SECTORS;
use machine::Machine;
use spin::Mutex;

use crate::fs::file_system::FileSystem;
use crate::fs::synch_disk::SynchDisk;
use crate::sched::scheduler::Scheduler;
use crate::thread::table::ThreadTable;
use crate::vm::address_space::AddressSpace;
use crate::vm::core_map::CoreMap;
use crate::vm::executable::Executable;
use crate::vm::swap::Swap;

/// Turns the raw bytes of an executable file into segment accessors;
/// object-format parsing is injected, not implemented here.
pub type LoaderFn = Box<dyn Fn(&[u8]) -> Option<Box<dyn Executable>> + Send + Sync>;

/// Drives user-mode execution for the current thread; the instruction
/// interpreter is injected the same way.
pub type RunnerFn = Arc<dyn Fn(Arc<Kernel>) + Send + Sync>;

pub struct Kernel {
    pub machine: Arc<Machine>,
    pub scheduler: Arc<Scheduler>,
    pub core_map: Arc<CoreMap>,
    pub synch_disk: Arc<SynchDisk>,
    pub file_system: FileSystem,
    loader: Mutex<Option<LoaderFn>>,
    user_runner: Mutex<Option<RunnerFn>>,
}

impl Kernel {
    /// Boot on `machine`, adopting the calling host thread as the kernel
    /// `main` thread. With `format`, a fresh file system is laid down on
    /// the disk.
    pub fn boot(machine: Arc<Machine>, format: bool) -> Arc<Kernel> {
        logger::info!("kernel booting");

        let table = ThreadTable::new();
        let scheduler = Scheduler::new(
            machine.interrupt.clone(),
            machine.regs.clone(),
            table,
        );
        scheduler.bootstrap();

        let synch_disk = SynchDisk::new(&scheduler, machine.disk.clone());
        let file_system = FileSystem::new(&scheduler, synch_disk.clone(), format);
        let core_map = CoreMap::new(&scheduler);

        Arc::new(Kernel {
            machine,
            scheduler,
            core_map,
            synch_disk,
            file_system,
            loader: Mutex::new(None),
            user_runner: Mutex::new(None),
        })
    }

    /// A formatted kernel on a blank default-geometry machine.
    pub fn boot_default() -> Arc<Kernel> {
        Self::boot(Machine::new(DEFAULT_NUM_SECTORS), true)
    }

    pub fn threads(&self) -> &Arc<ThreadTable> {
        self.scheduler.table()
    }

    pub fn set_loader(&self, loader: LoaderFn) {
        *self.loader.lock() = Some(loader);
    }

    pub fn load_executable(&self, image: &[u8]) -> Option<Box<dyn Executable>> {
        self.loader.lock().as_ref().and_then(|loader| loader(image))
    }

    pub fn set_user_runner(&self, runner: RunnerFn) {
        *self.user_runner.lock() = Some(runner);
    }

    pub fn user_runner(&self) -> Option<RunnerFn> {
        self.user_runner.lock().clone()
    }

    /// Build a demand-paged address space owned by thread `asid`,
    /// backing store included.
    pub fn create_space(&self, asid: usize, exe: Box<dyn Executable>) -> Arc<AddressSpace> {
        let swap = Swap::new(&self.file_system, &self.machine.memory, asid);
        AddressSpace::new(
            asid,
            exe,
            swap,
            &self.scheduler,
            &self.machine.mmu,
            &self.machine.memory,
            &self.core_map,
        )
    }

    /// User-mode exit: deliver the status to the joiner, release the
    /// process's frames, files and address space, and schedule away for
    /// good.
    pub fn exit_current(&self, status: i32) -> ! {
        let current = self.scheduler.current();
        logger::debug!(
            't',
            "thread \"{}\" exits with code {}",
            current.name(),
            status
        );

        current.send_exit_code(status);
        self.core_map.free_all(current.tid());

        // Pull the resources out before dropping them: releasing a file
        // or the swap can block, and no borrow may live across that.
        let (files, cwd, space) = {
            let mut inner = current.ex_inner();
            (
                inner.files.take(),
                inner.current_dir.take(),
                inner.space.take(),
            )
        };
        drop(files);
        drop(cwd);
        drop(space);

        self.scheduler.terminate()
    }
}
