//! Thread control blocks and the thread lifecycle.
//!
//! `fork` puts a new thread on the ready set with a trampoline that
//! enables interrupts, runs the body and then finishes the thread.
//! `finish` hands the exit code to a joiner, tags the thread for deferred
//! destruction and never returns; the successor reaps the carcass after
//! the switch, because the dying thread is still standing on its own
//! stack.

pub mod table;

use alloc::string::{String, ToString};
use alloc::sync::Arc;

use machine::context::{self, Baton};
use machine::registers::{Registers, NUM_TOTAL_REGS};
use sys_interface::config::{NICE_MAX, NICE_MIN};

use crate::fs::open_file::OpenFile;
use crate::sched::scheduler::Scheduler;
use crate::sync::unicore::UPSafeCell;
use crate::sync::Channel;
use crate::userprog::fdtable::FdTable;
use crate::vm::address_space::AddressSpace;

/// Priority of a freshly created thread (`nice = 0`).
pub const DEFAULT_PRIORITY: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    JustCreated,
    Ready,
    Running,
    Blocked,
}

pub struct Thread {
    name: String,
    tid: usize,
    baton: Arc<Baton>,
    must_join: bool,
    join_channel: Option<Channel>,
    pub inner: UPSafeCell<ThreadInner>,
}

pub struct ThreadInner {
    pub status: ThreadStatus,
    pub priority: usize,
    pub has_joined: bool,
    pub user_regs: [u32; NUM_TOTAL_REGS],
    pub space: Option<Arc<AddressSpace>>,
    pub files: Option<FdTable>,
    pub current_dir: Option<Arc<OpenFile>>,
}

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        self.tid == other.tid
    }
}

impl Thread {
    /// Allocate a thread control block; `fork` makes it runnable.
    pub fn new(sched: &Arc<Scheduler>, name: &str, must_join: bool) -> Arc<Thread> {
        let tid = sched.table().alloc_tid();
        let join_channel = if must_join {
            Some(Channel::new(sched, name))
        } else {
            None
        };
        let thread = Arc::new(Thread {
            name: name.to_string(),
            tid,
            baton: Baton::new(),
            must_join,
            join_channel,
            inner: unsafe {
                UPSafeCell::new(ThreadInner {
                    status: ThreadStatus::JustCreated,
                    priority: DEFAULT_PRIORITY,
                    has_joined: false,
                    user_regs: [0; NUM_TOTAL_REGS],
                    space: None,
                    files: None,
                    current_dir: None,
                })
            },
        });
        sched.table().install(tid, &thread);
        thread
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tid(&self) -> usize {
        self.tid
    }

    pub fn baton(&self) -> &Arc<Baton> {
        &self.baton
    }

    pub fn must_join(&self) -> bool {
        self.must_join
    }

    pub fn ex_inner(&self) -> core::cell::RefMut<'_, ThreadInner> {
        self.inner.exclusive_access()
    }

    pub fn status(&self) -> ThreadStatus {
        self.ex_inner().status
    }

    pub fn set_status(&self, status: ThreadStatus) {
        self.ex_inner().status = status;
    }

    pub fn priority(&self) -> usize {
        self.ex_inner().priority
    }

    pub fn nice(&self) -> i32 {
        self.priority() as i32 - DEFAULT_PRIORITY as i32
    }

    /// Change priority to `120 + nice`.
    pub fn set_nice(&self, nice: i32) {
        assert!((NICE_MIN..NICE_MAX).contains(&nice));
        let new = (DEFAULT_PRIORITY as i32 + nice) as usize;
        logger::debug!(
            't',
            "changing thread \"{}\" priority from {} to {}",
            self.name,
            self.priority(),
            new
        );
        self.ex_inner().priority = new;
    }

    pub fn space(&self) -> Option<Arc<AddressSpace>> {
        self.ex_inner().space.clone()
    }

    pub fn set_space(&self, space: Arc<AddressSpace>) {
        self.ex_inner().space = Some(space);
    }

    pub fn save_user_state(&self, regs: &Registers) {
        self.ex_inner().user_regs = regs.snapshot();
    }

    pub fn restore_user_state(&self, regs: &Registers) {
        regs.restore(&self.ex_inner().user_regs);
    }

    /// Make the thread runnable, executing `body` on its own stack. The
    /// trampoline enables interrupts before the body and finishes the
    /// thread after it.
    pub fn fork(self: &Arc<Self>, sched: &Arc<Scheduler>, body: impl FnOnce() + Send + 'static) {
        logger::debug!('t', "forking thread \"{}\"", self.name);

        let sched_for_child = sched.clone();
        context::launch(self.name.clone(), self.baton.clone(), move || {
            sched_for_child.trampoline_prologue();
            body();
            finish(&sched_for_child);
        });

        let old = sched.interrupt().disable();
        sched.ready_to_run(self.clone());
        sched.interrupt().set_level(old);
    }

    /// Wait for the thread to finish and collect its exit code. Joining a
    /// thread twice, or one not created joinable, is a kernel bug.
    pub fn join(&self) -> i32 {
        assert!(self.must_join, "join on a non-joinable thread");
        {
            let mut inner = self.ex_inner();
            assert!(!inner.has_joined, "thread \"{}\" joined twice", self.name);
            inner.has_joined = true;
        }
        self.join_channel.as_ref().unwrap().receive()
    }

    /// Deliver `code` to the joiner, if any. Blocks until the rendezvous
    /// completes.
    pub(crate) fn send_exit_code(&self, code: i32) {
        if let Some(channel) = &self.join_channel {
            logger::debug!('t', "thread \"{}\" signalling join", self.name);
            channel.send(code);
        }
    }
}

/// Called when a thread is done executing, normally by the fork
/// trampoline. Signals the joiner and schedules away for good; the
/// successor destroys the thread control block.
pub fn finish(sched: &Arc<Scheduler>) -> ! {
    let current = sched.current();
    current.send_exit_code(0);

    logger::debug!('t', "finishing thread \"{}\"", current.name());
    sched.terminate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;

    #[test]
    fn fork_runs_body_and_join_returns() {
        let kernel = Kernel::boot_default();
        let sched = kernel.scheduler.clone();

        let child = Thread::new(&sched, "child", true);
        let flag = Arc::new(core::sync::atomic::AtomicBool::new(false));
        let f = flag.clone();
        child.fork(&sched, move || {
            f.store(true, core::sync::atomic::Ordering::SeqCst);
        });

        assert_eq!(child.join(), 0);
        assert!(flag.load(core::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    #[should_panic(expected = "joined twice")]
    fn double_join_is_fatal() {
        let kernel = Kernel::boot_default();
        let sched = kernel.scheduler.clone();

        let child = Thread::new(&sched, "child", true);
        child.fork(&sched, || {});
        assert_eq!(child.join(), 0);
        child.join();
    }

    #[test]
    fn yield_with_empty_ready_set_returns() {
        let kernel = Kernel::boot_default();
        kernel.scheduler.yield_now();
    }

    #[test]
    fn nice_moves_priority() {
        let kernel = Kernel::boot_default();
        let t = Thread::new(&kernel.scheduler, "t", false);
        assert_eq!(t.priority(), DEFAULT_PRIORITY);
        t.set_nice(-20);
        assert_eq!(t.priority(), 100);
        t.set_nice(19);
        assert_eq!(t.priority(), 139);
        assert_eq!(t.nice(), 19);
    }
}
