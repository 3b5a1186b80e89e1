//! Ready-set management and dispatch.
//!
//! Every routine here assumes interrupts are already disabled; entering
//! the scheduler with them enabled is a kernel bug. Locks cannot protect
//! these paths: waiting on a busy lock re-enters `find_next_to_run`.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;

use machine::context;
use machine::interrupt::Interrupt;
use machine::registers::Registers;

use crate::sched::prio_array::PrioArray;
use crate::sync::unicore::UPSafeCell;
use crate::thread::table::ThreadTable;
use crate::thread::{Thread, ThreadStatus};

pub struct Scheduler {
    interrupt: Arc<Interrupt>,
    regs: Arc<Registers>,
    table: Arc<ThreadTable>,
    inner: UPSafeCell<SchedInner>,
}

struct SchedInner {
    ready: PrioArray<Arc<Thread>>,
    current: Option<Arc<Thread>>,
    to_destroy: Option<Arc<Thread>>,
}

impl Scheduler {
    pub fn new(
        interrupt: Arc<Interrupt>,
        regs: Arc<Registers>,
        table: Arc<ThreadTable>,
    ) -> Arc<Scheduler> {
        Arc::new(Scheduler {
            interrupt,
            regs,
            table,
            inner: unsafe {
                UPSafeCell::new(SchedInner {
                    ready: PrioArray::new(),
                    current: None,
                    to_destroy: None,
                })
            },
        })
    }

    /// Adopt the booting host thread as the kernel's `main` thread.
    pub fn bootstrap(self: &Arc<Self>) -> Arc<Thread> {
        let main = Thread::new(self, "main", false);
        main.set_status(ThreadStatus::Running);
        self.inner.exclusive_access().current = Some(main.clone());
        self.interrupt.enable();
        main
    }

    pub fn interrupt(&self) -> &Arc<Interrupt> {
        &self.interrupt
    }

    pub fn regs(&self) -> &Arc<Registers> {
        &self.regs
    }

    pub fn table(&self) -> &Arc<ThreadTable> {
        &self.table
    }

    /// The thread designated as running. There is always exactly one.
    pub fn current(&self) -> Arc<Thread> {
        self.inner
            .exclusive_access()
            .current
            .clone()
            .expect("no current thread")
    }

    /// Mark `thread` ready and queue it at its current priority.
    pub fn ready_to_run(&self, thread: Arc<Thread>) {
        assert!(self.interrupt.is_off(), "scheduler entered with interrupts enabled");
        logger::debug!('t', "putting thread \"{}\" on ready list", thread.name());

        thread.set_status(ThreadStatus::Ready);
        let priority = thread.priority();
        self.inner
            .exclusive_access()
            .ready
            .append(thread, priority);
    }

    /// Pop the highest-priority ready thread, or none.
    pub fn find_next_to_run(&self) -> Option<Arc<Thread>> {
        assert!(self.interrupt.is_off(), "scheduler entered with interrupts enabled");
        self.inner.exclusive_access().ready.pop()
    }

    /// Requeue a ready thread whose priority just changed (priority
    /// inheritance). A thread that is not on the ready set is left alone.
    pub fn reschedule(&self, thread: &Arc<Thread>, old_priority: usize) {
        assert!(self.interrupt.is_off(), "scheduler entered with interrupts enabled");
        if thread.status() != ThreadStatus::Ready {
            return;
        }
        let mut inner = self.inner.exclusive_access();
        inner.ready.remove(thread, old_priority);
        inner.ready.append(thread.clone(), thread.priority());
    }

    /// Dispatch the CPU to `next`, returning once someone switches back.
    pub fn run(&self, next: Arc<Thread>) {
        assert!(self.interrupt.is_off(), "scheduler entered with interrupts enabled");

        let current = self.current();
        if current.space().is_some() {
            current.save_user_state(&self.regs);
            current.space().unwrap().save_state();
        }

        logger::debug!(
            't',
            "switching from thread \"{}\" to thread \"{}\"",
            current.name(),
            next.name()
        );

        self.inner.exclusive_access().current = Some(next.clone());
        next.set_status(ThreadStatus::Running);
        context::switch(current.baton(), next.baton());

        // Back in `current`, running again on its own stack.
        logger::debug!('t', "now in thread \"{}\"", current.name());
        self.destroy_pending();
        if current.space().is_some() {
            current.restore_user_state(&self.regs);
            current.space().unwrap().restore_state();
        }
    }

    /// Give up the CPU to the highest-priority runnable thread. The
    /// yielder goes back on the ready set first, so when it outranks
    /// everyone waiting it simply keeps the CPU; with an empty ready set
    /// this returns without switching.
    pub fn yield_now(&self) {
        let old = self.interrupt.disable();

        let current = self.current();
        logger::debug!('t', "yielding thread \"{}\"", current.name());
        self.ready_to_run(current.clone());
        let next = self
            .find_next_to_run()
            .expect("ready set empty right after enqueueing the yielder");
        if Arc::ptr_eq(&next, &current) {
            current.set_status(ThreadStatus::Running);
        } else {
            self.run(next);
        }

        self.interrupt.set_level(old);
    }

    /// Block the current thread until somebody readies it again. Requires
    /// interrupts off: the caller just queued itself on some wait queue
    /// and there must be no window before the switch.
    pub fn sleep(&self) {
        assert!(self.interrupt.is_off(), "sleep with interrupts enabled");

        let current = self.current();
        logger::debug!('t', "sleeping thread \"{}\"", current.name());
        current.set_status(ThreadStatus::Blocked);

        let next = loop {
            match self.find_next_to_run() {
                Some(next) => break next,
                // No one to run: wait for a device interrupt to ready
                // somebody.
                None => self.interrupt.idle(),
            }
        };
        self.run(next);
    }

    /// Switch away for good: the current thread is done. The successor
    /// reaps the control block after the switch.
    pub fn terminate(&self) -> ! {
        self.interrupt.disable();

        let current = self.current();
        current.set_status(ThreadStatus::Blocked);
        self.inner.exclusive_access().to_destroy = Some(current.clone());

        let next = loop {
            match self.find_next_to_run() {
                Some(next) => break next,
                None => self.interrupt.idle(),
            }
        };
        self.inner.exclusive_access().current = Some(next.clone());
        next.set_status(ThreadStatus::Running);
        context::switch(current.baton(), next.baton());
        unreachable!("finished thread \"{}\" resumed", current.name());
    }

    /// First-dispatch bookkeeping for a forked thread: reap whoever
    /// switched to us, load our context, enable interrupts.
    pub fn trampoline_prologue(&self) {
        self.destroy_pending();
        let current = self.current();
        if current.space().is_some() {
            current.restore_user_state(&self.regs);
            current.space().unwrap().restore_state();
        }
        self.interrupt.enable();
    }

    fn destroy_pending(&self) {
        let dead = self.inner.exclusive_access().to_destroy.take();
        if let Some(dead) = dead {
            logger::debug!('t', "reaping thread \"{}\"", dead.name());
            self.table.remove(dead.tid());
        }
    }

    /// Render the ready set, highest priority first.
    pub fn ready_list(&self) -> String {
        let mut out = String::from("ready list contents:\n");
        self.inner.exclusive_access().ready.apply(|prio, thread| {
            out.push_str(&format!("  [{}] {}\n", prio, thread.name()));
        });
        out
    }
}
