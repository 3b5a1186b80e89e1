//! Mutual exclusion over a binary semaphore, with optional priority
//! inheritance.
//!
//! Inheritance follows a single-donation model: only the most recent
//! boost is tracked on the lock, so donations do not propagate along
//! chains of nested locks.

use alloc::string::{String, ToString};
use alloc::sync::Arc;

use crate::sched::scheduler::Scheduler;
use crate::sync::semaphore::Semaphore;
use crate::sync::unicore::UPSafeCell;
use crate::thread::Thread;

pub struct Lock {
    name: String,
    sched: Arc<Scheduler>,
    semaphore: Semaphore,
    inner: UPSafeCell<LockInner>,
}

struct LockInner {
    holder: Option<Arc<Thread>>,
    saved_nice: i32,
    prio_inherit: bool,
}

impl Lock {
    pub fn new(sched: &Arc<Scheduler>, name: &str) -> Lock {
        Lock {
            name: name.to_string(),
            sched: sched.clone(),
            semaphore: Semaphore::new(sched, name, 1),
            inner: unsafe {
                UPSafeCell::new(LockInner {
                    holder: None,
                    saved_nice: 0,
                    prio_inherit: false,
                })
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opt this lock into priority inheritance.
    pub fn set_prio_inherit(&self) {
        self.inner.exclusive_access().prio_inherit = true;
    }

    /// Acquire the lock. Re-acquiring a lock already held by the caller
    /// is a kernel bug.
    pub fn acquire(&self) {
        assert!(
            !self.held_by_current_thread(),
            "thread re-acquired lock \"{}\"",
            self.name
        );

        let current = self.sched.current();
        {
            // 优先级继承: 把持有者提升到请求者的优先级
            let inner = self.inner.exclusive_access();
            if inner.prio_inherit {
                if let Some(holder) = inner.holder.clone() {
                    if holder.priority() > current.priority() {
                        drop(inner);
                        let old = self.sched.interrupt().disable();
                        let holder_prio = holder.priority();
                        holder.set_nice(current.nice());
                        self.sched.reschedule(&holder, holder_prio);
                        self.sched.interrupt().set_level(old);
                    }
                }
            }
        }

        self.semaphore.p();

        let mut inner = self.inner.exclusive_access();
        inner.holder = Some(current.clone());
        inner.saved_nice = current.nice();
    }

    /// Release the lock. Only the holder may do so.
    ///
    /// Under inheritance the donated priority is shed only after handing
    /// the CPU to whoever the release unblocked, so the boosted waiter
    /// runs before the demoted ex-holder continues.
    pub fn release(&self) {
        assert!(
            self.held_by_current_thread(),
            "thread released lock \"{}\" it does not hold",
            self.name
        );

        let current = self.sched.current();
        let (inherit, saved) = {
            let mut inner = self.inner.exclusive_access();
            let inherit = inner.prio_inherit;
            let saved = inner.saved_nice;
            inner.holder = None;
            (inherit, saved)
        };
        self.semaphore.v();
        if inherit {
            self.sched.yield_now();
            current.set_nice(saved);
        }
    }

    pub fn held_by_current_thread(&self) -> bool {
        let inner = self.inner.exclusive_access();
        match &inner.holder {
            Some(holder) => holder.tid() == self.sched.current().tid(),
            None => false,
        }
    }
}
