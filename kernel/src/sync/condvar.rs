//! Mesa-style condition variables.
//!
//! Each waiter gets its own one-shot semaphore, queued by the waiter's
//! priority; `signal` wakes exactly one waiter and `broadcast` wakes them
//! all. Woken threads re-contend for the lock, so predicates must be
//! re-checked after `wait` returns.

use alloc::string::{String, ToString};
use alloc::sync::Arc;

use crate::sched::scheduler::Scheduler;
use crate::sched::prio_array::PrioArray;
use crate::sync::lock::Lock;
use crate::sync::semaphore::Semaphore;
use crate::sync::unicore::UPSafeCell;

pub struct Condition {
    name: String,
    sched: Arc<Scheduler>,
    lock: Arc<Lock>,
    queue: UPSafeCell<PrioArray<Arc<Semaphore>>>,
}

impl Condition {
    pub fn new(sched: &Arc<Scheduler>, name: &str, lock: Arc<Lock>) -> Condition {
        Condition {
            name: name.to_string(),
            sched: sched.clone(),
            lock,
            queue: unsafe { UPSafeCell::new(PrioArray::new()) },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Atomically release the lock and block until signalled, then
    /// reacquire the lock.
    pub fn wait(&self) {
        assert!(
            self.lock.held_by_current_thread(),
            "wait on \"{}\" without holding its lock",
            self.name
        );

        let semaphore = Arc::new(Semaphore::new(&self.sched, &self.name, 0));
        let priority = self.sched.current().priority();
        self.queue
            .exclusive_session(|queue| queue.append(semaphore.clone(), priority));

        self.lock.release();
        semaphore.p();
        self.lock.acquire();
    }

    /// Wake one waiter. A no-op when nobody waits.
    pub fn signal(&self) {
        assert!(
            self.lock.held_by_current_thread(),
            "signal on \"{}\" without holding its lock",
            self.name
        );
        if let Some(semaphore) = self.queue.exclusive_session(|queue| queue.pop()) {
            semaphore.v();
        }
    }

    /// Wake every waiter. A no-op when nobody waits.
    pub fn broadcast(&self) {
        assert!(
            self.lock.held_by_current_thread(),
            "broadcast on \"{}\" without holding its lock",
            self.name
        );
        while let Some(semaphore) = self.queue.exclusive_session(|queue| queue.pop()) {
            semaphore.v();
        }
    }
}
