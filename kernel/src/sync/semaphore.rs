//! Counting semaphore, the base synchronization primitive.
//!
//! Atomicity comes from disabling interrupts around the counter and the
//! wait queue; every other primitive is built on top of this one.

use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::sync::Arc;

use crate::sched::scheduler::Scheduler;
use crate::sync::unicore::UPSafeCell;
use crate::thread::Thread;

pub struct Semaphore {
    name: String,
    sched: Arc<Scheduler>,
    inner: UPSafeCell<SemInner>,
}

struct SemInner {
    value: usize,
    queue: VecDeque<Arc<Thread>>,
}

/// Identity comparison, so semaphores can live in a `PrioArray`.
impl PartialEq for Semaphore {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

impl Semaphore {
    pub fn new(sched: &Arc<Scheduler>, name: &str, initial: usize) -> Semaphore {
        Semaphore {
            name: name.to_string(),
            sched: sched.clone(),
            inner: unsafe {
                UPSafeCell::new(SemInner {
                    value: initial,
                    queue: VecDeque::new(),
                })
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the counter is positive, then decrement it.
    pub fn p(&self) {
        let interrupt = self.sched.interrupt();
        let old = interrupt.disable();

        loop {
            let mut inner = self.inner.exclusive_access();
            if inner.value == 0 {
                // 入队后睡眠, 醒来重新检查计数
                inner.queue.push_back(self.sched.current());
                drop(inner);
                self.sched.sleep();
            } else {
                inner.value -= 1;
                break;
            }
        }

        interrupt.set_level(old);
    }

    /// Increment the counter, waking the longest-waiting thread if any.
    pub fn v(&self) {
        let interrupt = self.sched.interrupt();
        let old = interrupt.disable();

        let woken = {
            let mut inner = self.inner.exclusive_access();
            let woken = inner.queue.pop_front();
            inner.value += 1;
            woken
        };
        if let Some(thread) = woken {
            self.sched.ready_to_run(thread);
        }

        interrupt.set_level(old);
    }
}
