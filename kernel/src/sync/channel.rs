//! Synchronous one-word rendezvous channel.
//!
//! Senders serialize on the send lock, so the single buffer slot is never
//! overwritten before its receiver consumed it; each completed `send`
//! pairs with exactly one `receive`, in arrival order. Receivers on the
//! other side do not take a lock: the two semaphores already admit one
//! receiver per message, and concurrent receivers race only for distinct
//! messages.

use alloc::string::{String, ToString};
use alloc::sync::Arc;

use crate::sched::scheduler::Scheduler;
use crate::sync::lock::Lock;
use crate::sync::semaphore::Semaphore;
use crate::sync::unicore::UPSafeCell;

pub struct Channel {
    name: String,
    send_lock: Lock,
    send_sem: Semaphore,
    receive_sem: Semaphore,
    buffer: UPSafeCell<i32>,
}

impl Channel {
    pub fn new(sched: &Arc<Scheduler>, name: &str) -> Channel {
        Channel {
            name: name.to_string(),
            send_lock: Lock::new(sched, "send"),
            send_sem: Semaphore::new(sched, "send", 0),
            receive_sem: Semaphore::new(sched, "receive", 0),
            buffer: unsafe { UPSafeCell::new(0) },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver `message`, blocking until a receiver takes it.
    pub fn send(&self, message: i32) {
        self.send_lock.acquire();
        self.buffer.exclusive_session(|buffer| *buffer = message);
        self.send_sem.v();
        self.receive_sem.p();
        self.send_lock.release();
    }

    /// Take the next message, blocking until a sender delivers one.
    pub fn receive(&self) -> i32 {
        self.send_sem.p();
        let message = self.buffer.exclusive_session(|buffer| *buffer);
        self.receive_sem.v();
        message
    }
}
