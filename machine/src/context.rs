//! The context-switch primitive.
//!
//! Every kernel thread is carried by one host thread. A [`Baton`] is the
//! rendezvous the host thread parks on; handing the baton to the next
//! thread and parking on our own is the machine-dependent `SWITCH`. The
//! baton handoff keeps at most one host thread awake, which is the
//! invariant that makes the kernel's uniprocessor reasoning sound.

use alloc::string::String;
use alloc::sync::Arc;

use std::sync::{Condvar, Mutex};

pub struct Baton {
    runnable: Mutex<bool>,
    cv: Condvar,
}

impl Baton {
    pub fn new() -> Arc<Baton> {
        Arc::new(Baton {
            runnable: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    fn wake(&self) {
        let mut runnable = self.runnable.lock().unwrap();
        *runnable = true;
        self.cv.notify_one();
    }

    fn wait(&self) {
        let mut runnable = self.runnable.lock().unwrap();
        while !*runnable {
            runnable = self.cv.wait(runnable).unwrap();
        }
        *runnable = false;
    }
}

impl Default for Baton {
    fn default() -> Self {
        Baton {
            runnable: Mutex::new(false),
            cv: Condvar::new(),
        }
    }
}

/// Switch execution from the thread holding `current` to the one holding
/// `next`. Returns when someone switches back to `current`. Switching to
/// oneself is a no-op.
pub fn switch(current: &Baton, next: &Baton) {
    next.wake();
    current.wait();
}

/// Start a host thread for a freshly forked kernel thread. The thread
/// stays parked on its baton until first dispatched.
pub fn launch(name: String, baton: Arc<Baton>, body: impl FnOnce() + Send + 'static) {
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            baton.wait();
            body();
        })
        .expect("failed to spawn host thread");
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use core::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn self_switch_returns() {
        let baton = Baton::new();
        switch(&baton, &baton);
    }

    #[test]
    fn launch_parks_until_dispatched() {
        let main = Baton::new();
        let child = Baton::new();
        let ran = Arc::new(AtomicBool::new(false));

        let r = ran.clone();
        let m = main.clone();
        let c = child.clone();
        launch("child".to_string(), child.clone(), move || {
            r.store(true, Ordering::SeqCst);
            // hand control back and park for good
            switch(&c, &m);
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!ran.load(Ordering::SeqCst));

        switch(&main, &child);
        assert!(ran.load(Ordering::SeqCst));
    }
}
