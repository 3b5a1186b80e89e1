//! Interrupt controller and simulated time.
//!
//! The kernel obtains mutual exclusion by turning interrupts off around its
//! critical sections. Device drivers post completion events with
//! [`Interrupt::schedule`]; the events fire when simulated time reaches
//! them, either because the running thread re-enabled interrupts (which
//! advances the clock one tick) or because the kernel called
//! [`Interrupt::idle`] with nothing left to run.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    IntOff,
    IntOn,
}

type Handler = Box<dyn FnOnce() + Send>;

struct IntrInner {
    level: IntrLevel,
    now: u64,
    seq: u64,
    // (到期时刻, 序号) -> 处理函数; 序号保证同刻事件按登记顺序触发
    pending: BTreeMap<(u64, u64), Handler>,
}

pub struct Interrupt {
    inner: Mutex<IntrInner>,
}

impl Interrupt {
    pub fn new() -> Arc<Interrupt> {
        Arc::new(Interrupt {
            inner: Mutex::new(IntrInner {
                level: IntrLevel::IntOff,
                now: 0,
                seq: 0,
                pending: BTreeMap::new(),
            }),
        })
    }

    /// Change the interrupt level, returning the previous one.
    ///
    /// An off-to-on edge advances the clock one tick and fires any event
    /// that has come due; handlers always run with interrupts off.
    pub fn set_level(&self, new: IntrLevel) -> IntrLevel {
        let old = {
            let mut inner = self.inner.lock();
            let old = inner.level;
            inner.level = new;
            if old == IntrLevel::IntOff && new == IntrLevel::IntOn {
                inner.now += 1;
            }
            old
        };
        if old == IntrLevel::IntOff && new == IntrLevel::IntOn {
            self.fire_due();
        }
        old
    }

    pub fn disable(&self) -> IntrLevel {
        self.set_level(IntrLevel::IntOff)
    }

    pub fn enable(&self) -> IntrLevel {
        self.set_level(IntrLevel::IntOn)
    }

    pub fn level(&self) -> IntrLevel {
        self.inner.lock().level
    }

    pub fn is_off(&self) -> bool {
        self.level() == IntrLevel::IntOff
    }

    /// Current simulated time in ticks.
    pub fn now(&self) -> u64 {
        self.inner.lock().now
    }

    /// Post a device event `delay` ticks from now.
    pub fn schedule(&self, delay: u64, handler: Handler) {
        let mut inner = self.inner.lock();
        let when = inner.now + delay.max(1);
        let seq = inner.seq;
        inner.seq += 1;
        inner.pending.insert((when, seq), handler);
    }

    /// Nothing is runnable: jump the clock to the next pending event and
    /// fire it. A machine with no runnable thread and no pending event
    /// would hang forever, which is a kernel bug.
    pub fn idle(&self) {
        let handler = {
            let mut inner = self.inner.lock();
            assert_eq!(
                inner.level,
                IntrLevel::IntOff,
                "idle called with interrupts enabled"
            );
            let (&(when, seq), _) = inner
                .pending
                .iter()
                .next()
                .expect("no threads ready and no pending interrupts: machine hangs");
            inner.now = inner.now.max(when);
            inner.pending.remove(&(when, seq)).unwrap()
        };
        handler();
    }

    // 触发所有已到期事件, 处理期间强制关中断
    fn fire_due(&self) {
        loop {
            let handler = {
                let mut inner = self.inner.lock();
                match inner.pending.iter().next() {
                    Some((&(when, seq), _)) if when <= inner.now => {
                        inner.level = IntrLevel::IntOff;
                        inner.pending.remove(&(when, seq)).unwrap()
                    }
                    _ => break,
                }
            };
            handler();
            self.inner.lock().level = IntrLevel::IntOn;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn level_round_trip() {
        let intr = Interrupt::new();
        assert_eq!(intr.set_level(IntrLevel::IntOn), IntrLevel::IntOff);
        assert_eq!(intr.set_level(IntrLevel::IntOff), IntrLevel::IntOn);
        assert!(intr.is_off());
    }

    #[test]
    fn idle_fires_earliest_event_first() {
        let intr = Interrupt::new();
        let order = Arc::new(Mutex::new(Vec::<&str>::new()));

        let o = order.clone();
        intr.schedule(50, Box::new(move || o.lock().push("late")));
        let o = order.clone();
        intr.schedule(10, Box::new(move || o.lock().push("early")));

        intr.idle();
        intr.idle();
        assert_eq!(*order.lock(), ["early", "late"]);
        assert!(intr.now() >= 50);
    }

    #[test]
    fn enabling_interrupts_advances_the_clock() {
        let intr = Interrupt::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        intr.schedule(3, Box::new(move || { f.fetch_add(1, Ordering::SeqCst); }));

        for _ in 0..5 {
            intr.enable();
            intr.disable();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "machine hangs")]
    fn idle_with_nothing_pending_is_fatal() {
        let intr = Interrupt::new();
        intr.idle();
    }
}
