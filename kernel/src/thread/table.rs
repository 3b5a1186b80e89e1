//! Thread registry: tid allocation and tid-to-thread lookup.
//!
//! Entries are weak so the table never keeps a dead thread alive; tids are
//! recycled once their thread is reaped.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use crate::sync::unicore::UPSafeCell;
use crate::thread::Thread;

pub struct ThreadTable {
    inner: UPSafeCell<TableInner>,
}

struct TableInner {
    map: BTreeMap<usize, Weak<Thread>>,
    next_tid: usize,
    recycled: Vec<usize>,
}

impl ThreadTable {
    pub fn new() -> Arc<ThreadTable> {
        Arc::new(ThreadTable {
            inner: unsafe {
                UPSafeCell::new(TableInner {
                    map: BTreeMap::new(),
                    next_tid: 0,
                    recycled: Vec::new(),
                })
            },
        })
    }

    pub fn alloc_tid(&self) -> usize {
        let mut inner = self.inner.exclusive_access();
        match inner.recycled.pop() {
            Some(tid) => tid,
            None => {
                let tid = inner.next_tid;
                inner.next_tid += 1;
                tid
            }
        }
    }

    pub fn install(&self, tid: usize, thread: &Arc<Thread>) {
        let old = self
            .inner
            .exclusive_access()
            .map
            .insert(tid, Arc::downgrade(thread));
        assert!(old.is_none(), "tid {} installed twice", tid);
    }

    pub fn get(&self, tid: usize) -> Option<Arc<Thread>> {
        self.inner
            .exclusive_access()
            .map
            .get(&tid)
            .and_then(Weak::upgrade)
    }

    pub fn remove(&self, tid: usize) {
        let mut inner = self.inner.exclusive_access();
        if inner.map.remove(&tid).is_some() {
            inner.recycled.push(tid);
        }
    }
}
