use core::cell::{RefCell, RefMut};

/// Uniprocessor interior-mutability cell.
///
/// The context-switch primitive keeps at most one kernel thread running,
/// and the baton handoff orders every access, so sharing a `RefCell`
/// across host threads is sound here. Borrows must never be held across a
/// suspension point; that is the kernel-wide discipline, and `RefCell`
/// turns a violation into a panic instead of silent corruption.
pub struct UPSafeCell<T> {
    inner: RefCell<T>,
}

unsafe impl<T> Sync for UPSafeCell<T> {}
unsafe impl<T> Send for UPSafeCell<T> {}

impl<T> UPSafeCell<T> {
    /// 调用者保证同一时刻只有一个线程访问
    pub unsafe fn new(value: T) -> Self {
        Self {
            inner: RefCell::new(value),
        }
    }

    /// 以可变借用形式访问
    pub fn exclusive_access(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    /// 在闭包内独占访问, 离开即归还借用
    pub fn exclusive_session<V>(&self, f: impl FnOnce(&mut T) -> V) -> V {
        f(&mut self.inner.borrow_mut())
    }
}
