pub mod channel;
pub mod condvar;
pub mod lock;
pub mod semaphore;
pub mod unicore;

pub use channel::Channel;
pub use condvar::Condition;
pub use lock::Lock;
pub use semaphore::Semaphore;
