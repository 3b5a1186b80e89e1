pub mod prio_array;
pub mod scheduler;

pub use prio_array::{PrioArray, MAX_PRIO};
pub use scheduler::Scheduler;
