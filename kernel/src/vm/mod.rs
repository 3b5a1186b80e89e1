//! Virtual memory: per-process address spaces with demand loading, the
//! global core map, and per-process swap files.

pub mod address_space;
pub mod core_map;
pub mod executable;
pub mod swap;

pub use address_space::AddressSpace;
pub use core_map::CoreMap;
pub use executable::{Executable, MemExecutable};
pub use swap::Swap;
