pub mod master;

pub use master::{FailingMaster, MemoryMaster};
