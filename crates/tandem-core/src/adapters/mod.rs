//! Reference implementations of the ports

pub mod file;
pub mod memory;

pub use file::{JsonFileStore, MemoryPersistence};
pub use memory::MemoryBackend;
