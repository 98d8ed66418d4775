//! State store implementations.
//!
//! - `JsonFileStore`: one JSON record on local disk, replaced atomically
//! - `MemoryStore`: in-process, for tests and dry runs

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
