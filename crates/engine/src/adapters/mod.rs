//! Persistence adapters implementing the definition and trigger-log ports

mod json_file;
mod memory;

pub use json_file::{DefinitionsFile, JsonFileStore};
pub use memory::InMemoryStore;
