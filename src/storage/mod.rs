//! Storage layer: blob persistence, deduplication and garbage collection.

mod blob_store;
mod bloom;
mod dao;
mod fs;
mod gc;
mod reference;

pub use blob_store::*;
pub use bloom::*;
pub use dao::*;
pub use fs::*;
pub use gc::*;
pub use reference::*;
