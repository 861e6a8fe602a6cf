//! Blob identifier models.

mod blob_id;
mod generation;
mod generation_id;

pub use blob_id::*;
pub use generation::*;
pub use generation_id::*;
