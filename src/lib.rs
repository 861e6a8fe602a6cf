//! blob-dedup-rs: a deduplicating blob store with generation-aware garbage
//! collection.
//!
//! Identical content saved within one generation is stored once. Since no
//! reference counts are kept, unreferenced blobs are reclaimed by a
//! mark-and-sweep pass whose live set is a bloom filter built from
//! [`storage::BlobReferenceSource`]s. Blobs from the current and previous
//! generation are never collected.
//!
//! # Example
//!
//! ```no_run
//! use blob_dedup_rs::{BlobServer, Config};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = BlobServer::new(Config::default()).await.unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use clock::{Clock, SystemClock, UpdatableClock};
pub use config::{Args, Config, StorageStrategy, DEFAULT_PORT};
pub use context::{Context, GcTaskDetails, Snapshot};
pub use error::{ErrorCode, StorageError, StorageResult};
pub use models::{
    BlobId, BucketName, GenerationAwareBlobId, GenerationAwareBlobIdFactory, GenerationConfiguration, IdLayout,
};
pub use server::{BlobServer, BlobServerBuilder};
pub use storage::{
    BlobReferenceSource, BlobStore, BlobStoreDao, BloomFilterGcAlgorithm, DeDuplicationBlobStore, FsBlobStoreDao,
    GcParameters, GcResult, MemoryBlobStoreDao, MemoryReferenceSource, PassThroughBlobStore,
};
