//! Blob stores built on a DAO and a generation-aware id factory.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use super::dao::BlobStoreDao;
use crate::error::StorageResult;
use crate::models::{BlobId, BucketName, GenerationAwareBlobId, GenerationAwareBlobIdFactory, StoragePolicy};

/// High-level save/read/delete of blob payloads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `content` and returns the id to reference it by.
    async fn save(&self, bucket: &BucketName, content: Bytes, policy: StoragePolicy) -> StorageResult<BlobId>;

    /// Reads a blob. Fails with `BlobNotFound` when absent or collected.
    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<Bytes>;

    /// Releases a blob on behalf of a caller that no longer references it.
    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<()>;

    fn default_bucket(&self) -> &BucketName;
}

/// Content-addressed store: identical content saved within one generation
/// lands on one stored object.
///
/// No reference counts are kept. Unreferenced objects are reclaimed by the
/// garbage collector.
pub struct DeDuplicationBlobStore {
    dao: Arc<dyn BlobStoreDao>,
    id_factory: Arc<GenerationAwareBlobIdFactory>,
    default_bucket: BucketName,
}

impl DeDuplicationBlobStore {
    pub fn new(dao: Arc<dyn BlobStoreDao>, id_factory: Arc<GenerationAwareBlobIdFactory>) -> Self {
        Self {
            dao,
            id_factory,
            default_bucket: BucketName::default_bucket(),
        }
    }

    pub fn with_default_bucket(mut self, bucket: BucketName) -> Self {
        self.default_bucket = bucket;
        self
    }

    /// Saves `content` and returns its tagged id.
    ///
    /// The write is idempotent: a concurrent or repeated save of the same
    /// content writes the same bytes under the same key.
    pub async fn save_tagged(
        &self,
        bucket: &BucketName,
        content: Bytes,
        policy: StoragePolicy,
    ) -> StorageResult<GenerationAwareBlobId> {
        let id = self.id_factory.of(&content);
        debug!(
            bucket = %bucket,
            id = %id,
            policy = policy.as_str(),
            size = content.len(),
            "Saving deduplicated blob"
        );
        self.dao.save(bucket, &id.to_blob_id(), content).await?;
        Ok(id)
    }

    pub async fn read_tagged(&self, bucket: &BucketName, id: &GenerationAwareBlobId) -> StorageResult<Bytes> {
        self.dao.read(bucket, &id.to_blob_id()).await
    }
}

#[async_trait]
impl BlobStore for DeDuplicationBlobStore {
    async fn save(&self, bucket: &BucketName, content: Bytes, policy: StoragePolicy) -> StorageResult<BlobId> {
        let id = self.save_tagged(bucket, content, policy).await?;
        Ok(id.to_blob_id())
    }

    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<Bytes> {
        self.dao.read(bucket, id).await
    }

    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<()> {
        // Other owners may share the object; reclaiming it is up to the
        // garbage collector.
        debug!(bucket = %bucket, id = %id, "Ignoring delete of deduplicated blob");
        Ok(())
    }

    fn default_bucket(&self) -> &BucketName {
        &self.default_bucket
    }
}

/// Store writing one object per save, deleted eagerly.
pub struct PassThroughBlobStore {
    dao: Arc<dyn BlobStoreDao>,
    id_factory: Arc<GenerationAwareBlobIdFactory>,
    default_bucket: BucketName,
}

impl PassThroughBlobStore {
    /// `id_factory` should wrap a delegate minting unique ids, such as
    /// [`crate::models::PlainBlobIdFactory`].
    pub fn new(dao: Arc<dyn BlobStoreDao>, id_factory: Arc<GenerationAwareBlobIdFactory>) -> Self {
        Self {
            dao,
            id_factory,
            default_bucket: BucketName::default_bucket(),
        }
    }

    pub fn with_default_bucket(mut self, bucket: BucketName) -> Self {
        self.default_bucket = bucket;
        self
    }
}

#[async_trait]
impl BlobStore for PassThroughBlobStore {
    async fn save(&self, bucket: &BucketName, content: Bytes, policy: StoragePolicy) -> StorageResult<BlobId> {
        let id = self.id_factory.of(&content).to_blob_id();
        debug!(bucket = %bucket, id = %id, policy = policy.as_str(), "Saving blob");
        self.dao.save(bucket, &id, content).await?;
        Ok(id)
    }

    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<Bytes> {
        self.dao.read(bucket, id).await
    }

    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<()> {
        self.dao.delete(bucket, id).await
    }

    fn default_bucket(&self) -> &BucketName {
        &self.default_bucket
    }
}
