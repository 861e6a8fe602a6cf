//! Low-level blob storage.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{BlobId, BucketName};

/// Trait for raw blob storage operations, keyed by `(bucket, id)`.
#[async_trait]
pub trait BlobStoreDao: Send + Sync {
    /// Stores `data` under `id`, replacing any previous content.
    async fn save(&self, bucket: &BucketName, id: &BlobId, data: Bytes) -> StorageResult<()>;

    /// Reads a blob. Fails with `BlobNotFound` when absent.
    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<Bytes>;

    /// Deletes a blob. Deleting an absent blob succeeds.
    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<()>;

    /// Deletes a batch of blobs.
    ///
    /// Default implementation calls `delete()` for each id. Backends may
    /// override for fewer round-trips.
    async fn delete_many(&self, bucket: &BucketName, ids: &[BlobId]) -> StorageResult<()> {
        for id in ids {
            self.delete(bucket, id).await?;
        }
        Ok(())
    }

    /// Lists every blob stored in `bucket`.
    fn list_blobs<'a>(&'a self, bucket: &'a BucketName) -> BoxStream<'a, StorageResult<BlobId>>;

    /// Lists buckets holding at least one blob.
    async fn list_buckets(&self) -> StorageResult<Vec<BucketName>>;
}

/// Number of shards for the memory store (must be power of 2).
const NUM_SHARDS: usize = 16;

type BlobKey = (Arc<str>, Arc<str>);

/// Sharded in-memory implementation of the blob store DAO.
/// Uses multiple DashMaps to reduce lock contention.
pub struct MemoryBlobStoreDao {
    shards: Vec<DashMap<BlobKey, Bytes>>,
    /// Current total size in bytes.
    current_size: AtomicU64,
}

impl MemoryBlobStoreDao {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| DashMap::new()).collect();
        Self {
            shards,
            current_size: AtomicU64::new(0),
        }
    }

    /// Get the shard for a given blob id.
    #[inline]
    fn get_shard(&self, id: &str) -> &DashMap<BlobKey, Bytes> {
        let hash = id
            .bytes()
            .rev()
            .take(8)
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        &self.shards[hash % NUM_SHARDS]
    }

    #[inline]
    fn key(bucket: &BucketName, id: &BlobId) -> BlobKey {
        (Arc::from(bucket.as_str()), Arc::from(id.as_str()))
    }

    /// Total bytes across all stored blobs.
    pub fn total_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Number of blobs across all buckets.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlobStoreDao {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStoreDao for MemoryBlobStoreDao {
    async fn save(&self, bucket: &BucketName, id: &BlobId, data: Bytes) -> StorageResult<()> {
        let size = data.len() as u64;
        let shard = self.get_shard(id.as_str());
        if let Some(previous) = shard.insert(Self::key(bucket, id), data) {
            self.current_size
                .fetch_sub(previous.len() as u64, Ordering::Relaxed);
        }
        self.current_size.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<Bytes> {
        let shard = self.get_shard(id.as_str());
        shard
            .get(&Self::key(bucket, id))
            .map(|data| data.value().clone())
            .ok_or_else(|| {
                StorageError::with_message(
                    ErrorCode::BlobNotFound,
                    format!("Blob '{}' not found in bucket '{}'", id, bucket),
                )
            })
    }

    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<()> {
        let shard = self.get_shard(id.as_str());
        if let Some((_, data)) = shard.remove(&Self::key(bucket, id)) {
            self.current_size
                .fetch_sub(data.len() as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    fn list_blobs<'a>(&'a self, bucket: &'a BucketName) -> BoxStream<'a, StorageResult<BlobId>> {
        // Shards are listed one at a time so only a single shard's keys are
        // held while iterating.
        stream::iter(self.shards.iter())
            .flat_map(move |shard| {
                let ids: Vec<StorageResult<BlobId>> = shard
                    .iter()
                    .filter(|entry| entry.key().0.as_ref() == bucket.as_str())
                    .map(|entry| Ok(BlobId::new(entry.key().1.as_ref())))
                    .collect();
                stream::iter(ids)
            })
            .boxed()
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketName>> {
        let names: BTreeSet<String> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .iter()
                    .map(|entry| entry.key().0.to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        names.into_iter().map(BucketName::new).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn bucket(name: &str) -> BucketName {
        BucketName::new(name).unwrap()
    }

    #[tokio::test]
    async fn save_then_read() {
        let dao = MemoryBlobStoreDao::new();
        let id = BlobId::new("id-1");
        dao.save(&bucket("a"), &id, Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(dao.read(&bucket("a"), &id).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(dao.total_size(), 5);
    }

    #[tokio::test]
    async fn read_absent_is_not_found() {
        let dao = MemoryBlobStoreDao::new();
        let id = BlobId::new("id-1");
        dao.save(&bucket("a"), &id, Bytes::from_static(b"hello")).await.unwrap();

        let error = dao.read(&bucket("b"), &id).await.unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dao = MemoryBlobStoreDao::new();
        let id = BlobId::new("id-1");
        dao.save(&bucket("a"), &id, Bytes::from_static(b"hello")).await.unwrap();

        dao.delete(&bucket("a"), &id).await.unwrap();
        dao.delete(&bucket("a"), &id).await.unwrap();
        assert!(dao.read(&bucket("a"), &id).await.unwrap_err().is_not_found());
        assert_eq!(dao.total_size(), 0);
    }

    #[tokio::test]
    async fn list_blobs_is_scoped_to_bucket() {
        let dao = MemoryBlobStoreDao::new();
        for i in 0..20 {
            let id = BlobId::new(format!("id-{}", i));
            dao.save(&bucket("a"), &id, Bytes::from_static(b"x")).await.unwrap();
        }
        dao.save(&bucket("b"), &BlobId::new("other"), Bytes::from_static(b"y"))
            .await
            .unwrap();

        let bucket_a = bucket("a");
        let mut ids: Vec<BlobId> = dao.list_blobs(&bucket_a).try_collect().await.unwrap();
        ids.sort();
        assert_eq!(ids.len(), 20);
        assert!(!ids.contains(&BlobId::new("other")));

        let buckets = dao.list_buckets().await.unwrap();
        assert_eq!(buckets, vec![bucket("a"), bucket("b")]);
    }

    #[tokio::test]
    async fn delete_many_removes_every_id() {
        let dao = MemoryBlobStoreDao::new();
        let ids: Vec<BlobId> = (0..5).map(|i| BlobId::new(format!("id-{}", i))).collect();
        for id in &ids {
            dao.save(&bucket("a"), id, Bytes::from_static(b"x")).await.unwrap();
        }

        dao.delete_many(&bucket("a"), &ids[..3]).await.unwrap();
        assert_eq!(dao.len(), 2);
    }
}
