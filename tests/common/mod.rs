//! Common test utilities.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::BoxStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

use blob_dedup_rs::models::{HashBlobIdFactory, StoragePolicy};
use blob_dedup_rs::{
    BlobId, BlobReferenceSource, BlobServerBuilder, BlobStoreDao, BloomFilterGcAlgorithm, BucketName, Config, Context,
    DeDuplicationBlobStore, ErrorCode, GcResult, GenerationAwareBlobId, GenerationAwareBlobIdFactory,
    GenerationConfiguration, IdLayout, MemoryBlobStoreDao, MemoryReferenceSource, Snapshot, StorageError,
    StorageResult, UpdatableClock,
};

/// Two default generation durations: far enough for any blob to leave the
/// active window.
pub fn two_generations() -> chrono::Duration {
    chrono::Duration::days(60)
}

/// A deduplicating store and its collector sharing a clock, a DAO and a
/// reference source.
pub struct Fixture {
    pub clock: Arc<UpdatableClock>,
    pub dao: Arc<dyn BlobStoreDao>,
    pub references: Arc<MemoryReferenceSource>,
    pub factory: Arc<GenerationAwareBlobIdFactory>,
    pub store: DeDuplicationBlobStore,
    pub gc: Arc<BloomFilterGcAlgorithm>,
    pub bucket: BucketName,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_dao(Arc::new(MemoryBlobStoreDao::new()), IdLayout::Flat)
    }

    pub fn with_dao(dao: Arc<dyn BlobStoreDao>, layout: IdLayout) -> Self {
        Self::with_configuration(dao, layout, GenerationConfiguration::DEFAULT)
    }

    pub fn with_configuration(
        dao: Arc<dyn BlobStoreDao>,
        layout: IdLayout,
        configuration: GenerationConfiguration,
    ) -> Self {
        let clock = Arc::new(UpdatableClock::new(Utc::now()));
        let references = Arc::new(MemoryReferenceSource::new());
        let factory = Arc::new(
            GenerationAwareBlobIdFactory::new(clock.clone(), Arc::new(HashBlobIdFactory), configuration)
                .with_layout(layout),
        );
        let store = DeDuplicationBlobStore::new(dao.clone(), factory.clone());
        let sources: Vec<Arc<dyn BlobReferenceSource>> = vec![references.clone()];
        let gc = Arc::new(BloomFilterGcAlgorithm::new(dao.clone(), sources, factory.clone()));

        Self {
            clock,
            dao,
            references,
            factory,
            store,
            gc,
            bucket: BucketName::default_bucket(),
        }
    }

    /// Saves `content` in the default bucket.
    pub async fn save(&self, content: impl Into<Bytes>) -> GenerationAwareBlobId {
        self.store
            .save_tagged(&self.bucket, content.into(), StoragePolicy::SizeBased)
            .await
            .unwrap()
    }

    /// Saves `content` and registers it as referenced.
    pub async fn save_referenced(&self, content: impl Into<Bytes>) -> GenerationAwareBlobId {
        let id = self.save(content).await;
        self.references.add(id.to_blob_id());
        id
    }

    /// Runs a pass over the default bucket with the given parameters.
    pub async fn run_gc(&self, expected_blob_count: usize, probability: f64) -> (GcResult, Snapshot) {
        let context = Context::new(expected_blob_count, probability);
        let result = self
            .gc
            .gc(expected_blob_count, 1000, probability, &self.bucket, &context)
            .await
            .unwrap();
        (result, context.snapshot())
    }

    pub async fn is_readable(&self, id: &GenerationAwareBlobId) -> bool {
        match self.store.read_tagged(&self.bucket, id).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => panic!("unexpected read failure: {}", e),
        }
    }
}

/// A payload unlikely to collide with any other test payload.
pub fn random_payload() -> Bytes {
    use rand::RngCore;
    let mut buffer = vec![0u8; 64];
    rand::thread_rng().fill_bytes(&mut buffer);
    Bytes::from(buffer)
}

/// DAO wrapper whose batched deletes can be made to fail.
pub struct FlakyDao {
    inner: MemoryBlobStoreDao,
    fail_deletes: AtomicBool,
}

impl FlakyDao {
    pub fn new() -> Self {
        Self {
            inner: MemoryBlobStoreDao::new(),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl BlobStoreDao for FlakyDao {
    async fn save(&self, bucket: &BucketName, id: &BlobId, data: Bytes) -> StorageResult<()> {
        self.inner.save(bucket, id, data).await
    }

    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<Bytes> {
        self.inner.read(bucket, id).await
    }

    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<()> {
        self.inner.delete(bucket, id).await
    }

    async fn delete_many(&self, bucket: &BucketName, ids: &[BlobId]) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::store_failure("injected delete failure"));
        }
        self.inner.delete_many(bucket, ids).await
    }

    fn list_blobs<'a>(&'a self, bucket: &'a BucketName) -> BoxStream<'a, StorageResult<BlobId>> {
        self.inner.list_blobs(bucket)
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketName>> {
        self.inner.list_buckets().await
    }
}

/// DAO whose listing always fails.
pub struct BrokenListingDao;

#[async_trait]
impl BlobStoreDao for BrokenListingDao {
    async fn save(&self, _bucket: &BucketName, _id: &BlobId, _data: Bytes) -> StorageResult<()> {
        Ok(())
    }

    async fn read(&self, _bucket: &BucketName, _id: &BlobId) -> StorageResult<Bytes> {
        Err(StorageError::new(ErrorCode::BlobNotFound))
    }

    async fn delete(&self, _bucket: &BucketName, _id: &BlobId) -> StorageResult<()> {
        Ok(())
    }

    fn list_blobs<'a>(&'a self, _bucket: &'a BucketName) -> BoxStream<'a, StorageResult<BlobId>> {
        Box::pin(futures::stream::once(async {
            Err(StorageError::store_failure("listing unavailable"))
        }))
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketName>> {
        Ok(Vec::new())
    }
}

/// Test server wrapper.
pub struct TestServer {
    pub base_url: String,
    pub clock: Arc<UpdatableClock>,
    pub references: Arc<MemoryReferenceSource>,
}

impl TestServer {
    /// Creates and starts a test server on a random port.
    pub async fn start() -> Self {
        // Find an available port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = Config {
            host: "127.0.0.1".to_string(),
            port,
            ..Config::default()
        };

        let clock = Arc::new(UpdatableClock::new(Utc::now()));
        let references = Arc::new(MemoryReferenceSource::new());
        let server = BlobServerBuilder::new()
            .config(config)
            .clock(clock.clone())
            .reference_source(references.clone())
            .build()
            .await
            .unwrap();
        let base_url = server.base_url();

        // Start server in background
        tokio::spawn(async move {
            server.run().await.unwrap();
        });

        // Wait for server to be ready
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            base_url,
            clock,
            references,
        }
    }

    /// Returns the URL of the garbage collection route.
    pub fn gc_url(&self) -> String {
        format!("{}/blobs?scope=unreferenced", self.base_url)
    }

    /// Returns the URL for saving into a bucket.
    pub fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/blobs/{}", self.base_url, bucket)
    }

    /// Returns the URL for a blob.
    pub fn blob_url(&self, bucket: &str, id: &str) -> String {
        format!("{}/blobs/{}/{}", self.base_url, bucket, id)
    }
}
