//! HTTP server wiring a blob store and its garbage collector.

use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StorageStrategy};
use crate::error::StorageResult;
use crate::models::{BlobIdFactory, GenerationAwareBlobIdFactory, HashBlobIdFactory, PlainBlobIdFactory};
use crate::router::{create_router, AppState};
use crate::storage::{
    BlobReferenceSource, BlobStore, BlobStoreDao, BloomFilterGcAlgorithm, DeDuplicationBlobStore,
    FsBlobStoreDao, GarbageCollector, MemoryBlobStoreDao, PassThroughBlobStore,
};

/// Blob storage server.
pub struct BlobServer {
    config: Arc<Config>,
    blob_store: Arc<dyn BlobStore>,
    gc: Arc<BloomFilterGcAlgorithm>,
}

impl BlobServer {
    /// Creates a server from configuration alone, without reference sources.
    pub async fn new(config: Config) -> StorageResult<Self> {
        BlobServerBuilder::new().config(config).build().await
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blob_store
    }

    pub fn gc(&self) -> &Arc<BloomFilterGcAlgorithm> {
        &self.gc
    }

    /// Returns the router with middleware applied.
    pub fn router(&self) -> Router {
        let state = AppState {
            config: self.config.clone(),
            blob_store: self.blob_store.clone(),
            gc: self.gc.clone(),
        };

        create_router(state)
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
    }

    /// Runs the server, and the periodic garbage collector when configured.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.bind_address().parse()?;

        if let Some(interval) = self.config.gc_interval {
            let collector = GarbageCollector::new(
                self.gc.clone(),
                self.blob_store.default_bucket().clone(),
                interval,
            );
            info!("Garbage collection scheduled every {:?}", interval);
            tokio::spawn(async move { collector.run().await });
        }

        let app = self.router();

        info!("Blob store admin API is starting at http://{}", addr);
        info!(
            "Generation family {}, duration {:?}, id layout {}",
            self.config.generation.family(),
            self.config.generation.duration(),
            self.config.id_layout.as_str()
        );

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Returns the bind address.
    pub fn bind_address(&self) -> String {
        self.config.bind_address()
    }

    /// Returns the base URL of the admin API.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.bind_address())
    }
}

/// Builder for creating a blob server.
pub struct BlobServerBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    dao: Option<Arc<dyn BlobStoreDao>>,
    reference_sources: Vec<Arc<dyn BlobReferenceSource>>,
}

impl BlobServerBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            clock: None,
            dao: None,
            reference_sources: Vec::new(),
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the admin API port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Stores blobs on disk under `location`.
    pub fn location(mut self, location: impl Into<PathBuf>) -> Self {
        self.config.location = Some(location.into());
        self
    }

    /// Sets the clock. Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the DAO, overriding `location`.
    pub fn dao(mut self, dao: Arc<dyn BlobStoreDao>) -> Self {
        self.dao = Some(dao);
        self
    }

    /// Registers a source of live references.
    pub fn reference_source(mut self, source: Arc<dyn BlobReferenceSource>) -> Self {
        self.reference_sources.push(source);
        self
    }

    /// Builds the server.
    pub async fn build(self) -> StorageResult<BlobServer> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let dao: Arc<dyn BlobStoreDao> = match (self.dao, &config.location) {
            (Some(dao), _) => dao,
            (None, Some(location)) => Arc::new(FsBlobStoreDao::new(location.clone()).await?),
            (None, None) => Arc::new(MemoryBlobStoreDao::new()),
        };

        let delegate: Arc<dyn BlobIdFactory> = match config.storage_strategy {
            StorageStrategy::Deduplication => Arc::new(HashBlobIdFactory),
            StorageStrategy::PassThrough => Arc::new(PlainBlobIdFactory),
        };
        let id_factory = Arc::new(
            GenerationAwareBlobIdFactory::new(clock, delegate, config.generation).with_layout(config.id_layout),
        );

        let blob_store: Arc<dyn BlobStore> = match config.storage_strategy {
            StorageStrategy::Deduplication => Arc::new(DeDuplicationBlobStore::new(dao.clone(), id_factory.clone())),
            StorageStrategy::PassThrough => Arc::new(PassThroughBlobStore::new(dao.clone(), id_factory.clone())),
        };

        if self.reference_sources.is_empty() {
            warn!("No reference source registered: every blob older than the generation window is collectable");
        }
        let gc = Arc::new(BloomFilterGcAlgorithm::new(dao, self.reference_sources, id_factory));

        Ok(BlobServer {
            config: Arc::new(config),
            blob_store,
            gc,
        })
    }
}

impl Default for BlobServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
