//! Garbage collection of unreferenced blobs.
//!
//! A pass has three phases:
//!
//! 1. Mark: every reference source is drained into a bloom filter.
//! 2. Sweep: the bucket is listed. A blob is a candidate when it is out of
//!    the active generation window and the filter does not report it.
//! 3. Delete: candidates are deleted in windows, a few windows at a time.
//!
//! The filter never yields false negatives, so a referenced blob is never a
//! candidate. Blobs written and referenced after the mark phase started are
//! missing from the filter, but stay inside the generation window for at
//! least one generation duration.

use futures::future;
use futures::stream::{TryChunksError, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

use super::bloom::BloomFilter;
use super::dao::BlobStoreDao;
use super::reference::BlobReferenceSource;
use crate::clock::Clock;
use crate::context::{
    Context, Snapshot, DEFAULT_ASSOCIATED_PROBABILITY, DEFAULT_DELETION_WINDOW_SIZE,
    DEFAULT_EXPECTED_BLOB_COUNT,
};
use crate::error::{StorageError, StorageResult};
use crate::models::{BlobId, BucketName, GenerationAwareBlobIdFactory};

/// Deletion windows in flight at once.
const DELETION_CONCURRENCY: usize = 4;

/// Outcome of a garbage collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GcResult {
    /// Every candidate was deleted.
    Completed,
    /// Some deletions or id parses failed; the next pass retries them.
    Partial,
}

/// Tuning of a single pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcParameters {
    pub expected_blob_count: usize,
    pub deletion_window_size: usize,
    pub associated_probability: f64,
}

impl Default for GcParameters {
    fn default() -> Self {
        Self {
            expected_blob_count: DEFAULT_EXPECTED_BLOB_COUNT,
            deletion_window_size: DEFAULT_DELETION_WINDOW_SIZE,
            associated_probability: DEFAULT_ASSOCIATED_PROBABILITY,
        }
    }
}

impl GcParameters {
    pub fn validate(&self) -> StorageResult<()> {
        if self.expected_blob_count == 0 {
            return Err(StorageError::invalid_argument(
                "'expectedBlobCount' must be strictly positive",
            ));
        }
        if self.deletion_window_size == 0 {
            return Err(StorageError::invalid_argument(
                "'deletionWindowSize' must be strictly positive",
            ));
        }
        if !(self.associated_probability > 0.0 && self.associated_probability < 1.0) {
            return Err(StorageError::invalid_argument(
                "'associatedProbability' must be strictly between 0 and 1",
            ));
        }
        BloomFilter::required_bits(self.expected_blob_count, self.associated_probability)?;
        Ok(())
    }

    /// A fresh context sized for these parameters.
    pub fn new_context(&self) -> Context {
        Context::new(self.expected_blob_count, self.associated_probability)
    }
}

/// Mark-and-sweep collector using a bloom filter as the live set.
pub struct BloomFilterGcAlgorithm {
    dao: Arc<dyn BlobStoreDao>,
    reference_sources: Vec<Arc<dyn BlobReferenceSource>>,
    /// Source of the generation configuration and clock, shared with the
    /// store minting ids.
    id_factory: Arc<GenerationAwareBlobIdFactory>,
}

impl BloomFilterGcAlgorithm {
    pub fn new(
        dao: Arc<dyn BlobStoreDao>,
        reference_sources: Vec<Arc<dyn BlobReferenceSource>>,
        id_factory: Arc<GenerationAwareBlobIdFactory>,
    ) -> Self {
        Self {
            dao,
            reference_sources,
            id_factory,
        }
    }

    /// Clock the generation window is evaluated against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.id_factory.clock()
    }

    /// Runs one pass over `bucket`, recording progress in `context`.
    ///
    /// Failed deletion windows are counted and skipped. Listing failures,
    /// from reference sources or from the bucket, abort the pass.
    pub async fn gc(
        &self,
        expected_blob_count: usize,
        deletion_window_size: usize,
        associated_probability: f64,
        bucket: &BucketName,
        context: &Context,
    ) -> StorageResult<GcResult> {
        let parameters = GcParameters {
            expected_blob_count,
            deletion_window_size,
            associated_probability,
        };
        parameters.validate()?;

        info!(
            bucket = %bucket,
            expected_blob_count,
            associated_probability,
            "Starting blob garbage collection"
        );

        let filter = self
            .mark(expected_blob_count, associated_probability, context)
            .await?;
        debug!(
            references = filter.elements_inserted(),
            estimated_false_positive_rate = filter.false_positive_rate(),
            "Mark phase complete"
        );

        self.sweep(&filter, deletion_window_size, bucket, context)
            .await?;

        let snapshot = context.snapshot();
        info!(
            bucket = %bucket,
            reference_source_count = snapshot.reference_source_count,
            blob_count = snapshot.blob_count,
            gced_blob_count = snapshot.gced_blob_count,
            error_count = snapshot.error_count,
            "Blob garbage collection finished"
        );

        if context.error_count() == 0 {
            Ok(GcResult::Completed)
        } else {
            Ok(GcResult::Partial)
        }
    }

    /// Runs one pass with the given parameters and a fresh context.
    pub async fn gc_with(
        &self,
        parameters: &GcParameters,
        bucket: &BucketName,
    ) -> StorageResult<(GcResult, Snapshot)> {
        let context = parameters.new_context();
        let result = self
            .gc(
                parameters.expected_blob_count,
                parameters.deletion_window_size,
                parameters.associated_probability,
                bucket,
                &context,
            )
            .await?;
        Ok((result, context.snapshot()))
    }

    async fn mark(
        &self,
        expected_blob_count: usize,
        associated_probability: f64,
        context: &Context,
    ) -> StorageResult<BloomFilter> {
        let mut filter = BloomFilter::new(expected_blob_count, associated_probability)?;
        for source in &self.reference_sources {
            let mut references = source.list_referenced_blobs();
            while let Some(id) = references.try_next().await? {
                filter.insert(id.as_str().as_bytes());
                context.increment_reference_source_count();
            }
        }
        Ok(filter)
    }

    async fn sweep(
        &self,
        filter: &BloomFilter,
        deletion_window_size: usize,
        bucket: &BucketName,
        context: &Context,
    ) -> StorageResult<()> {
        let configuration = *self.id_factory.configuration();
        let now = self.id_factory.clock().now();

        self.dao
            .list_blobs(bucket)
            .try_filter_map(|id| {
                context.increment_blob_count();
                let candidate = match self.id_factory.parse(id.as_str()) {
                    Ok(tagged) => {
                        let collectable = !tagged.in_active_generation(&configuration, now)
                            && !filter.might_contain(id.as_str().as_bytes());
                        collectable.then_some(id)
                    }
                    Err(e) => {
                        // Corrupted tag: keep the blob, surface the problem.
                        warn!(bucket = %bucket, id = %id, error = %e, "Skipping unparseable blob id");
                        context.increment_error_count();
                        None
                    }
                };
                future::ready(Ok(candidate))
            })
            .try_chunks(deletion_window_size)
            .map_err(|TryChunksError(_, e)| e)
            .map_ok(|window| self.delete_window(bucket, window, context))
            .try_buffer_unordered(DELETION_CONCURRENCY)
            .try_for_each(|()| future::ready(Ok(())))
            .await
    }

    async fn delete_window(
        &self,
        bucket: &BucketName,
        window: Vec<BlobId>,
        context: &Context,
    ) -> StorageResult<()> {
        let size = window.len() as u64;
        match self.dao.delete_many(bucket, &window).await {
            Ok(()) => {
                debug!(bucket = %bucket, size, "Deleted unreferenced blobs");
                context.increment_gced_blob_count(size);
            }
            Err(e) => {
                warn!(bucket = %bucket, size, error = %e, "Failed to delete a window of unreferenced blobs");
                context.increment_error_count();
            }
        }
        Ok(())
    }
}

/// Runs garbage collection passes over a bucket at a fixed interval.
pub struct GarbageCollector {
    algorithm: Arc<BloomFilterGcAlgorithm>,
    bucket: BucketName,
    parameters: GcParameters,
    interval: Duration,
}

impl GarbageCollector {
    pub fn new(algorithm: Arc<BloomFilterGcAlgorithm>, bucket: BucketName, interval: Duration) -> Self {
        Self {
            algorithm,
            bucket,
            parameters: GcParameters::default(),
            interval,
        }
    }

    pub fn with_parameters(mut self, parameters: GcParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Starts the garbage collection loop.
    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;
            match self.collect().await {
                Ok((GcResult::Completed, _)) => {}
                Ok((GcResult::Partial, snapshot)) => {
                    warn!(errors = snapshot.error_count, "Garbage collection was partial");
                }
                Err(e) => warn!("Garbage collection failed: {}", e),
            }
        }
    }

    /// Performs a single garbage collection pass.
    pub async fn collect(&self) -> StorageResult<(GcResult, Snapshot)> {
        self.algorithm.gc_with(&self.parameters, &self.bucket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters_are_valid() {
        let parameters = GcParameters::default();
        assert!(parameters.validate().is_ok());
        assert_eq!(parameters.expected_blob_count, 1_000_000);
        assert_eq!(parameters.deletion_window_size, 1000);
        assert_eq!(parameters.associated_probability, 0.01);
    }

    #[test]
    fn invalid_parameters_name_the_offending_field() {
        let cases = [
            (GcParameters { expected_blob_count: 0, ..Default::default() }, "expectedBlobCount"),
            (GcParameters { deletion_window_size: 0, ..Default::default() }, "deletionWindowSize"),
            (GcParameters { associated_probability: 1.0, ..Default::default() }, "associatedProbability"),
            (GcParameters { associated_probability: 0.0, ..Default::default() }, "associatedProbability"),
            (GcParameters { associated_probability: -0.1, ..Default::default() }, "associatedProbability"),
            (GcParameters { expected_blob_count: usize::MAX, ..Default::default() }, "expectedBlobCount"),
        ];
        for (parameters, field) in cases {
            let error = parameters.validate().unwrap_err();
            assert!(error.details.unwrap().contains(field));
        }
    }

    #[test]
    fn result_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&GcResult::Partial).unwrap(), "\"partial\"");
    }
}
