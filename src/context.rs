//! Garbage collection run context and its reporting views.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Default bloom filter capacity for a pass.
pub const DEFAULT_EXPECTED_BLOB_COUNT: usize = 1_000_000;

/// Default bloom filter false positive probability.
pub const DEFAULT_ASSOCIATED_PROBABILITY: f64 = 0.01;

/// Default number of blobs per batched delete.
pub const DEFAULT_DELETION_WINDOW_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    reference_source_count: u64,
    blob_count: u64,
    gced_blob_count: u64,
    error_count: u64,
}

/// Mutable counters of a single garbage collection run.
///
/// The pass is the only writer. Progress reporting reads copies through
/// [`Context::snapshot`] while the pass keeps running.
#[derive(Debug)]
pub struct Context {
    expected_blob_count: usize,
    associated_probability: f64,
    counters: RwLock<Counters>,
}

impl Context {
    pub fn new(expected_blob_count: usize, associated_probability: f64) -> Self {
        Self {
            expected_blob_count,
            associated_probability,
            counters: RwLock::new(Counters::default()),
        }
    }

    pub fn expected_blob_count(&self) -> usize {
        self.expected_blob_count
    }

    pub fn associated_probability(&self) -> f64 {
        self.associated_probability
    }

    pub fn increment_reference_source_count(&self) {
        self.counters.write().reference_source_count += 1;
    }

    pub fn increment_blob_count(&self) {
        self.counters.write().blob_count += 1;
    }

    pub fn increment_gced_blob_count(&self, delta: u64) {
        self.counters.write().gced_blob_count += delta;
    }

    pub fn increment_error_count(&self) {
        self.counters.write().error_count += 1;
    }

    pub fn error_count(&self) -> u64 {
        self.counters.read().error_count
    }

    pub fn snapshot(&self) -> Snapshot {
        let counters = *self.counters.read();
        Snapshot {
            reference_source_count: counters.reference_source_count,
            blob_count: counters.blob_count,
            gced_blob_count: counters.gced_blob_count,
            error_count: counters.error_count,
            bloom_filter_expected_blob_count: self.expected_blob_count,
            bloom_filter_associated_probability: self.associated_probability,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DEFAULT_EXPECTED_BLOB_COUNT, DEFAULT_ASSOCIATED_PROBABILITY)
    }
}

/// Immutable copy of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub reference_source_count: u64,
    pub blob_count: u64,
    pub gced_blob_count: u64,
    pub error_count: u64,
    pub bloom_filter_expected_blob_count: usize,
    pub bloom_filter_associated_probability: f64,
}

/// Serialized progress of a garbage collection task.
///
/// Entries written before `deletionWindowSize` was recorded still
/// deserialize, with the default window size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcTaskDetails {
    #[serde(rename = "type")]
    pub task_type: String,
    pub timestamp: DateTime<Utc>,
    pub reference_source_count: u64,
    pub blob_count: u64,
    pub gced_blob_count: u64,
    pub error_count: u64,
    #[serde(default = "default_deletion_window_size")]
    pub deletion_window_size: usize,
    pub bloom_filter_expected_blob_count: usize,
    pub bloom_filter_associated_probability: f64,
}

/// Task type recorded in [`GcTaskDetails`].
pub const GC_TASK_TYPE: &str = "BlobGCTask";

fn default_deletion_window_size() -> usize {
    DEFAULT_DELETION_WINDOW_SIZE
}

impl GcTaskDetails {
    pub fn from_snapshot(snapshot: Snapshot, deletion_window_size: usize, timestamp: DateTime<Utc>) -> Self {
        Self {
            task_type: GC_TASK_TYPE.to_string(),
            timestamp,
            reference_source_count: snapshot.reference_source_count,
            blob_count: snapshot.blob_count,
            gced_blob_count: snapshot.gced_blob_count,
            error_count: snapshot.error_count,
            deletion_window_size,
            bloom_filter_expected_blob_count: snapshot.bloom_filter_expected_blob_count,
            bloom_filter_associated_probability: snapshot.bloom_filter_associated_probability,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            reference_source_count: self.reference_source_count,
            blob_count: self.blob_count,
            gced_blob_count: self.gced_blob_count,
            error_count: self.error_count,
            bloom_filter_expected_blob_count: self.bloom_filter_expected_blob_count,
            bloom_filter_associated_probability: self.bloom_filter_associated_probability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_a_detached_copy() {
        let context = Context::new(99, 0.2);
        context.increment_blob_count();
        context.increment_reference_source_count();
        let snapshot = context.snapshot();

        context.increment_blob_count();
        context.increment_gced_blob_count(3);
        context.increment_error_count();

        assert_eq!(snapshot.blob_count, 1);
        assert_eq!(snapshot.gced_blob_count, 0);
        assert_eq!(snapshot.bloom_filter_expected_blob_count, 99);
        assert_eq!(snapshot.bloom_filter_associated_probability, 0.2);

        let later = context.snapshot();
        assert_eq!(later.blob_count, 2);
        assert_eq!(later.gced_blob_count, 3);
        assert_eq!(later.error_count, 1);
    }

    #[test]
    fn task_details_json_shape() {
        let timestamp = DateTime::parse_from_rfc3339("2024-03-18T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let context = Context::default();
        context.increment_blob_count();
        let details = GcTaskDetails::from_snapshot(context.snapshot(), 1000, timestamp);

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["type"], "BlobGCTask");
        assert_eq!(json["timestamp"], "2024-03-18T10:00:00Z");
        assert_eq!(json["blobCount"], 1);
        assert_eq!(json["referenceSourceCount"], 0);
        assert_eq!(json["gcedBlobCount"], 0);
        assert_eq!(json["errorCount"], 0);
        assert_eq!(json["deletionWindowSize"], 1000);
        assert_eq!(json["bloomFilterExpectedBlobCount"], 1_000_000);
        assert_eq!(json["bloomFilterAssociatedProbability"], 0.01);
    }

    #[test]
    fn legacy_task_details_still_deserialize() {
        let legacy = r#"{
            "type": "BlobGCTask",
            "timestamp": "2021-11-05T12:00:00Z",
            "referenceSourceCount": 4,
            "blobCount": 10,
            "gcedBlobCount": 2,
            "errorCount": 1,
            "bloomFilterExpectedBlobCount": 100,
            "bloomFilterAssociatedProbability": 0.05
        }"#;
        let details: GcTaskDetails = serde_json::from_str(legacy).unwrap();

        assert_eq!(details.deletion_window_size, DEFAULT_DELETION_WINDOW_SIZE);
        assert_eq!(details.snapshot().gced_blob_count, 2);
        assert_eq!(details.snapshot().bloom_filter_expected_blob_count, 100);
    }

    #[test]
    fn details_round_trip() {
        let details = GcTaskDetails::from_snapshot(Context::new(10, 0.1).snapshot(), 7, Utc::now());
        let json = serde_json::to_string(&details).unwrap();
        assert_eq!(serde_json::from_str::<GcTaskDetails>(&json).unwrap(), details);
    }
}
