//! Garbage collection admin handler.
//!
//! `DELETE /blobs?scope=unreferenced` runs one pass and answers with the
//! task report once it is done.

use axum::{
    body::Body,
    http::{Response, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::{GcTaskDetails, GC_TASK_TYPE};
use crate::error::{StorageError, StorageResult};
use crate::models::BucketName;
use crate::storage::{BloomFilterGcAlgorithm, GcParameters, GcResult};

use super::json_response;

/// The only supported `scope` value.
pub const SCOPE_UNREFERENCED: &str = "unreferenced";

/// Final state of a garbage collection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

impl From<GcResult> for TaskStatus {
    fn from(result: GcResult) -> Self {
        match result {
            GcResult::Completed => TaskStatus::Completed,
            GcResult::Partial => TaskStatus::Failed,
        }
    }
}

/// Report of a finished garbage collection task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcTaskReport {
    pub task_id: Uuid,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub submit_date: DateTime<Utc>,
    pub started_date: DateTime<Utc>,
    pub completed_date: DateTime<Utc>,
    pub additional_information: GcTaskDetails,
}

/// Reads pass parameters from query parameters, falling back to defaults.
pub fn parse_gc_parameters(query: &HashMap<String, String>) -> StorageResult<GcParameters> {
    let defaults = GcParameters::default();
    let parameters = GcParameters {
        expected_blob_count: parse_count(query, "expectedBlobCount", defaults.expected_blob_count)?,
        deletion_window_size: parse_count(query, "deletionWindowSize", defaults.deletion_window_size)?,
        associated_probability: parse_probability(query, "associatedProbability", defaults.associated_probability)?,
    };
    parameters.validate()?;
    Ok(parameters)
}

fn parse_count(query: &HashMap<String, String>, name: &str, default: usize) -> StorageResult<usize> {
    let Some(raw) = query.get(name) else {
        return Ok(default);
    };
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| StorageError::invalid_argument(format!("'{}' must be an integer, got '{}'", name, raw)))?;
    if value <= 0 {
        return Err(StorageError::invalid_argument(format!(
            "'{}' must be strictly positive",
            name
        )));
    }
    usize::try_from(value)
        .map_err(|_| StorageError::invalid_argument(format!("'{}' is too large", name)))
}

fn parse_probability(query: &HashMap<String, String>, name: &str, default: f64) -> StorageResult<f64> {
    let Some(raw) = query.get(name) else {
        return Ok(default);
    };
    raw.trim()
        .parse()
        .map_err(|_| StorageError::invalid_argument(format!("'{}' must be a number, got '{}'", name, raw)))
}

fn parse_scope(query: &HashMap<String, String>) -> StorageResult<()> {
    match query.get("scope").map(String::as_str) {
        Some(SCOPE_UNREFERENCED) => Ok(()),
        Some(other) => Err(StorageError::invalid_argument(format!(
            "'scope' value '{}' is not supported. Supported values are [{}]",
            other, SCOPE_UNREFERENCED
        ))),
        None => Err(StorageError::invalid_argument(format!(
            "'scope' query parameter is compulsory. Supported values are [{}]",
            SCOPE_UNREFERENCED
        ))),
    }
}

fn parse_bucket(query: &HashMap<String, String>, default: &BucketName) -> StorageResult<BucketName> {
    match query.get("bucket") {
        None => Ok(default.clone()),
        Some(raw) => BucketName::new(raw.as_str())
            .map_err(|_| StorageError::invalid_argument(format!("'bucket' is not a valid bucket name: '{}'", raw))),
    }
}

/// DELETE /blobs?scope=unreferenced - Collect unreferenced blobs.
///
/// Invalid parameters fail the request. A pass that runs but cannot finish
/// cleanly is reported as a failed task.
pub async fn delete_unreferenced_blobs(
    gc: &BloomFilterGcAlgorithm,
    default_bucket: &BucketName,
    query: &HashMap<String, String>,
) -> StorageResult<Response<Body>> {
    parse_scope(query)?;
    let parameters = parse_gc_parameters(query)?;
    let bucket = parse_bucket(query, default_bucket)?;

    let task_id = Uuid::new_v4();
    let submit_date = gc.clock().now();
    info!(%task_id, bucket = %bucket, "Garbage collection task submitted");

    let context = parameters.new_context();
    let started_date = gc.clock().now();
    let status = match gc
        .gc(
            parameters.expected_blob_count,
            parameters.deletion_window_size,
            parameters.associated_probability,
            &bucket,
            &context,
        )
        .await
    {
        Ok(result) => TaskStatus::from(result),
        Err(e) => {
            warn!(%task_id, error = %e, "Garbage collection task failed");
            TaskStatus::Failed
        }
    };

    let completed_date = gc.clock().now();
    let report = GcTaskReport {
        task_id,
        task_type: GC_TASK_TYPE.to_string(),
        status,
        submit_date,
        started_date,
        completed_date,
        additional_information: GcTaskDetails::from_snapshot(
            context.snapshot(),
            parameters.deletion_window_size,
            completed_date,
        ),
    };

    Ok(json_response(StatusCode::OK, &report))
}
