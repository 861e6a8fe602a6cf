//! Blob save, read and release handlers.

use axum::{
    body::Body,
    http::{HeaderValue, Response, StatusCode},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{StorageError, StorageResult};
use crate::models::{BlobId, BucketName, StoragePolicy};
use crate::storage::BlobStore;

use super::{build_response, common_headers, json_response};

/// Body of a successful save.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedBlob {
    pub bucket: BucketName,
    pub blob_id: BlobId,
    pub size: usize,
}

/// POST /blobs/{bucket} - Save the request body.
pub async fn save_blob(
    store: &dyn BlobStore,
    bucket: &str,
    query: &HashMap<String, String>,
    body: Bytes,
) -> StorageResult<Response<Body>> {
    let bucket = BucketName::new(bucket)?;
    let policy = match query.get("policy") {
        None => StoragePolicy::default(),
        Some(raw) => StoragePolicy::from_str(raw).ok_or_else(|| {
            StorageError::invalid_argument(format!("'policy' is not a supported storage policy: {}", raw))
        })?,
    };

    let size = body.len();
    let blob_id = store.save(&bucket, body, policy).await?;

    Ok(json_response(
        StatusCode::CREATED,
        &SavedBlob {
            bucket,
            blob_id,
            size,
        },
    ))
}

/// GET /blobs/{bucket}/{id} - Read a blob.
pub async fn read_blob(store: &dyn BlobStore, bucket: &str, id: &str) -> StorageResult<Response<Body>> {
    let bucket = BucketName::new(bucket)?;
    let content = store.read(&bucket, &BlobId::new(id)).await?;

    let mut headers = common_headers();
    headers.insert("Content-Type", HeaderValue::from_static("application/octet-stream"));
    Ok(build_response(StatusCode::OK, headers, Body::from(content)))
}

/// DELETE /blobs/{bucket}/{id} - Release a blob.
///
/// Deduplicating stores keep the content until garbage collection.
pub async fn delete_blob(store: &dyn BlobStore, bucket: &str, id: &str) -> StorageResult<Response<Body>> {
    let bucket = BucketName::new(bucket)?;
    store.delete(&bucket, &BlobId::new(id)).await?;
    Ok(build_response(StatusCode::NO_CONTENT, common_headers(), Body::empty()))
}
