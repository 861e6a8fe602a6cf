//! Request routing for the admin API.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::Response,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::StorageResult;
use crate::handlers;
use crate::storage::{BlobStore, BloomFilterGcAlgorithm};

/// Application state shared between handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub blob_store: Arc<dyn BlobStore>,
    pub gc: Arc<BloomFilterGcAlgorithm>,
}

/// Creates the main router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/blobs", delete(gc_handler))
        .route("/blobs/:bucket", post(save_handler))
        // Path-sharded ids contain slashes.
        .route("/blobs/:bucket/*id", get(read_handler).delete(delete_handler))
        .with_state(state)
}

fn into_response(result: StorageResult<Response<Body>>) -> Response<Body> {
    match result {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn gc_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response<Body> {
    into_response(
        handlers::delete_unreferenced_blobs(&state.gc, state.blob_store.default_bucket(), &query).await,
    )
}

async fn save_handler(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response<Body> {
    into_response(handlers::save_blob(state.blob_store.as_ref(), &bucket, &query, body).await)
}

async fn read_handler(
    State(state): State<AppState>,
    Path((bucket, id)): Path<(String, String)>,
) -> Response<Body> {
    into_response(handlers::read_blob(state.blob_store.as_ref(), &bucket, &id).await)
}

async fn delete_handler(
    State(state): State<AppState>,
    Path((bucket, id)): Path<(String, String)>,
) -> Response<Body> {
    into_response(handlers::delete_blob(state.blob_store.as_ref(), &bucket, &id).await)
}
