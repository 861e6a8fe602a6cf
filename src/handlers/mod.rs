//! Request handlers for the admin API.

mod blob;
mod gc;

pub use blob::*;
pub use gc::*;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode};
use serde::Serialize;
use uuid::Uuid;

/// Creates headers common to every response.
pub fn common_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(request_id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
        headers.insert("x-request-id", request_id);
    }
    headers.insert("server", HeaderValue::from_static(concat!("blob-dedup-rs/", env!("CARGO_PKG_VERSION"))));
    headers
}

/// Builds a response with the given status, headers, and body.
pub fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Builds a JSON response.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let mut headers = common_headers();
    headers.insert("Content-Type", HeaderValue::from_static("application/json"));
    match serde_json::to_vec(value) {
        Ok(body) => build_response(status, headers, Body::from(body)),
        Err(_) => build_response(StatusCode::INTERNAL_SERVER_ERROR, common_headers(), Body::empty()),
    }
}
