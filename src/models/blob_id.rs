//! Plain blob identifiers, their factories, and bucket names.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::error::{ErrorCode, StorageError, StorageResult};

/// Opaque identifier of a stored blob, as understood by the storage DAO.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    /// Wraps an already encoded id without validation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlobId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Mints and parses plain blob identifiers.
pub trait BlobIdFactory: Send + Sync {
    /// Derives an identifier for the given content.
    fn of(&self, content: &[u8]) -> BlobId;

    /// Parses an identifier previously produced by [`BlobIdFactory::of`].
    fn parse(&self, id: &str) -> StorageResult<BlobId>;
}

fn parse_non_empty(id: &str) -> StorageResult<BlobId> {
    if id.is_empty() {
        return Err(StorageError::new(ErrorCode::EmptyBlobId));
    }
    Ok(BlobId::new(id))
}

/// Content-derived identifiers: URL-safe base64 of the SHA-256 digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashBlobIdFactory;

impl BlobIdFactory for HashBlobIdFactory {
    fn of(&self, content: &[u8]) -> BlobId {
        let digest = Sha256::digest(content);
        BlobId::new(BASE64_URL.encode(digest))
    }

    fn parse(&self, id: &str) -> StorageResult<BlobId> {
        parse_non_empty(id)
    }
}

/// Random identifiers, unrelated to content.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainBlobIdFactory;

impl BlobIdFactory for PlainBlobIdFactory {
    fn of(&self, _content: &[u8]) -> BlobId {
        BlobId::new(Uuid::new_v4().to_string())
    }

    fn parse(&self, id: &str) -> StorageResult<BlobId> {
        parse_non_empty(id)
    }
}

/// Name of a bucket, the namespace blobs are stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketName(String);

impl BucketName {
    pub const DEFAULT: &'static str = "default-bucket";

    pub fn new(name: impl Into<String>) -> StorageResult<Self> {
        let name = name.into();
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(StorageError::with_message(
                ErrorCode::InvalidBucketName,
                format!("Invalid bucket name '{}'", name),
            ));
        }
        Ok(Self(name))
    }

    pub fn default_bucket() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BucketName {
    fn default() -> Self {
        Self::default_bucket()
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage hint supplied by callers when saving a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StoragePolicy {
    #[default]
    SizeBased,
    LowCost,
    HighPerformance,
}

impl StoragePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoragePolicy::SizeBased => "SizeBased",
            StoragePolicy::LowCost => "LowCost",
            StoragePolicy::HighPerformance => "HighPerformance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "sizebased" => Some(StoragePolicy::SizeBased),
            "lowcost" => Some(StoragePolicy::LowCost),
            "highperformance" => Some(StoragePolicy::HighPerformance),
            _ => None,
        }
    }
}
