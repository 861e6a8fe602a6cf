//! File system implementation of the blob store DAO.
//!
//! Blobs live at `<root>/<bucket>/<id>`. A `/` inside an id (path-sharded
//! layout) becomes a directory level, which keeps per-directory fan-out small.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use super::dao::BlobStoreDao;
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{BlobId, BucketName};

/// Prefix of in-flight writes, skipped by listings.
const TEMP_PREFIX: &str = ".tmp-";

pub struct FsBlobStoreDao {
    /// Base directory for bucket directories.
    base_path: PathBuf,
}

impl FsBlobStoreDao {
    pub async fn new(base_path: PathBuf) -> StorageResult<Self> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::store_failure(format!("Failed to create blob directory: {}", e))
        })?;

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn bucket_path(&self, bucket: &BucketName) -> PathBuf {
        self.base_path.join(bucket.as_str())
    }

    fn blob_path(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<PathBuf> {
        let mut path = self.bucket_path(bucket);
        for segment in id.as_str().split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.starts_with(TEMP_PREFIX) {
                return Err(StorageError::with_message(
                    ErrorCode::InvalidBlobId,
                    format!("Blob id '{}' cannot be mapped to a file path", id),
                ));
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// Removes directories left empty by a delete, up to the bucket directory.
    async fn prune_empty_parents(&self, bucket: &BucketName, path: &Path) {
        let bucket_path = self.bucket_path(bucket);
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == bucket_path || !dir.starts_with(&bucket_path) {
                break;
            }
            // Fails when the directory still holds other blobs.
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait]
impl BlobStoreDao for FsBlobStoreDao {
    async fn save(&self, bucket: &BucketName, id: &BlobId, data: Bytes) -> StorageResult<()> {
        let path = self.blob_path(bucket, id)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::new(ErrorCode::InternalError))?;
        fs::create_dir_all(parent).await.map_err(|e| {
            StorageError::store_failure(format!("Failed to create blob directory: {}", e))
        })?;

        // Write aside then rename, so readers never observe a partial blob.
        let temp_path = parent.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StorageError::store_failure(format!("Failed to create blob file: {}", e))
        })?;
        file.write_all(&data).await.map_err(|e| {
            StorageError::store_failure(format!("Failed to write blob data: {}", e))
        })?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &path).await {
            fs::remove_file(&temp_path).await.ok();
            return Err(StorageError::store_failure(format!(
                "Failed to move blob into place: {}",
                e
            )));
        }
        Ok(())
    }

    async fn read(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<Bytes> {
        let path = self.blob_path(bucket, id)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::with_message(
                ErrorCode::BlobNotFound,
                format!("Blob '{}' not found in bucket '{}'", id, bucket),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, bucket: &BucketName, id: &BlobId) -> StorageResult<()> {
        let path = self.blob_path(bucket, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_parents(bucket, &path).await;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(bucket = %bucket, id = %id, "Blob already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list_blobs<'a>(&'a self, bucket: &'a BucketName) -> BoxStream<'a, StorageResult<BlobId>> {
        let walk = DirectoryWalk {
            root: self.bucket_path(bucket),
            pending: vec![self.bucket_path(bucket)],
            current: None,
        };

        stream::try_unfold(walk, DirectoryWalk::next).boxed()
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketName>> {
        let mut dir = match fs::read_dir(&self.base_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut buckets = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let is_dir = match entry.file_type().await {
                Ok(file_type) => file_type.is_dir(),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if is_dir {
                if let Some(name) = entry.file_name().to_str() {
                    buckets.push(BucketName::new(name)?);
                }
            }
        }
        buckets.sort();
        Ok(buckets)
    }
}

/// Depth-first walk over a bucket directory.
struct DirectoryWalk {
    root: PathBuf,
    pending: Vec<PathBuf>,
    current: Option<fs::ReadDir>,
}

impl DirectoryWalk {
    async fn next(mut self) -> StorageResult<Option<(BlobId, Self)>> {
        loop {
            if let Some(dir) = self.current.as_mut() {
                let next = match dir.next_entry().await {
                    Ok(next) => next,
                    // Directory pruned while being read.
                    Err(e) if e.kind() == ErrorKind::NotFound => None,
                    Err(e) => return Err(e.into()),
                };
                match next {
                    Some(entry) => {
                        let path = entry.path();
                        let file_type = match entry.file_type().await {
                            Ok(file_type) => file_type,
                            // Entry deleted since it was read.
                            Err(e) if e.kind() == ErrorKind::NotFound => continue,
                            Err(e) => return Err(e.into()),
                        };
                        if file_type.is_dir() {
                            self.pending.push(path);
                            continue;
                        }
                        if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                            continue;
                        }
                        let id = self.blob_id(&path)?;
                        return Ok(Some((id, self)));
                    }
                    None => self.current = None,
                }
            } else if let Some(next) = self.pending.pop() {
                match fs::read_dir(&next).await {
                    Ok(dir) => self.current = Some(dir),
                    // Missing bucket, or a shard directory pruned concurrently.
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                }
            } else {
                return Ok(None);
            }
        }
    }

    fn blob_id(&self, path: &Path) -> StorageResult<BlobId> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::new(ErrorCode::InternalError))?;
        let segments = relative
            .components()
            .map(|component| {
                component.as_os_str().to_str().ok_or_else(|| {
                    StorageError::store_failure(format!(
                        "Non UTF-8 blob path {}",
                        relative.display()
                    ))
                })
            })
            .collect::<StorageResult<Vec<&str>>>()?;
        Ok(BlobId::new(segments.join("/")))
    }
}
