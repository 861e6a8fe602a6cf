//! Sources of live blob references.

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashSet;

use crate::error::StorageResult;
use crate::models::BlobId;

/// A collection of domain entities that mention blobs.
///
/// The garbage collector treats the union of all sources as the live set.
/// An id reported by any source is never collected during that pass.
pub trait BlobReferenceSource: Send + Sync {
    fn list_referenced_blobs(&self) -> BoxStream<'_, StorageResult<BlobId>>;
}

/// Reference source backed by an in-memory set.
#[derive(Debug, Default)]
pub struct MemoryReferenceSource {
    references: RwLock<HashSet<BlobId>>,
}

impl MemoryReferenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: BlobId) {
        self.references.write().insert(id);
    }

    pub fn extend(&self, ids: impl IntoIterator<Item = BlobId>) {
        self.references.write().extend(ids);
    }

    pub fn remove(&self, id: &BlobId) -> bool {
        self.references.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.references.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.read().is_empty()
    }
}

impl BlobReferenceSource for MemoryReferenceSource {
    fn list_referenced_blobs(&self) -> BoxStream<'_, StorageResult<BlobId>> {
        let ids: Vec<StorageResult<BlobId>> = self.references.read().iter().cloned().map(Ok).collect();
        stream::iter(ids).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn lists_every_reference_once() {
        let source = MemoryReferenceSource::new();
        source.add(BlobId::new("a"));
        source.extend([BlobId::new("b"), BlobId::new("a")]);

        let mut ids: Vec<BlobId> = source.list_referenced_blobs().try_collect().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![BlobId::new("a"), BlobId::new("b")]);

        assert!(source.remove(&BlobId::new("a")));
        assert_eq!(source.len(), 1);
    }
}
