//! Generation-aware blob identifiers.
//!
//! A [`GenerationAwareBlobId`] tags a content-derived delegate id with the
//! generation it was written in and the family of the generation scheme.
//! Two string layouts exist:
//!
//! - flat: `{generation}_{family}_{delegate}`
//! - path-sharded: `{family}/{generation}/{d0d1}/{d2d3}/{rest of delegate}`
//!
//! The `(family = 0, generation = 0)` pair marks ids minted before tagging
//! existed. Those always encode as the bare delegate string.
//!
//! Parsing recognizes both layouts whatever the factory mints, so ids written
//! before a layout change keep their tag.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use super::blob_id::{BlobId, BlobIdFactory};
use super::generation::GenerationConfiguration;
use crate::clock::Clock;
use crate::error::{ErrorCode, StorageError, StorageResult};

const FLAT_SEPARATOR: char = '_';
const PATH_SEPARATOR: char = '/';

/// Number of leading shard segments in the path-sharded layout.
const SHARD_COUNT: usize = 2;
/// Characters per shard segment.
const SHARD_WIDTH: usize = 2;

/// String layout of a generation-aware id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IdLayout {
    #[default]
    Flat,
    PathSharded,
}

impl IdLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdLayout::Flat => "flat",
            IdLayout::PathSharded => "path",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "flat" => Some(IdLayout::Flat),
            "path" | "path-sharded" | "sharded" => Some(IdLayout::PathSharded),
            _ => None,
        }
    }
}

/// A delegate blob id tagged with `(family, generation)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationAwareBlobId {
    family: u32,
    generation: u64,
    delegate: BlobId,
    layout: IdLayout,
}

impl GenerationAwareBlobId {
    pub fn new(family: u32, generation: u64, delegate: BlobId, layout: IdLayout) -> Self {
        Self {
            family,
            generation,
            delegate,
            layout,
        }
    }

    /// Wraps an id minted before generation tagging.
    pub fn untagged(delegate: BlobId, layout: IdLayout) -> Self {
        Self::new(0, 0, delegate, layout)
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn delegate(&self) -> &BlobId {
        &self.delegate
    }

    pub fn layout(&self) -> IdLayout {
        self.layout
    }

    pub fn is_untagged(&self) -> bool {
        self.family == 0 && self.generation == 0
    }

    /// Encodes the id in its layout.
    pub fn as_string(&self) -> String {
        if self.is_untagged() {
            return self.delegate.as_str().to_string();
        }
        match self.layout {
            IdLayout::Flat => format!(
                "{}{sep}{}{sep}{}",
                self.generation,
                self.family,
                self.delegate,
                sep = FLAT_SEPARATOR
            ),
            IdLayout::PathSharded => format!(
                "{}{sep}{}{sep}{}",
                self.family,
                self.generation,
                shard(self.delegate.as_str()),
                sep = PATH_SEPARATOR
            ),
        }
    }

    /// The id as the storage DAO sees it.
    pub fn to_blob_id(&self) -> BlobId {
        BlobId::new(self.as_string())
    }

    /// Whether the id is recent enough to be protected from collection.
    ///
    /// Ids of another family and untagged ids are never protected. Otherwise
    /// the id is protected while it is at most one generation behind the
    /// generation containing `reference_time`.
    pub fn in_active_generation(
        &self,
        configuration: &GenerationConfiguration,
        reference_time: DateTime<Utc>,
    ) -> bool {
        if self.family != configuration.family() || self.is_untagged() {
            return false;
        }
        let active_generation = configuration.generation_at(reference_time);
        self.generation.saturating_add(1) >= active_generation
    }
}

impl fmt::Display for GenerationAwareBlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// Splits the delegate into short leading segments to bound directory fan-out.
///
/// Delegates too short to shard, or whose leading characters are not plain
/// ASCII, are emitted as is.
fn shard(delegate: &str) -> String {
    let prefix_len = SHARD_COUNT * SHARD_WIDTH;
    let bytes = delegate.as_bytes();
    if bytes.len() <= prefix_len
        || !bytes[..prefix_len]
            .iter()
            .all(|b| b.is_ascii() && *b != PATH_SEPARATOR as u8)
    {
        return delegate.to_string();
    }

    let mut sharded = String::with_capacity(delegate.len() + SHARD_COUNT);
    for i in 0..SHARD_COUNT {
        sharded.push_str(&delegate[i * SHARD_WIDTH..(i + 1) * SHARD_WIDTH]);
        sharded.push(PATH_SEPARATOR);
    }
    sharded.push_str(&delegate[prefix_len..]);
    sharded
}

/// Inverse of [`shard`]. Anything without a complete shard structure is
/// taken verbatim.
fn unshard(sharded: &str) -> String {
    let segments: Vec<&str> = sharded.splitn(SHARD_COUNT + 1, PATH_SEPARATOR).collect();
    let complete = segments.len() == SHARD_COUNT + 1
        && segments[..SHARD_COUNT]
            .iter()
            .all(|s| s.len() == SHARD_WIDTH && s.is_ascii())
        && !segments[SHARD_COUNT].is_empty();
    if complete {
        segments.concat()
    } else {
        sharded.to_string()
    }
}

/// Whether a component is shaped like an integer, signed or not.
fn looks_numeric(component: &str) -> bool {
    let digits = component.strip_prefix('-').unwrap_or(component);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Splits `id` into two integer shaped tag components and the remainder.
fn split_tag(id: &str, separator: char) -> Option<(&str, &str, &str)> {
    let mut parts = id.splitn(3, separator);
    let (Some(first), Some(second), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    (looks_numeric(first) && looks_numeric(second)).then_some((first, second, rest))
}

fn parse_tag_component<T: std::str::FromStr>(id: &str, name: &str, raw: &str) -> StorageResult<T> {
    raw.parse::<T>().map_err(|_| {
        StorageError::with_message(
            ErrorCode::InvalidBlobId,
            format!("Invalid {} '{}' in blob id '{}'", name, raw, id),
        )
    })
}

/// Mints and parses [`GenerationAwareBlobId`]s.
#[derive(Clone)]
pub struct GenerationAwareBlobIdFactory {
    clock: Arc<dyn Clock>,
    delegate: Arc<dyn BlobIdFactory>,
    configuration: GenerationConfiguration,
    layout: IdLayout,
}

impl GenerationAwareBlobIdFactory {
    pub fn new(
        clock: Arc<dyn Clock>,
        delegate: Arc<dyn BlobIdFactory>,
        configuration: GenerationConfiguration,
    ) -> Self {
        Self {
            clock,
            delegate,
            configuration,
            layout: IdLayout::Flat,
        }
    }

    /// Selects the string layout of minted ids.
    pub fn with_layout(mut self, layout: IdLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn configuration(&self) -> &GenerationConfiguration {
        &self.configuration
    }

    pub fn layout(&self) -> IdLayout {
        self.layout
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Mints an id for `content` in the current generation.
    pub fn of(&self, content: &[u8]) -> GenerationAwareBlobId {
        let delegate = self.delegate.of(content);
        let generation = self.configuration.generation_at(self.clock.now());
        GenerationAwareBlobId::new(self.configuration.family(), generation, delegate, self.layout)
    }

    /// Parses an id written in either layout.
    ///
    /// A string is tagged when its first two components, split by one of the
    /// layout separators, are both integer shaped. Anything else is an
    /// untagged id. A tagged string with a negative or out of range component
    /// is an error.
    pub fn parse(&self, id: &str) -> StorageResult<GenerationAwareBlobId> {
        if id.is_empty() {
            return Err(StorageError::new(ErrorCode::EmptyBlobId));
        }
        if let Some((family, generation, sharded)) = split_tag(id, PATH_SEPARATOR) {
            let family: u32 = parse_tag_component(id, "family", family)?;
            let generation: u64 = parse_tag_component(id, "generation", generation)?;
            let delegate = self.parse_delegate(id, &unshard(sharded))?;
            return Ok(GenerationAwareBlobId::new(family, generation, delegate, IdLayout::PathSharded));
        }
        if let Some((generation, family, delegate)) = split_tag(id, FLAT_SEPARATOR) {
            let generation: u64 = parse_tag_component(id, "generation", generation)?;
            let family: u32 = parse_tag_component(id, "family", family)?;
            let delegate = self.parse_delegate(id, delegate)?;
            return Ok(GenerationAwareBlobId::new(family, generation, delegate, IdLayout::Flat));
        }
        self.untagged(id)
    }

    fn parse_delegate(&self, id: &str, delegate: &str) -> StorageResult<BlobId> {
        if delegate.is_empty() {
            return Err(StorageError::with_message(
                ErrorCode::InvalidBlobId,
                format!("Missing delegate in blob id '{}'", id),
            ));
        }
        self.delegate.parse(delegate)
    }

    fn untagged(&self, id: &str) -> StorageResult<GenerationAwareBlobId> {
        let delegate = self.delegate.parse(id)?;
        Ok(GenerationAwareBlobId::untagged(delegate, self.layout))
    }
}

impl fmt::Debug for GenerationAwareBlobIdFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationAwareBlobIdFactory")
            .field("configuration", &self.configuration)
            .field("layout", &self.layout)
            .finish()
    }
}
