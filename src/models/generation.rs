//! Generation scheme configuration shared by id minting and garbage collection.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::{parse_duration, DurationUnit};
use crate::error::{ErrorCode, StorageError, StorageResult};

/// Default family for freshly deployed stores.
pub const DEFAULT_FAMILY: u32 = 1;

/// Default generation length: 30 days.
pub const DEFAULT_GENERATION_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Immutable `(family, generation duration)` pair.
///
/// Generations are counted in whole durations elapsed since the Unix epoch,
/// with millisecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationConfiguration {
    family: u32,
    duration: Duration,
}

impl GenerationConfiguration {
    pub const DEFAULT: GenerationConfiguration = GenerationConfiguration {
        family: DEFAULT_FAMILY,
        duration: DEFAULT_GENERATION_DURATION,
    };

    /// Validates and builds a configuration.
    ///
    /// Family `0` is reserved for untagged ids and durations shorter than a
    /// millisecond cannot index generations, so both are rejected.
    pub fn new(family: u32, duration: Duration) -> StorageResult<Self> {
        if family == 0 {
            return Err(StorageError::with_message(
                ErrorCode::InvalidConfiguration,
                "Generation family must be strictly positive",
            ));
        }
        if duration.as_millis() == 0 {
            return Err(StorageError::with_message(
                ErrorCode::InvalidConfiguration,
                "Generation duration must be strictly positive",
            ));
        }
        Ok(Self { family, duration })
    }

    /// Builds a configuration from raw configuration values.
    ///
    /// A missing value falls back to its default; a bare duration number is
    /// read as days.
    pub fn parse(family: Option<&str>, duration: Option<&str>) -> StorageResult<Self> {
        let family = match family.map(str::trim) {
            None | Some("") => DEFAULT_FAMILY,
            Some(raw) => {
                let value: i64 = raw.parse().map_err(|_| {
                    StorageError::with_message(
                        ErrorCode::InvalidConfiguration,
                        format!("Generation family '{}' is not an integer", raw),
                    )
                })?;
                if value <= 0 || value > i64::from(u32::MAX) {
                    return Err(StorageError::with_message(
                        ErrorCode::InvalidConfiguration,
                        format!("Generation family must be strictly positive, got {}", value),
                    ));
                }
                value as u32
            }
        };
        let duration = match duration.map(str::trim) {
            None | Some("") => DEFAULT_GENERATION_DURATION,
            Some(raw) => parse_duration(raw, DurationUnit::Days)?,
        };
        Self::new(family, duration)
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Index of the generation containing `instant`.
    ///
    /// Instants before the epoch all fall into generation 0.
    pub fn generation_at(&self, instant: DateTime<Utc>) -> u64 {
        let millis = instant.timestamp_millis().max(0) as u128;
        (millis / self.duration.as_millis()) as u64
    }
}

impl Default for GenerationConfiguration {
    fn default() -> Self {
        Self::DEFAULT
    }
}
