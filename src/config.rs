//! Server configuration.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{GenerationConfiguration, IdLayout};

/// Default admin port.
pub const DEFAULT_PORT: u16 = 8000;

/// Command-line arguments for the server.
#[derive(Parser, Debug, Clone)]
#[command(name = "blob-dedup-rs")]
#[command(about = "Deduplicating blob store with bloom filter garbage collection")]
#[command(version)]
pub struct Args {
    /// Host address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port for the admin API.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding blob data. Blobs are kept in memory when absent.
    #[arg(long, short = 'l')]
    pub location: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Enable silent mode (minimal logging).
    #[arg(long, short = 's')]
    pub silent: bool,

    /// Generation family. Bump it to revoke the recency protection of every
    /// previously written blob.
    #[arg(long)]
    pub generation_family: Option<String>,

    /// Generation duration, e.g. `30d`, `12h`. Bare numbers are days.
    #[arg(long)]
    pub generation_duration: Option<String>,

    /// Store every save under a fresh id and delete eagerly.
    #[arg(long)]
    pub no_deduplication: bool,

    /// Layout of blob ids: `flat` or `path`.
    #[arg(long, default_value = "flat")]
    pub id_layout: String,

    /// Interval between background garbage collection passes, e.g. `1d`.
    /// Bare numbers are hours. Disabled when absent.
    #[arg(long)]
    pub gc_interval: Option<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            location: None,
            debug: false,
            silent: false,
            generation_family: None,
            generation_duration: None,
            no_deduplication: false,
            id_layout: IdLayout::Flat.as_str().to_string(),
            gc_interval: None,
        }
    }
}

/// How saved content maps to stored objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageStrategy {
    /// One stored object per save.
    PassThrough,
    /// One stored object per distinct content.
    #[default]
    Deduplication,
}

/// Server configuration derived from command-line arguments.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host address to bind to.
    pub host: String,
    /// Port for the admin API.
    pub port: u16,
    /// Directory holding blob data.
    pub location: Option<PathBuf>,
    /// Enable debug logging.
    pub debug: bool,
    /// Generation scheme shared by id minting and garbage collection.
    pub generation: GenerationConfiguration,
    pub storage_strategy: StorageStrategy,
    pub id_layout: IdLayout,
    /// Interval between background garbage collection passes.
    pub gc_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            location: None,
            debug: false,
            generation: GenerationConfiguration::DEFAULT,
            storage_strategy: StorageStrategy::Deduplication,
            id_layout: IdLayout::Flat,
            gc_interval: None,
        }
    }
}

impl TryFrom<Args> for Config {
    type Error = StorageError;

    fn try_from(args: Args) -> StorageResult<Self> {
        let generation = GenerationConfiguration::parse(
            args.generation_family.as_deref(),
            args.generation_duration.as_deref(),
        )?;
        let id_layout = IdLayout::from_str(&args.id_layout).ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::InvalidConfiguration,
                format!("Unknown id layout '{}'", args.id_layout),
            )
        })?;
        let gc_interval = args
            .gc_interval
            .as_deref()
            .map(|raw| parse_duration(raw, DurationUnit::Hours))
            .transpose()?;
        let storage_strategy = if args.no_deduplication {
            StorageStrategy::PassThrough
        } else {
            StorageStrategy::Deduplication
        };

        Ok(Self {
            host: args.host,
            port: args.port,
            location: args.location,
            debug: args.debug,
            generation,
            storage_strategy,
            id_layout,
            gc_interval,
        })
    }
}

impl Config {
    /// Returns the bind address for the admin API.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Unit applied to a duration written without a suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl DurationUnit {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix.to_lowercase().as_str() {
            "ms" | "msec" | "msecs" | "millis" => Some(DurationUnit::Milliseconds),
            "s" | "sec" | "secs" | "second" | "seconds" => Some(DurationUnit::Seconds),
            "m" | "min" | "mins" | "minute" | "minutes" => Some(DurationUnit::Minutes),
            "h" | "hour" | "hours" => Some(DurationUnit::Hours),
            "d" | "day" | "days" => Some(DurationUnit::Days),
            "w" | "week" | "weeks" => Some(DurationUnit::Weeks),
            "month" | "months" => Some(DurationUnit::Months),
            "y" | "year" | "years" => Some(DurationUnit::Years),
            _ => None,
        }
    }

    fn millis(&self) -> u64 {
        const SECOND: u64 = 1000;
        const DAY: u64 = 24 * 60 * 60 * SECOND;
        match self {
            DurationUnit::Milliseconds => 1,
            DurationUnit::Seconds => SECOND,
            DurationUnit::Minutes => 60 * SECOND,
            DurationUnit::Hours => 60 * 60 * SECOND,
            DurationUnit::Days => DAY,
            DurationUnit::Weeks => 7 * DAY,
            DurationUnit::Months => 30 * DAY,
            DurationUnit::Years => 365 * DAY,
        }
    }
}

/// Parses `<amount>[ ]<unit>` into a strictly positive duration.
pub fn parse_duration(raw: &str, default_unit: DurationUnit) -> StorageResult<Duration> {
    let invalid = |reason: &str| {
        StorageError::with_message(
            ErrorCode::InvalidConfiguration,
            format!("Invalid duration '{}': {}", raw, reason),
        )
    };

    let trimmed = raw.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '-' && c != '+')
        .unwrap_or(trimmed.len());
    let (amount, suffix) = trimmed.split_at(split);
    let suffix = suffix.trim();

    let amount: i64 = amount.parse().map_err(|_| invalid("amount is not an integer"))?;
    if amount <= 0 {
        return Err(invalid("must be strictly positive"));
    }
    let unit = if suffix.is_empty() {
        default_unit
    } else {
        DurationUnit::from_suffix(suffix).ok_or_else(|| invalid("unknown unit"))?
    };

    let millis = (amount as u64)
        .checked_mul(unit.millis())
        .ok_or_else(|| invalid("too large"))?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        let cases = [
            ("500ms", Duration::from_millis(500)),
            ("30 s", Duration::from_secs(30)),
            ("5min", Duration::from_secs(300)),
            ("2h", Duration::from_secs(7200)),
            ("3 Days", Duration::from_secs(3 * 86_400)),
            ("1w", Duration::from_secs(7 * 86_400)),
            ("1 month", Duration::from_secs(30 * 86_400)),
            ("1y", Duration::from_secs(365 * 86_400)),
        ];
        for (raw, expected) in cases {
            assert_eq!(parse_duration(raw, DurationUnit::Days).unwrap(), expected, "{}", raw);
        }
    }

    #[test]
    fn parse_duration_defaults_unit() {
        assert_eq!(
            parse_duration("7", DurationUnit::Days).unwrap(),
            Duration::from_secs(7 * 86_400)
        );
        assert_eq!(
            parse_duration("7", DurationUnit::Hours).unwrap(),
            Duration::from_secs(7 * 3600)
        );
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        for raw in ["", "d", "0", "-1d", "1.5d", "3 fortnights", "99999999999999999999"] {
            let error = parse_duration(raw, DurationUnit::Days).unwrap_err();
            assert_eq!(error.code, ErrorCode::InvalidConfiguration, "{}", raw);
        }
    }

    #[test]
    fn config_from_default_args() {
        let config = Config::try_from(Args::default()).unwrap();
        assert_eq!(config.generation, GenerationConfiguration::DEFAULT);
        assert_eq!(config.storage_strategy, StorageStrategy::Deduplication);
        assert_eq!(config.id_layout, IdLayout::Flat);
        assert_eq!(config.gc_interval, None);
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
    }

    #[test]
    fn config_from_custom_args() {
        let args = Args::parse_from([
            "blob-dedup-rs",
            "--generation-family",
            "3",
            "--generation-duration",
            "7d",
            "--id-layout",
            "path",
            "--no-deduplication",
            "--gc-interval",
            "6",
        ]);
        let config = Config::try_from(args).unwrap();

        assert_eq!(config.generation.family(), 3);
        assert_eq!(config.generation.duration(), Duration::from_secs(7 * 86_400));
        assert_eq!(config.id_layout, IdLayout::PathSharded);
        assert_eq!(config.storage_strategy, StorageStrategy::PassThrough);
        assert_eq!(config.gc_interval, Some(Duration::from_secs(6 * 3600)));
    }

    #[test]
    fn invalid_args_fail_configuration_loading() {
        let args = Args {
            generation_family: Some("0".to_string()),
            ..Args::default()
        };
        assert_eq!(Config::try_from(args).unwrap_err().code, ErrorCode::InvalidConfiguration);

        let args = Args {
            id_layout: "tree".to_string(),
            ..Args::default()
        };
        assert_eq!(Config::try_from(args).unwrap_err().code, ErrorCode::InvalidConfiguration);
    }
}
