//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the core services
//! as `Arc<CoreConfig>`. Nothing in the core reads process environment variables while
//! handling a request; binaries collect the `ORDERLY_*` values and hand them to
//! [`CoreConfig::from_env_values`].

use crate::constants::{
    ARTIFACTS_DIR_NAME, DEFAULT_FAILED_ATTEMPT_WINDOW_MINUTES, DEFAULT_HIGH_COST_KEYWORDS,
    DEFAULT_MAX_ARTIFACT_BYTES, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_EVENTS_PER_ORDER,
    DEFAULT_MAX_FAILED_ATTEMPTS, DEFAULT_MIN_CREDENTIAL_LEN, DEFAULT_SESSION_TTL_HOURS,
    MAX_FAILED_ATTEMPT_WINDOW_MINUTES, MAX_SESSION_TTL_HOURS, STORE_FILENAME,
};
use crate::store::StoreLimits;
use crate::{OrderError, OrderResult};
use chrono::Duration;
use std::path::{Path, PathBuf};

pub const ENV_DATA_DIR: &str = "ORDERLY_DATA_DIR";
pub const ENV_SESSION_TTL_HOURS: &str = "ORDERLY_SESSION_TTL_HOURS";
pub const ENV_MAX_FAILED_ATTEMPTS: &str = "ORDERLY_MAX_FAILED_ATTEMPTS";
pub const ENV_FAILED_ATTEMPT_WINDOW_MINUTES: &str = "ORDERLY_FAILED_ATTEMPT_WINDOW_MINUTES";
pub const ENV_MIN_CREDENTIAL_LEN: &str = "ORDERLY_MIN_CREDENTIAL_LEN";
pub const ENV_MAX_BATCH_SIZE: &str = "ORDERLY_MAX_BATCH_SIZE";
pub const ENV_MAX_ARTIFACT_BYTES: &str = "ORDERLY_MAX_ARTIFACT_BYTES";
pub const ENV_MAX_EVENTS_PER_ORDER: &str = "ORDERLY_MAX_EVENTS_PER_ORDER";
pub const ENV_HIGH_COST_KEYWORDS: &str = "ORDERLY_HIGH_COST_KEYWORDS";

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    session_ttl: Duration,
    max_failed_attempts: usize,
    failed_attempt_window: Duration,
    min_credential_len: usize,
    max_batch_size: usize,
    max_artifact_bytes: usize,
    max_events_per_order: usize,
    high_cost_keywords: Vec<String>,
}

/// Optional replacements for the defaults. `None` keeps the default.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub session_ttl_hours: Option<i64>,
    pub max_failed_attempts: Option<usize>,
    pub failed_attempt_window_minutes: Option<i64>,
    pub min_credential_len: Option<usize>,
    pub max_batch_size: Option<usize>,
    pub max_artifact_bytes: Option<usize>,
    pub max_events_per_order: Option<usize>,
    pub high_cost_keywords: Option<Vec<String>>,
}

impl CoreConfig {
    /// Create a `CoreConfig` with default limits.
    pub fn new(data_dir: PathBuf) -> OrderResult<Self> {
        Self::with_overrides(data_dir, ConfigOverrides::default())
    }

    /// Create a `CoreConfig`, validating every override.
    pub fn with_overrides(data_dir: PathBuf, overrides: ConfigOverrides) -> OrderResult<Self> {
        if data_dir.as_os_str().is_empty() {
            return Err(OrderError::Validation("data_dir cannot be empty".into()));
        }

        let session_ttl_hours = overrides
            .session_ttl_hours
            .unwrap_or(DEFAULT_SESSION_TTL_HOURS);
        let window_minutes = overrides
            .failed_attempt_window_minutes
            .unwrap_or(DEFAULT_FAILED_ATTEMPT_WINDOW_MINUTES);
        let session_ttl = bounded_duration(
            "session TTL (hours)",
            session_ttl_hours,
            MAX_SESSION_TTL_HOURS,
            Duration::try_hours,
        )?;
        let failed_attempt_window = bounded_duration(
            "failed attempt window (minutes)",
            window_minutes,
            MAX_FAILED_ATTEMPT_WINDOW_MINUTES,
            Duration::try_minutes,
        )?;

        let config = Self {
            data_dir,
            session_ttl,
            max_failed_attempts: positive(
                "max_failed_attempts",
                overrides.max_failed_attempts,
                DEFAULT_MAX_FAILED_ATTEMPTS,
            )?,
            failed_attempt_window,
            min_credential_len: positive(
                "min_credential_len",
                overrides.min_credential_len,
                DEFAULT_MIN_CREDENTIAL_LEN,
            )?,
            max_batch_size: positive(
                "max_batch_size",
                overrides.max_batch_size,
                DEFAULT_MAX_BATCH_SIZE,
            )?,
            max_artifact_bytes: positive(
                "max_artifact_bytes",
                overrides.max_artifact_bytes,
                DEFAULT_MAX_ARTIFACT_BYTES,
            )?,
            max_events_per_order: positive(
                "max_events_per_order",
                overrides.max_events_per_order,
                DEFAULT_MAX_EVENTS_PER_ORDER,
            )?,
            high_cost_keywords: overrides
                .high_cost_keywords
                .unwrap_or_else(|| {
                    DEFAULT_HIGH_COST_KEYWORDS
                        .iter()
                        .map(|k| (*k).to_owned())
                        .collect()
                })
                .into_iter()
                .map(|k| k.trim().to_ascii_uppercase())
                .filter(|k| !k.is_empty())
                .collect(),
        };

        Ok(config)
    }

    /// Build configuration from `ORDERLY_*` values supplied by `lookup`.
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`, called by the binary at startup.
    /// Blank values are treated as unset. `data_dir` is used when `ORDERLY_DATA_DIR` is unset.
    pub fn from_env_values(
        data_dir: PathBuf,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> OrderResult<Self> {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = value(ENV_DATA_DIR).map(PathBuf::from).unwrap_or(data_dir);
        let overrides = ConfigOverrides {
            session_ttl_hours: parse_value(ENV_SESSION_TTL_HOURS, value(ENV_SESSION_TTL_HOURS))?,
            max_failed_attempts: parse_value(
                ENV_MAX_FAILED_ATTEMPTS,
                value(ENV_MAX_FAILED_ATTEMPTS),
            )?,
            failed_attempt_window_minutes: parse_value(
                ENV_FAILED_ATTEMPT_WINDOW_MINUTES,
                value(ENV_FAILED_ATTEMPT_WINDOW_MINUTES),
            )?,
            min_credential_len: parse_value(ENV_MIN_CREDENTIAL_LEN, value(ENV_MIN_CREDENTIAL_LEN))?,
            max_batch_size: parse_value(ENV_MAX_BATCH_SIZE, value(ENV_MAX_BATCH_SIZE))?,
            max_artifact_bytes: parse_value(ENV_MAX_ARTIFACT_BYTES, value(ENV_MAX_ARTIFACT_BYTES))?,
            max_events_per_order: parse_value(
                ENV_MAX_EVENTS_PER_ORDER,
                value(ENV_MAX_EVENTS_PER_ORDER),
            )?,
            high_cost_keywords: value(ENV_HIGH_COST_KEYWORDS)
                .map(|v| v.split(',').map(str::to_owned).collect()),
        };

        Self::with_overrides(data_dir, overrides)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILENAME)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join(ARTIFACTS_DIR_NAME)
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn max_failed_attempts(&self) -> usize {
        self.max_failed_attempts
    }

    pub fn failed_attempt_window(&self) -> Duration {
        self.failed_attempt_window
    }

    pub fn min_credential_len(&self) -> usize {
        self.min_credential_len
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn max_artifact_bytes(&self) -> usize {
        self.max_artifact_bytes
    }

    pub fn high_cost_keywords(&self) -> &[String] {
        &self.high_cost_keywords
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_events_per_order: self.max_events_per_order,
        }
    }
}

fn positive(name: &str, value: Option<usize>, default: usize) -> OrderResult<usize> {
    match value {
        Some(0) => Err(OrderError::Validation(format!("{name} must be greater than zero"))),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}

fn bounded_duration(
    name: &str,
    value: i64,
    max: i64,
    to_duration: fn(i64) -> Option<Duration>,
) -> OrderResult<Duration> {
    if !(1..=max).contains(&value) {
        return Err(OrderError::Validation(format!(
            "{name} must be between 1 and {max}, got {value}"
        )));
    }
    to_duration(value)
        .ok_or_else(|| OrderError::Validation(format!("{name} is out of range: {value}")))
}

fn parse_value<T: std::str::FromStr>(key: &str, value: Option<String>) -> OrderResult<Option<T>> {
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| OrderError::Validation(format!("{key} has invalid value '{v}'")))
        })
        .transpose()
}
