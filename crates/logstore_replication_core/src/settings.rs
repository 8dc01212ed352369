use std::time::Duration;

use crate::error::ConfigurationError;
use crate::retry::RetryPolicy;

pub const DEFAULT_PAGE_SIZE_HINT: u32 = 3;

pub const MAX_RETRY_TIMES_ENV: &str = "LOGSTORE_REPLICATION_MAX_RETRY_TIMES";
pub const RETRY_SLEEP_MILLIS_ENV: &str = "LOGSTORE_REPLICATION_RETRY_SLEEP_MILLIS";
pub const IGNORE_FAIL_ENV: &str = "LOGSTORE_REPLICATION_IGNORE_FAIL";
pub const PAGE_SIZE_ENV: &str = "LOGSTORE_REPLICATION_PAGE_SIZE";

/// Deployment-wide defaults; per-invocation retry overrides are applied on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationSettings {
    pub retry: RetryPolicy,
    /// Number of log groups requested per read.
    pub page_size_hint: u32,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            page_size_hint: DEFAULT_PAGE_SIZE_HINT,
        }
    }
}

impl ReplicationSettings {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let defaults = Self::default();

        let max_retry_times = match lookup(MAX_RETRY_TIMES_ENV) {
            Some(raw) => parse_number::<u32>(MAX_RETRY_TIMES_ENV, &raw)?,
            None => defaults.retry.max_retry_times,
        };
        let retry_sleep = match lookup(RETRY_SLEEP_MILLIS_ENV) {
            Some(raw) => Duration::from_millis(parse_number::<u64>(RETRY_SLEEP_MILLIS_ENV, &raw)?),
            None => defaults.retry.retry_sleep,
        };
        let ignore_fail = match lookup(IGNORE_FAIL_ENV) {
            Some(raw) => parse_flag(IGNORE_FAIL_ENV, &raw)?,
            None => defaults.retry.ignore_fail,
        };
        let page_size_hint = match lookup(PAGE_SIZE_ENV) {
            Some(raw) => parse_number::<u32>(PAGE_SIZE_ENV, &raw)?,
            None => defaults.page_size_hint,
        };

        if page_size_hint == 0 {
            return Err(ConfigurationError::new(format!(
                "{PAGE_SIZE_ENV} must be a positive integer"
            )));
        }

        let retry = RetryPolicy {
            max_retry_times,
            retry_sleep,
            ignore_fail,
        };
        retry.validate()?;

        Ok(Self {
            retry,
            page_size_hint,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigurationError> {
    raw.trim().parse::<T>().map_err(|_| {
        ConfigurationError::new(format!("{key} must be an unsigned integer, got '{raw}'"))
    })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigurationError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigurationError::new(format!(
            "{key} must be true or false, got '{raw}'"
        ))),
    }
}
