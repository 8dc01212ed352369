use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::error::{ConfigurationError, ExhaustedRetryError, StoreError};

pub const DEFAULT_MAX_RETRY_TIMES: u32 = 10;
pub const DEFAULT_RETRY_SLEEP_MILLIS: u64 = 50;
pub const DEFAULT_IGNORE_FAIL: bool = false;

/// How a single store call is retried and what happens once attempts run out.
///
/// The sleep between attempts is fixed, not exponential. With `ignore_fail`
/// set, exhaustion is logged and reported as [`RetryOutcome::Ignored`]
/// instead of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry_times: u32,
    pub retry_sleep: Duration,
    pub ignore_fail: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_times: DEFAULT_MAX_RETRY_TIMES,
            retry_sleep: Duration::from_millis(DEFAULT_RETRY_SLEEP_MILLIS),
            ignore_fail: DEFAULT_IGNORE_FAIL,
        }
    }
}

impl RetryPolicy {
    pub fn with_overrides(self, overrides: &RetryOverrides) -> Result<Self, ConfigurationError> {
        let policy = Self {
            max_retry_times: overrides.max_retry_times.unwrap_or(self.max_retry_times),
            retry_sleep: overrides
                .retry_sleep_millis
                .map(Duration::from_millis)
                .unwrap_or(self.retry_sleep),
            ignore_fail: overrides.ignore_fail.unwrap_or(self.ignore_fail),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_retry_times == 0 {
            return Err(ConfigurationError::new(
                "maxRetryTimes must be a positive integer",
            ));
        }
        Ok(())
    }
}

/// Per-invocation retry settings carried in `parameter.retry`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryOverrides {
    pub max_retry_times: Option<u32>,
    pub retry_sleep_millis: Option<u64>,
    pub ignore_fail: Option<bool>,
}

impl RetryOverrides {
    pub fn from_value(value: &Value) -> Result<Self, ConfigurationError> {
        let object = value
            .as_object()
            .ok_or_else(|| ConfigurationError::new("'retry' must be a JSON object"))?;

        let max_retry_times = match object.get("maxRetryTimes") {
            None | Some(Value::Null) => None,
            Some(raw) => {
                let parsed = raw.as_u64().ok_or_else(|| {
                    ConfigurationError::new("'retry.maxRetryTimes' must be an unsigned integer")
                })?;
                Some(u32::try_from(parsed).map_err(|_| {
                    ConfigurationError::new("'retry.maxRetryTimes' is too large")
                })?)
            }
        };

        let retry_sleep_millis = match object.get("retrySleepMillis") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(raw.as_u64().ok_or_else(|| {
                ConfigurationError::new("'retry.retrySleepMillis' must be an unsigned integer")
            })?),
        };

        let ignore_fail = match object.get("ignoreFail") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                raw.as_bool()
                    .ok_or_else(|| ConfigurationError::new("'retry.ignoreFail' must be boolean"))?,
            ),
        };

        Ok(Self {
            max_retry_times,
            retry_sleep_millis,
            ignore_fail,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Completed(T),
    /// Attempts ran out and the policy swallowed the failure.
    Ignored(ExhaustedRetryError),
}

/// Runs `call` until it succeeds or `policy.max_retry_times` attempts have
/// been made. `call` receives the 1-based attempt number.
///
/// Intermediate failures are logged at warn level, ignored exhaustion at
/// error level. Fatal exhaustion is returned to the caller unlogged.
pub fn run_with_retry<T, F>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<RetryOutcome<T>, ExhaustedRetryError>
where
    F: FnMut(u32) -> Result<T, StoreError>,
{
    let max_attempts = policy.max_retry_times.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let error = match call(attempt) {
            Ok(value) => return Ok(RetryOutcome::Completed(value)),
            Err(error) => error,
        };

        if attempt >= max_attempts {
            let exhausted = ExhaustedRetryError {
                operation,
                attempts: attempt,
                last_error: error,
            };
            if !policy.ignore_fail {
                return Err(exhausted);
            }
            tracing::error!(
                operation,
                retry_time = attempt,
                error_code = %exhausted.last_error.code,
                error_message = %exhausted.last_error.message,
                request_id = %exhausted.last_error.request_id,
                "{operation} fail and ignore the fail"
            );
            return Ok(RetryOutcome::Ignored(exhausted));
        }

        tracing::warn!(
            operation,
            retry_time = attempt,
            error_code = %error.code,
            error_message = %error.message,
            request_id = %error.request_id,
            "{operation} fail"
        );

        if !policy.retry_sleep.is_zero() {
            thread::sleep(policy.retry_sleep);
        }
    }
}
