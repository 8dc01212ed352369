use thiserror::Error;

use crate::contract::TransferResult;

/// A single failed call against a log store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error_code: {code}, error_message: {message}, request_id: {request_id}")]
pub struct StoreError {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

impl StoreError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: request_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid function parameter: {message}")]
pub struct ConfigurationError {
    message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} fail, retry_time: {attempts}, {last_error}")]
pub struct ExhaustedRetryError {
    pub operation: &'static str,
    pub attempts: u32,
    pub last_error: StoreError,
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("invalid replication event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to create log store client for {endpoint}: {source}")]
    Connect { endpoint: String, source: StoreError },

    #[error("{source}")]
    ReadFailed {
        source: ExhaustedRetryError,
        partial: TransferResult,
    },

    #[error("{source}")]
    WriteFailed {
        source: ExhaustedRetryError,
        partial: TransferResult,
    },

    #[error("cursor {cursor} did not advance before reaching end cursor {end_cursor}")]
    CursorStalled {
        cursor: String,
        end_cursor: String,
        partial: TransferResult,
    },
}

impl ReplicationError {
    /// Counters accumulated before a failure that happened mid-transfer.
    pub fn partial_result(&self) -> Option<&TransferResult> {
        match self {
            Self::ReadFailed { partial, .. }
            | Self::WriteFailed { partial, .. }
            | Self::CursorStalled { partial, .. } => Some(partial),
            Self::InvalidEvent(_) | Self::Configuration(_) | Self::Connect { .. } => None,
        }
    }
}
