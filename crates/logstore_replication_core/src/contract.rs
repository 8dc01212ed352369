use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{ConfigurationError, ReplicationError};
use crate::retry::RetryOverrides;

pub const TARGET_FIELD_NAME: &str = "target";
pub const RETRY_FIELD_NAME: &str = "retry";
pub const ENDPOINT_FIELD_NAME: &str = "endpoint";
pub const PROJECT_FIELD_NAME: &str = "projectName";
pub const LOGSTORE_FIELD_NAME: &str = "logstoreName";

/// Opaque position inside a shard. Only the source store knows how to advance it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub endpoint: String,
    pub project_name: String,
    pub logstore_name: String,
    pub shard_id: u32,
    pub begin_cursor: Cursor,
    pub end_cursor: Cursor,
}

/// Trigger event handed to the function by the log service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationEvent {
    pub source: SourceDescriptor,
    #[serde(default)]
    pub parameter: Value,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub cursor_time: Option<i64>,
}

impl ReplicationEvent {
    pub fn from_value(value: Value) -> Result<Self, ReplicationError> {
        serde_json::from_value(value)
            .map_err(|error| ReplicationError::InvalidEvent(error.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetDescriptor {
    pub endpoint: String,
    pub project_name: String,
    pub logstore_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationParameter {
    pub target: TargetDescriptor,
    pub retry: RetryOverrides,
}

/// Extracts the destination descriptor and optional retry overrides from the
/// event's `parameter` object.
pub fn parse_parameter(parameter: &Value) -> Result<ReplicationParameter, ConfigurationError> {
    let object = parameter
        .as_object()
        .ok_or_else(|| ConfigurationError::new("parameter must be a JSON object"))?;

    let target = object
        .get(TARGET_FIELD_NAME)
        .ok_or_else(|| ConfigurationError::new(format!("'{TARGET_FIELD_NAME}' is required")))?
        .as_object()
        .ok_or_else(|| {
            ConfigurationError::new(format!("'{TARGET_FIELD_NAME}' must be a JSON object"))
        })?;

    let target = TargetDescriptor {
        endpoint: required_string(target, ENDPOINT_FIELD_NAME)?,
        project_name: required_string(target, PROJECT_FIELD_NAME)?,
        logstore_name: required_string(target, LOGSTORE_FIELD_NAME)?,
    };

    let retry = match object.get(RETRY_FIELD_NAME) {
        None | Some(Value::Null) => RetryOverrides::default(),
        Some(value) => RetryOverrides::from_value(value)?,
    };

    Ok(ReplicationParameter { target, retry })
}

fn required_string(
    object: &Map<String, Value>,
    name: &str,
) -> Result<String, ConfigurationError> {
    let value = object.get(name).ok_or_else(|| {
        ConfigurationError::new(format!("'{TARGET_FIELD_NAME}.{name}' is required"))
    })?;
    let Some(raw) = value.as_str() else {
        return Err(ConfigurationError::new(format!(
            "'{TARGET_FIELD_NAME}.{name}' must be a string"
        )));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigurationError::new(format!(
            "'{TARGET_FIELD_NAME}.{name}' cannot be empty"
        )));
    }
    Ok(trimmed.to_string())
}

/// Credentials issued to the running function by its host.
#[derive(Clone, PartialEq, Eq)]
pub struct ExecutionCredentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub security_token: Option<String>,
}

impl fmt::Debug for ExecutionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field(
                "security_token",
                &self.security_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// One log group as read from the source shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogGroupRecord {
    pub topic: Option<String>,
    pub source: Option<String>,
    pub log_count: u64,
    pub payload: Vec<u8>,
}

impl LogGroupRecord {
    pub fn byte_len(&self) -> u64 {
        self.payload.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPage {
    pub records: Vec<LogGroupRecord>,
    pub raw_size: u64,
    pub next_cursor: Cursor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchGetLogRequest<'a> {
    pub project: &'a str,
    pub logstore: &'a str,
    pub shard_id: u32,
    pub count: u32,
    pub cursor: &'a Cursor,
    pub end_cursor: &'a Cursor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutLogsRequest<'a> {
    pub project: &'a str,
    pub logstore: &'a str,
    pub topic: &'a str,
    pub source: &'a str,
    pub log_count: u64,
    pub payload: &'a [u8],
}

impl<'a> PutLogsRequest<'a> {
    /// Absent tags become empty strings so the target always receives a value.
    pub fn for_record(target: &'a TargetDescriptor, record: &'a LogGroupRecord) -> Self {
        Self {
            project: &target.project_name,
            logstore: &target.logstore_name,
            topic: record.topic.as_deref().unwrap_or(""),
            source: record.source.as_deref().unwrap_or(""),
            log_count: record.log_count,
            payload: &record.payload,
        }
    }
}

/// Function output: bytes and lines read from the source and written to the target.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub ingest_bytes: u64,
    pub ingest_lines: u64,
    pub ship_bytes: u64,
    pub ship_lines: u64,
}

impl TransferResult {
    pub fn record_ingested(&mut self, record: &LogGroupRecord) {
        self.ingest_bytes += record.byte_len();
        self.ingest_lines += record.log_count;
    }

    pub fn record_shipped(&mut self, record: &LogGroupRecord) {
        self.ship_bytes += record.byte_len();
        self.ship_lines += record.log_count;
    }

    pub fn is_complete(&self) -> bool {
        self.ingest_bytes == self.ship_bytes && self.ingest_lines == self.ship_lines
    }
}

#[derive(Serialize)]
struct FingerprintPayload<'a> {
    source: &'a SourceDescriptor,
    target: &'a TargetDescriptor,
}

/// Stable digest of what an invocation copies, used to correlate redeliveries.
pub fn invocation_fingerprint(source: &SourceDescriptor, target: &TargetDescriptor) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json(&FingerprintPayload { source, target }));
    format!("{:x}", hasher.finalize())
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).unwrap_or_default()
}
