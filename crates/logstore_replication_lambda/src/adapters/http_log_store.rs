use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::log_store::{LogStoreConnector, SourceLogStore, TargetLogStore};
use crate::runtime::contract::{
    BatchGetLogRequest, BatchPage, Cursor, ExecutionCredentials, LogGroupRecord, PutLogsRequest,
};
use crate::runtime::error::StoreError;

pub const NEXT_CURSOR_HEADER: &str = "x-log-cursor";
pub const RAW_SIZE_HEADER: &str = "x-log-bodyrawsize";
pub const REQUEST_ID_HEADER: &str = "x-log-requestid";
pub const SECURITY_TOKEN_HEADER: &str = "x-log-security-token";

pub const REQUEST_ERROR_CODE: &str = "RequestError";
pub const INVALID_RESPONSE_CODE: &str = "InvalidResponse";
pub const INVALID_ENDPOINT_CODE: &str = "InvalidEndpoint";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
enum PageDecodeError {
    #[error("missing x-log-cursor header")]
    MissingCursor,

    #[error("log group {index} payload is not valid base64: {source}")]
    Payload {
        index: usize,
        source: base64::DecodeError,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetLogBody {
    #[serde(default)]
    log_groups: Vec<WireLogGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLogGroup {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    source: Option<String>,
    log_count: u64,
    payload: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogsBody<'a> {
    topic: &'a str,
    source: &'a str,
    log_count: u64,
    payload: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: String,
    #[serde(default)]
    error_message: String,
}

/// Hands out endpoint-bound clients that share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpLogStoreConnector {
    http: reqwest::Client,
    credentials: ExecutionCredentials,
}

impl HttpLogStoreConnector {
    pub fn new(credentials: ExecutionCredentials) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self { http, credentials })
    }

    /// Bare hosts such as `cn-hangzhou.log.example.com` are reached over https.
    fn client(&self, endpoint: &str) -> Result<HttpLogStoreClient, StoreError> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if endpoint.is_empty() || endpoint.contains("://") {
            return Err(StoreError::new(
                INVALID_ENDPOINT_CODE,
                format!("endpoint '{endpoint}' must be a host or an http(s) url"),
                "",
            ));
        } else {
            format!("https://{endpoint}")
        };
        Ok(HttpLogStoreClient {
            http: self.http.clone(),
            endpoint,
            credentials: self.credentials.clone(),
        })
    }
}

impl LogStoreConnector for HttpLogStoreConnector {
    fn connect_source(&self, endpoint: &str) -> Result<Box<dyn SourceLogStore + '_>, StoreError> {
        Ok(Box::new(self.client(endpoint)?))
    }

    fn connect_target(&self, endpoint: &str) -> Result<Box<dyn TargetLogStore + '_>, StoreError> {
        Ok(Box::new(self.client(endpoint)?))
    }
}

/// Log-store client bound to one endpoint.
///
/// The store traits are synchronous; each call bridges onto the ambient
/// multi-threaded Tokio runtime with `block_in_place`.
#[derive(Debug, Clone)]
pub struct HttpLogStoreClient {
    http: reqwest::Client,
    endpoint: String,
    credentials: ExecutionCredentials,
}

impl HttpLogStoreClient {
    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.basic_auth(
            &self.credentials.access_key_id,
            Some(&self.credentials.access_key_secret),
        );
        match &self.credentials.security_token {
            Some(token) => builder.header(SECURITY_TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn fetch_page(&self, request: &BatchGetLogRequest<'_>) -> Result<BatchPage, StoreError> {
        let url = shard_url(
            &self.endpoint,
            request.project,
            request.logstore,
            &request.shard_id.to_string(),
        );
        let count = request.count.to_string();
        let response = self
            .authorized(self.http.get(url))
            .query(&[
                ("type", "log"),
                ("cursor", request.cursor.as_str()),
                ("end_cursor", request.end_cursor.as_str()),
                ("count", count.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let request_id = header_value(response.headers(), REQUEST_ID_HEADER).unwrap_or_default();
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(store_error_from_response(status.as_u16(), &request_id, &body));
        }

        let next_cursor = header_value(response.headers(), NEXT_CURSOR_HEADER);
        let raw_size = header_value(response.headers(), RAW_SIZE_HEADER)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        let body: BatchGetLogBody = response.json().await.map_err(|error| {
            StoreError::new(
                INVALID_RESPONSE_CODE,
                format!("failed to decode BatchGetLog body: {error}"),
                request_id.clone(),
            )
        })?;

        decode_page(body, next_cursor, raw_size).map_err(|error| {
            StoreError::new(INVALID_RESPONSE_CODE, error.to_string(), request_id)
        })
    }

    async fn send_logs(&self, request: &PutLogsRequest<'_>) -> Result<(), StoreError> {
        let url = shard_url(&self.endpoint, request.project, request.logstore, "lb");
        let body = PutLogsBody {
            topic: request.topic,
            source: request.source,
            log_count: request.log_count,
            payload: STANDARD.encode(request.payload),
        };
        let response = self
            .authorized(self.http.post(url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let request_id = header_value(response.headers(), REQUEST_ID_HEADER).unwrap_or_default();
        let body = response.text().await.unwrap_or_default();
        Err(store_error_from_response(status.as_u16(), &request_id, &body))
    }
}

impl SourceLogStore for HttpLogStoreClient {
    fn batch_get_log(&self, request: &BatchGetLogRequest<'_>) -> Result<BatchPage, StoreError> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.fetch_page(request))
        })
    }
}

impl TargetLogStore for HttpLogStoreClient {
    fn put_logs(&self, request: &PutLogsRequest<'_>) -> Result<(), StoreError> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.send_logs(request))
        })
    }
}

fn shard_url(endpoint: &str, project: &str, logstore: &str, shard: &str) -> String {
    format!("{endpoint}/projects/{project}/logstores/{logstore}/shards/{shard}")
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn transport_error(error: reqwest::Error) -> StoreError {
    StoreError::new(REQUEST_ERROR_CODE, error.to_string(), "")
}

fn store_error_from_response(status: u16, request_id: &str, body: &str) -> StoreError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => StoreError::new(parsed.error_code, parsed.error_message, request_id),
        Err(_) => StoreError::new(format!("HTTP{status}"), body.trim(), request_id),
    }
}

fn decode_page(
    body: BatchGetLogBody,
    next_cursor: Option<String>,
    raw_size: u64,
) -> Result<BatchPage, PageDecodeError> {
    let next_cursor = next_cursor.ok_or(PageDecodeError::MissingCursor)?;

    let records = body
        .log_groups
        .into_iter()
        .enumerate()
        .map(|(index, group)| {
            let payload = STANDARD
                .decode(group.payload.as_bytes())
                .map_err(|source| PageDecodeError::Payload { index, source })?;
            Ok(LogGroupRecord {
                topic: group.topic,
                source: group.source,
                log_count: group.log_count,
                payload,
            })
        })
        .collect::<Result<Vec<_>, PageDecodeError>>()?;

    Ok(BatchPage {
        records,
        raw_size,
        next_cursor: Cursor::new(next_cursor),
    })
}
