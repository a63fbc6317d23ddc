//! Snowflake session backend.
//!
//! Speaks the Snowflake REST session protocol over `reqwest`: a login request
//! yields a session token, statements go through query requests (with
//! `asyncExec` for detached submission), and large result sets arrive as
//! separately downloaded chunks.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::{
    ColumnInfo, DetachedExecution, LiveCursor, QueryId, Row, RowCursor, Session, SessionFactory,
    SessionId, Value,
};
use crate::config::ConnectionConfig;
use crate::error::{DetachError, Result};

/// Timeout for a single HTTP request.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Maximum number of login attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between login attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Delay between result lookups while a synchronous statement is still running.
const RESULT_POLL_INTERVAL_MS: u64 = 500;

/// Longest a synchronous statement may keep reporting itself as running.
const RESULT_WAIT_LIMIT_SECS: u64 = 5 * REQUEST_TIMEOUT_SECS;

/// Response codes meaning the statement has not finished yet.
const QUERY_IN_PROGRESS: &str = "333333";
const QUERY_IN_PROGRESS_ASYNC: &str = "333334";

const CLIENT_APP_ID: &str = "db-reattach";
const CONTENT_TYPE_SNOWFLAKE: &str = "application/snowflake";

/// Opens Snowflake sessions over one shared HTTP client.
#[derive(Debug, Clone)]
pub struct SnowflakeSessionFactory {
    client: Client,
    local_ids: Arc<AtomicU64>,
}

impl SnowflakeSessionFactory {
    /// Creates a factory with a gzip-capable HTTP client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .gzip(true)
            .build()
            .map_err(|e| DetachError::connection(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            local_ids: Arc::new(AtomicU64::new(0)),
        })
    }

    async fn login(&self, config: &ConnectionConfig, base_url: &Url) -> Result<LoginData> {
        let url = login_url(base_url, config)?;
        let body = login_body(config)?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Login attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = self
                .client
                .post(url.clone())
                .header(ACCEPT, "application/json")
                .json(&body)
                .send()
                .await;

            let is_transient = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let envelope: Envelope<LoginData> = read_json(response).await?;
                        return envelope.into_data().map_err(|e| {
                            DetachError::connection(format!("Login failed: {}", e.detail()))
                        });
                    }
                    let body = response.text().await.unwrap_or_default();
                    last_error = Some(DetachError::connection(format!(
                        "Login failed with HTTP {status}: {}",
                        body.trim()
                    )));
                    is_transient_status(status)
                }
                Err(e) => {
                    let is_transient = e.is_timeout() || e.is_connect();
                    last_error = Some(DetachError::connection(format!(
                        "Cannot reach {}: {e}",
                        base_url.host_str().unwrap_or("host")
                    )));
                    is_transient
                }
            };

            if !is_transient || attempt >= MAX_RETRY_ATTEMPTS {
                break;
            }
            warn!(
                "Login attempt {} failed (transient error), retrying in {:?}",
                attempt, delay
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        Err(last_error.unwrap_or_else(|| DetachError::connection("Login failed")))
    }
}

#[async_trait]
impl SessionFactory for SnowflakeSessionFactory {
    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>> {
        config.validate()?;
        let base_url = config.base_url()?;
        let login = self.login(config, &base_url).await?;

        // Older servers omit the session id; number those sessions locally.
        let id = SessionId(
            login
                .session_id
                .unwrap_or_else(|| self.local_ids.fetch_add(1, Ordering::Relaxed) + 1),
        );
        debug!("Logged in to {} as {id}", config.display_string());
        Ok(Box::new(SnowflakeSession {
            id,
            client: self.client.clone(),
            base_url,
            token: login.token,
            sequence: AtomicU64::new(0),
        }))
    }
}

/// One authenticated Snowflake session.
pub struct SnowflakeSession {
    id: SessionId,
    client: Client,
    base_url: Url,
    token: String,
    sequence: AtomicU64,
}

impl SnowflakeSession {
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| DetachError::internal(format!("Invalid endpoint {path}: {e}")))
    }

    fn authorization(&self) -> String {
        format!("Snowflake Token=\"{}\"", self.token)
    }

    async fn submit(&self, statement: &str, params: &[Value], async_exec: bool) -> Result<QueryData> {
        let mut url = self.endpoint("/queries/v1/query-request")?;
        url.query_pairs_mut()
            .append_pair("requestId", &Uuid::new_v4().to_string());

        let request = QueryRequest {
            sql_text: statement,
            async_exec,
            sequence_id: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            bindings: bindings(params),
        };

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.authorization())
            .header(ACCEPT, CONTENT_TYPE_SNOWFLAKE)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        let envelope: Envelope<QueryData> = read_json(response).await?;
        if async_exec {
            return envelope.into_data();
        }

        await_completion(
            envelope,
            Duration::from_secs(RESULT_WAIT_LIMIT_SECS),
            move |result_url: String| async move { self.fetch_result(&result_url).await },
        )
        .await
    }

    async fn fetch_result(&self, path: &str) -> Result<Envelope<QueryData>> {
        let response = self
            .client
            .get(self.endpoint(path)?)
            .header(AUTHORIZATION, self.authorization())
            .header(ACCEPT, CONTENT_TYPE_SNOWFLAKE)
            .send()
            .await
            .map_err(request_error)?;
        read_json(response).await
    }
}

#[async_trait]
impl Session for SnowflakeSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn execute(&self, statement: &str) -> Result<u64> {
        let data = self.submit(statement, &[], false).await?;
        Ok(affected_rows(&data))
    }

    async fn query(&self, statement: &str, params: &[Value]) -> Result<RowCursor> {
        let data = self.submit(statement, params, false).await?;
        if data
            .query_result_format
            .as_deref()
            .is_some_and(|format| format.eq_ignore_ascii_case("arrow"))
        {
            return Err(DetachError::query(
                "Server returned an Arrow result set; only JSON results are supported",
            ));
        }

        let chunks = ChunkDownloader::new(self.client.clone(), &data)?;
        Ok(data.into_cursor(chunks))
    }

    fn detached(&self) -> Option<&dyn DetachedExecution> {
        Some(self)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut url = self.endpoint("/session")?;
        url.query_pairs_mut().append_pair("delete", "true");

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.authorization())
            .header(ACCEPT, CONTENT_TYPE_SNOWFLAKE)
            .send()
            .await
            .map_err(|e| DetachError::connection(format!("Failed to close {}: {e}", self.id)))?;

        let envelope: Envelope<serde_json::Value> = read_json(response).await?;
        if !envelope.success {
            return Err(DetachError::connection(format!(
                "Failed to close {}: {}",
                self.id,
                envelope.error_message()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DetachedExecution for SnowflakeSession {
    async fn execute_detached(&self, statement: &str) -> Result<LiveCursor> {
        let data = self.submit(statement, &[], true).await?;
        let query_id = data
            .query_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DetachError::query("Response did not include a query id"))?;
        Ok(LiveCursor::new(QueryId::new(query_id), self.id))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    code: Option<String>,
    message: Option<String>,
    #[serde(default)]
    success: bool,
}

impl<T> Envelope<T> {
    fn is_in_progress(&self) -> bool {
        matches!(
            self.code.as_deref(),
            Some(QUERY_IN_PROGRESS) | Some(QUERY_IN_PROGRESS_ASYNC)
        )
    }

    fn error_message(&self) -> String {
        let message = self.message.as_deref().unwrap_or("unknown error");
        match &self.code {
            Some(code) => format!("{message} (code {code})"),
            None => message.to_string(),
        }
    }

    fn into_data(self) -> Result<T> {
        if !self.success {
            return Err(DetachError::query(self.error_message()));
        }
        self.data
            .ok_or_else(|| DetachError::query("Response contained no data"))
    }
}

/// Follows `getResultUrl` while the server reports the statement as still
/// running, for at most `limit`.
async fn await_completion<F, Fut>(
    mut envelope: Envelope<QueryData>,
    limit: Duration,
    mut fetch: F,
) -> Result<QueryData>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Envelope<QueryData>>>,
{
    let started = tokio::time::Instant::now();
    while envelope.is_in_progress() {
        let result_url = envelope
            .data
            .as_ref()
            .and_then(|data| data.get_result_url.clone())
            .ok_or_else(|| DetachError::query("Statement still running but no result URL"))?;
        if started.elapsed() >= limit {
            return Err(DetachError::query(format!(
                "Statement still running after {}s",
                limit.as_secs()
            )));
        }
        tokio::time::sleep(Duration::from_millis(RESULT_POLL_INTERVAL_MS)).await;
        envelope = fetch(result_url).await?;
    }
    envelope.into_data()
}

#[derive(Debug, Serialize)]
struct LoginRequest {
    data: LoginRequestData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct LoginRequestData {
    account_name: String,
    login_name: String,
    password: String,
    client_app_id: &'static str,
    client_app_version: &'static str,
    session_parameters: BTreeMap<&'static str, &'static str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    token: String,
    session_id: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    sql_text: &'a str,
    async_exec: bool,
    sequence_id: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    bindings: BTreeMap<String, Binding>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Binding {
    #[serde(rename = "type")]
    kind: &'static str,
    value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    scale: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chunk {
    url: String,
    row_count: Option<u64>,
}

type RawRow = Vec<Option<String>>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    query_id: Option<String>,
    get_result_url: Option<String>,
    query_result_format: Option<String>,
    #[serde(default)]
    rowtype: Vec<RowType>,
    #[serde(default)]
    rowset: Vec<RawRow>,
    #[serde(default)]
    chunks: Vec<Chunk>,
    #[serde(default)]
    chunk_headers: HashMap<String, String>,
    qrmk: Option<String>,
}

impl QueryData {
    fn into_cursor(self, downloader: ChunkDownloader) -> RowCursor {
        let columns = self
            .rowtype
            .iter()
            .map(|rt| ColumnInfo::new(rt.name.clone(), rt.kind.clone()))
            .collect();
        let types = Arc::new(self.rowtype);

        let inline_types = Arc::clone(&types);
        let inline = stream::iter(
            self.rowset
                .into_iter()
                .map(move |raw| Ok(convert_row(&inline_types, raw))),
        );

        let chunked = stream::iter(self.chunks)
            .then(move |chunk| {
                let downloader = downloader.clone();
                async move { downloader.download(&chunk).await }
            })
            .flat_map(move |downloaded| {
                let rows: Vec<Result<Row>> = match downloaded {
                    Ok(raw_rows) => raw_rows
                        .into_iter()
                        .map(|raw| Ok(convert_row(&types, raw)))
                        .collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(rows)
            });

        RowCursor::new(columns, inline.chain(chunked).boxed())
    }
}

/// Downloads result chunks from the presigned URLs in a query response.
#[derive(Debug, Clone)]
struct ChunkDownloader {
    client: Client,
    headers: HeaderMap,
}

impl ChunkDownloader {
    fn new(client: Client, data: &QueryData) -> Result<Self> {
        Ok(Self {
            client,
            headers: chunk_headers(&data.chunk_headers, data.qrmk.as_deref())?,
        })
    }

    async fn download(&self, chunk: &Chunk) -> Result<Vec<RawRow>> {
        debug!("Downloading result chunk of {:?} rows", chunk.row_count);
        let response = self
            .client
            .get(&chunk.url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DetachError::query(format!("Failed to read result chunk: {e}")))?;
        if !status.is_success() {
            return Err(DetachError::query(format!(
                "Result chunk download failed with HTTP {status}"
            )));
        }
        parse_chunk(&body)
    }
}

fn login_url(base_url: &Url, config: &ConnectionConfig) -> Result<Url> {
    let mut url = base_url
        .join("/session/v1/login-request")
        .map_err(|e| DetachError::internal(format!("Invalid login URL: {e}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("requestId", &Uuid::new_v4().to_string());
        let optional = [
            ("databaseName", &config.database),
            ("schemaName", &config.schema),
            ("warehouse", &config.warehouse),
            ("roleName", &config.role),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                pairs.append_pair(key, value);
            }
        }
    }
    Ok(url)
}

fn login_body(config: &ConnectionConfig) -> Result<LoginRequest> {
    let missing = |field: &str| DetachError::settings(format!("Missing connection parameter: {field}"));
    Ok(LoginRequest {
        data: LoginRequestData {
            account_name: config
                .account_name()
                .ok_or_else(|| missing("account"))?
                .to_string(),
            login_name: config.user.clone().ok_or_else(|| missing("user"))?,
            password: config.password.clone().ok_or_else(|| missing("password"))?,
            client_app_id: CLIENT_APP_ID,
            client_app_version: env!("CARGO_PKG_VERSION"),
            session_parameters: BTreeMap::from([("QUERY_RESULT_FORMAT", "JSON")]),
        },
    })
}

/// Builds positional bindings keyed "1", "2", ... for `?` placeholders.
fn bindings(params: &[Value]) -> BTreeMap<String, Binding> {
    params
        .iter()
        .enumerate()
        .map(|(i, value)| ((i + 1).to_string(), binding(value)))
        .collect()
}

fn binding(value: &Value) -> Binding {
    let (kind, value) = match value {
        Value::Null => ("TEXT", None),
        Value::Bool(b) => ("BOOLEAN", Some(b.to_string())),
        Value::Int(i) => ("FIXED", Some(i.to_string())),
        Value::Float(f) => ("REAL", Some(f.to_string())),
        Value::String(s) => ("TEXT", Some(s.clone())),
        Value::Bytes(bytes) => ("BINARY", Some(hex::encode(bytes))),
    };
    Binding { kind, value }
}

fn convert_row(types: &[RowType], raw: RawRow) -> Row {
    raw.into_iter()
        .enumerate()
        .map(|(i, cell)| convert_value(types.get(i), cell))
        .collect()
}

fn convert_value(row_type: Option<&RowType>, cell: Option<String>) -> Value {
    let Some(text) = cell else {
        return Value::Null;
    };
    let Some(row_type) = row_type else {
        return Value::String(text);
    };

    match row_type.kind.to_lowercase().as_str() {
        "fixed" if row_type.scale.unwrap_or(0) == 0 => {
            text.parse().map(Value::Int).unwrap_or(Value::String(text))
        }
        "real" => text.parse().map(Value::Float).unwrap_or(Value::String(text)),
        "boolean" => match text.as_str() {
            "1" | "true" | "TRUE" => Value::Bool(true),
            "0" | "false" | "FALSE" => Value::Bool(false),
            _ => Value::String(text),
        },
        "binary" => hex::decode(&text)
            .map(Value::Bytes)
            .unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

/// Chunk bodies are a comma-separated list of row arrays without the
/// enclosing brackets.
fn parse_chunk(body: &str) -> Result<Vec<RawRow>> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&format!("[{trimmed}]"))
        .map_err(|e| DetachError::query(format!("Malformed result chunk: {e}")))
}

fn chunk_headers(headers: &HashMap<String, String>, qrmk: Option<&str>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    if headers.is_empty() {
        if let Some(key) = qrmk {
            map.insert(
                "x-amz-server-side-encryption-customer-algorithm",
                HeaderValue::from_static("AES256"),
            );
            map.insert(
                "x-amz-server-side-encryption-customer-key",
                HeaderValue::from_str(key).map_err(invalid_header)?,
            );
        }
        return Ok(map);
    }

    for (name, value) in headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).map_err(invalid_header)?,
            HeaderValue::from_str(value).map_err(invalid_header)?,
        );
    }
    Ok(map)
}

fn invalid_header(e: impl std::fmt::Display) -> DetachError {
    DetachError::query(format!("Invalid chunk header: {e}"))
}

fn affected_rows(data: &QueryData) -> u64 {
    let counts_rows = data
        .rowtype
        .first()
        .is_some_and(|rt| rt.name.to_lowercase().starts_with("number of rows"));
    if !counts_rows {
        return 0;
    }
    data.rowset
        .first()
        .and_then(|row| row.first().cloned().flatten())
        .and_then(|count| count.parse().ok())
        .unwrap_or(0)
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn request_error(e: reqwest::Error) -> DetachError {
    if e.is_timeout() {
        DetachError::query("Request timed out")
    } else if e.is_connect() {
        DetachError::connection(format!("Connection lost: {e}"))
    } else {
        DetachError::query(format!("Request failed: {e}"))
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| DetachError::query(format!("Failed to read response: {e}")))?;

    if !status.is_success() {
        return Err(DetachError::query(format!(
            "Server returned HTTP {status}: {}",
            body.trim()
        )));
    }
    serde_json::from_str(&body)
        .map_err(|e| DetachError::query(format!("Failed to parse response: {e}")))
}
