//! REST plumbing shared by the chat room, private chat, and notice channels.
//!
//! Every community endpoint answers with a JSON envelope carrying a numeric
//! `code` (0 on success) and a `msg`. [`ApiTransport`] is the seam the channels
//! call through; [`HttpTransport`] is the `reqwest` implementation.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::{REFERER, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::RealtimeDefaults;
use crate::retry::{retry_async, RetryPolicy};

const ERROR_BODY_SNIPPET_LEN: usize = 220;
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/69.0.3497.100 Safari/537.36";

/// One REST call, relative to the configured base URL.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    /// Appends a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// True for requests that are safe to repeat after an ambiguous failure.
    pub fn is_idempotent(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD)
    }

    /// Returns the value of the first query parameter named `key`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Executes REST calls and yields the decoded response body.
///
/// Bodies that are not JSON come back as [`Value::String`].
pub trait ApiTransport: Send + Sync + 'static {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'static, Result<Value, ApiError>>;
}

/// Options for [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct HttpTransportOptions {
    pub connect_timeout: Duration,
    pub attempt_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for HttpTransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: RealtimeDefaults::REST_CONNECT_TIMEOUT,
            attempt_timeout: RealtimeDefaults::REST_ATTEMPT_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// `reqwest`-backed REST transport with bounded retries.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: Client,
    base_url: String,
    attempt_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        retry_policy: RetryPolicy,
    ) -> Result<Self, reqwest::Error> {
        Self::with_options(
            base_url,
            HttpTransportOptions {
                retry_policy,
                ..HttpTransportOptions::default()
            },
        )
    }

    pub fn with_options(
        base_url: impl Into<String>,
        options: HttpTransportOptions,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            http,
            base_url,
            attempt_timeout: options.attempt_timeout,
            retry_policy: options.retry_policy,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let endpoint = self.endpoint(&request.path);
        let policy = self.policy_for(&request);

        retry_async(
            &policy,
            |attempt| {
                let endpoint = endpoint.clone();
                let request = request.clone();
                async move {
                    debug!(
                        event = "rest_request",
                        method = %request.method,
                        path = %request.path,
                        attempt
                    );
                    self.send_attempt(&endpoint, &request).await
                }
            },
            ApiError::is_retryable,
        )
        .await
    }

    /// Writes are sent once: a timed-out POST may already have been applied.
    fn policy_for(&self, request: &ApiRequest) -> RetryPolicy {
        if request.is_idempotent() {
            return self.retry_policy.clone();
        }
        RetryPolicy {
            max_attempts: 1,
            ..self.retry_policy.clone()
        }
    }

    async fn send_attempt(&self, endpoint: &str, request: &ApiRequest) -> Result<Value, ApiError> {
        let mut builder = self
            .http
            .request(request.method.clone(), endpoint)
            .timeout(self.attempt_timeout)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(REFERER, self.base_url.as_str());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(ApiError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(ApiError::Transport)?;

        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        Ok(parse_body(body))
    }
}

impl ApiTransport for HttpTransport {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'static, Result<Value, ApiError>> {
        let transport = self.clone();
        Box::pin(async move { transport.send(request).await })
    }
}

/// Thin handle used by the channels to issue REST calls.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn ApiTransport>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn ApiTransport>) -> Self {
        Self { transport }
    }

    /// Executes `request` and returns the body as-is.
    pub async fn call(&self, request: ApiRequest) -> Result<Value, ApiError> {
        self.transport.execute(request).await
    }

    /// Executes `request` and fails when the envelope carries a non-zero code.
    pub async fn call_checked(&self, request: ApiRequest) -> Result<Value, ApiError> {
        check_code(self.call(request).await?)
    }

    /// Executes `request` and decodes its `data` field.
    pub async fn call_data<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, ApiError> {
        decode_data(self.call_checked(request).await?)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient").finish_non_exhaustive()
    }
}

/// Errors produced by REST calls.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    /// The envelope carried `code != 0`; a rejected API key lands here too.
    #[error("api rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Rejected { .. } | Self::Parse(_) | Self::Json(_) => false,
        }
    }
}

/// Fails with [`ApiError::Rejected`] when `value.code` is present and non-zero.
pub fn check_code(value: Value) -> Result<Value, ApiError> {
    let code = match value.get("code") {
        Some(Value::Number(number)) => number.as_i64().unwrap_or(-1),
        Some(Value::String(text)) => text.trim().parse().unwrap_or(-1),
        _ => return Ok(value),
    };
    if code == 0 {
        return Ok(value);
    }

    let message = value
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown failure")
        .to_string();
    Err(ApiError::Rejected { code, message })
}

/// Decodes the `data` field of a checked envelope.
pub fn decode_data<T: DeserializeOwned>(mut value: Value) -> Result<T, ApiError> {
    let data = value
        .get_mut("data")
        .map(Value::take)
        .ok_or_else(|| ApiError::Parse("response is missing data".to_string()))?;
    Ok(serde_json::from_value(data)?)
}

fn parse_body(body: String) -> Value {
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, serde::Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        msg: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.msg.or(parsed.message).or(parsed.error) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
