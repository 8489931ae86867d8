//! Boundary adapter for the upstream agent service.
//!
//! [`UpstreamGateway::send`] never fails: timeouts, transport errors, HTTP
//! error statuses and caller cancellation all come back as terminal
//! envelopes. The outbound call races a timer; whichever side loses is
//! dropped, which aborts the in-flight request rather than leaving it to run.

use std::error::Error as StdError;
use std::fmt;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::QueryRequest;
use crate::core::envelope::Envelope;
use crate::core::normalize::normalize;
use crate::utils::url::route_url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const QUERY_ROUTE: &str = "query";
const HEALTH_ROUTE: &str = "health";
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
const MAX_ERROR_DETAIL_CHARS: usize = 500;

/// What came back from a completed exchange.
#[derive(Debug)]
enum UpstreamReply {
    Json(Value),
    Text(String),
    HttpError { status: StatusCode, body: String },
}

#[derive(Debug)]
enum ExchangeError {
    Transport(reqwest::Error),
    BodyTooLarge { limit: usize },
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::Transport(err) => {
                write!(f, "{err}")?;
                let mut source = err.source();
                while let Some(cause) = source {
                    write!(f, ": {cause}")?;
                    source = cause.source();
                }
                Ok(())
            }
            ExchangeError::BodyTooLarge { limit } => {
                write!(f, "response body exceeded {limit} bytes")
            }
        }
    }
}

impl StdError for ExchangeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ExchangeError::Transport(err) => Some(err),
            ExchangeError::BodyTooLarge { .. } => None,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Transport(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub reachable: bool,
    pub status: Option<String>,
    pub agent_available: Option<bool>,
    pub detail: Option<String>,
}

/// Stateless and reentrant; clone it freely, the HTTP client is shared.
#[derive(Clone, Debug)]
pub struct UpstreamGateway {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl UpstreamGateway {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn query_url(&self) -> String {
        route_url(&self.endpoint, QUERY_ROUTE)
    }

    pub fn health_url(&self) -> String {
        route_url(&self.endpoint, HEALTH_ROUTE)
    }

    pub async fn send(&self, request: &QueryRequest) -> Envelope {
        self.send_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`send`](Self::send), but gives up early once `cancel` fires.
    pub async fn send_with_cancel(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Envelope {
        let started = Instant::now();
        debug!(
            user_id = %request.user_id,
            generate_image = request.generate_image,
            url = %self.query_url(),
            "Sending upstream query"
        );

        let envelope = tokio::select! {
            outcome = self.exchange(request) => envelope_from_outcome(outcome, &request.message),
            _ = tokio::time::sleep(self.timeout) => {
                warn!(
                    user_id = %request.user_id,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Upstream query timed out"
                );
                Envelope::timeout(&request.message)
            }
            _ = cancel.cancelled() => {
                debug!(user_id = %request.user_id, "Upstream query cancelled by caller");
                Envelope::cancelled(&request.message)
            }
        };

        debug!(
            status = %envelope.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Upstream query finished"
        );
        envelope
    }

    pub async fn health(&self) -> HealthReport {
        let outcome = self
            .client
            .get(self.health_url())
            .timeout(self.timeout)
            .send()
            .await;

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                return HealthReport {
                    reachable: false,
                    status: None,
                    agent_available: None,
                    detail: Some(ExchangeError::from(err).to_string()),
                }
            }
        };

        let http_status = response.status();
        let body: Option<Value> = response.json().await.ok();
        let field = |key: &str| body.as_ref().and_then(|value| value.get(key));
        HealthReport {
            reachable: true,
            status: field("status")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some(http_status.to_string())),
            agent_available: field("agent_available").and_then(Value::as_bool),
            detail: field("service")
                .or_else(|| field("message"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    async fn exchange(&self, request: &QueryRequest) -> Result<UpstreamReply, ExchangeError> {
        let response = self
            .client
            .post(self.query_url())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let declared_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(is_json_content_type);

        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > MAX_BODY_BYTES {
                return Err(ExchangeError::BodyTooLarge {
                    limit: MAX_BODY_BYTES,
                });
            }
            body.extend_from_slice(&chunk);
        }
        let text = String::from_utf8_lossy(&body).into_owned();

        if !status.is_success() {
            return Ok(UpstreamReply::HttpError { status, body: text });
        }
        if declared_json {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                return Ok(UpstreamReply::Json(value));
            }
            debug!("Upstream declared JSON but the body did not parse; treating as text");
        }
        Ok(UpstreamReply::Text(text))
    }
}

fn envelope_from_outcome(
    outcome: Result<UpstreamReply, ExchangeError>,
    original_query: &str,
) -> Envelope {
    match outcome {
        Ok(UpstreamReply::Json(value)) => normalize(&value, original_query),
        Ok(UpstreamReply::Text(text)) => Envelope::from_text(original_query, &text),
        Ok(UpstreamReply::HttpError { status, body }) => {
            warn!(status = %status, "Upstream returned an error status");
            Envelope::upstream_error(original_query, &describe_http_error(status, &body))
        }
        Err(err) => {
            warn!(error = %err, "Upstream transport failure");
            Envelope::network_error(original_query, &err.to_string())
        }
    }
}

fn is_json_content_type(value: &str) -> bool {
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| value.get("error").and_then(Value::as_str))
        .or_else(|| value.get("detail").and_then(Value::as_str))
        .or_else(|| value.get("message").and_then(Value::as_str))?;

    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn describe_http_error(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {status}");
    }

    if let Some(summary) = serde_json::from_str::<Value>(trimmed)
        .ok()
        .as_ref()
        .and_then(extract_error_summary)
    {
        return format!("HTTP {status}: {summary}");
    }

    let excerpt: String = trimmed.chars().take(MAX_ERROR_DETAIL_CHARS).collect();
    if excerpt.len() < trimmed.len() {
        format!("HTTP {status}: {excerpt}…")
    } else {
        format!("HTTP {status}: {excerpt}")
    }
}

#[cfg(test)]
mod tests;
