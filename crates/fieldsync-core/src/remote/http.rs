//! REST client implementing the remote endpoint contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::{RemoteEndpoint, RemoteMethod, RemoteOutcome, RemoteRequest};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote endpoint configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote HTTP client failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// `RemoteEndpoint` speaking JSON over HTTP
///
/// Create maps to `POST {base}/{entity}`, update to `PUT {base}/{entity}/{id}`,
/// delete to `DELETE {base}/{entity}/{id}`. `409` and `412` are conflicts.
#[derive(Clone)]
pub struct HttpRemoteEndpoint {
    base_url: Url,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteEndpoint {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteEndpoint")
            .field("base_url", &self.base_url.as_str())
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteEndpoint {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            auth_token: normalize_text_option(auth_token),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    fn request_url(&self, request: &RemoteRequest) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                RemoteError::InvalidConfiguration("base URL cannot carry a path".to_string())
            })?;
            segments.pop_if_empty().push(&request.entity);
            if request.method != RemoteMethod::Post {
                if let Some(record_id) = &request.record_id {
                    segments.push(record_id);
                }
            }
        }
        Ok(url)
    }

    async fn dispatch(&self, request: &RemoteRequest) -> RemoteResult<RemoteOutcome> {
        let url = self.request_url(request)?;
        let mut builder = match request.method {
            RemoteMethod::Post => self.client.post(url).json(&request.body),
            RemoteMethod::Put => self.client.put(url).json(&request.body),
            RemoteMethod::Delete => self.client.delete(url),
        }
        .header(reqwest::header::ACCEPT, "application/json");

        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        if request.force {
            builder = builder
                .header(reqwest::header::IF_MATCH, "*")
                .header("X-Sync-Force", "true");
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(RemoteOutcome::Accepted);
        }

        let body = response.text().await.unwrap_or_default();
        if matches!(status, StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED) {
            return Ok(RemoteOutcome::Conflict {
                remote: extract_remote_record(&body),
            });
        }

        Ok(RemoteOutcome::Failed {
            message: parse_api_error(status, &body),
        })
    }
}

#[async_trait]
impl RemoteEndpoint for HttpRemoteEndpoint {
    async fn send(&self, request: &RemoteRequest) -> RemoteOutcome {
        match self.dispatch(request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::debug!(
                    method = request.method.label(),
                    entity = %request.entity,
                    "Remote request failed: {error}"
                );
                RemoteOutcome::Failed {
                    message: error.to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<RemoteErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

/// Current remote record from a conflict response.
///
/// Servers may wrap the record as `{"current": ...}` or `{"remote": ...}`;
/// otherwise the whole body is the record.
fn extract_remote_record(body: &str) -> Value {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return if body.trim().is_empty() {
            Value::Null
        } else {
            Value::String(compact_text(body))
        };
    };

    match value {
        Value::Object(mut fields) => {
            if let Some(record) = fields.remove("current").or_else(|| fields.remove("remote")) {
                record
            } else {
                Value::Object(fields)
            }
        }
        other => other,
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<Url> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if !is_http_url(&endpoint) {
        return Err(RemoteError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ));
    }
    Url::parse(endpoint.trim_end_matches('/'))
        .map_err(|error| RemoteError::InvalidConfiguration(error.to_string()))
}
