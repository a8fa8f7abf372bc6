// # API Client Trait
//
// Defines the interface for sending requests to the remote REST API.
//
// ## Purpose
//
// Lifecycle handlers never talk HTTP directly. They describe a request
// (method, path, query, JSON body) and hand it to an `ApiClient`. The
// concrete client owns the transport, the base URL and the credentials.
//
// ## Implementations
//
// - `ddprov-datadog`: `HttpApiClient` (reqwest)
// - Tests: in-memory fakes
//
// ## Usage
//
// ```rust,ignore
// use ddprov_core::{ApiRequest, OpContext};
//
// let body = ctx.call_json(ApiRequest::get("/api/v1/monitor/42")).await?;
// ```

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single API request
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path below the API base URL, starting with `/api/`
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, None)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path, Some(body))
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path, Some(body))
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path, Some(body))
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path, None)
    }

    /// Attach a JSON body (DELETE requests with payloads)
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// `METHOD /path` for logs
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Raw response, before status classification
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed JSON body, or a JSON string holding a non-JSON body; `Null` when empty
    pub body: Value,
    /// Parsed `Retry-After` header
    pub retry_after: Option<Duration>,
}

impl ApiResponse {
    /// Response with a JSON body
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            retry_after: None,
        }
    }

    /// 200 with a body
    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    /// 204 without a body
    pub fn no_content() -> Self {
        Self::new(204, Value::Null)
    }

    pub fn with_retry_after(mut self, after: Duration) -> Self {
        self.retry_after = Some(after);
        self
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body rendered as text for error messages
    pub fn body_text(&self) -> String {
        match &self.body {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Map the status code onto the error taxonomy
    ///
    /// - 2xx: ok
    /// - 404: `RemoteNotFound`
    /// - 401/403: `Fatal`
    /// - 409: `Conflict`
    /// - 429: `RateLimited` (with Retry-After)
    /// - 5xx: `Transient`
    /// - other 4xx: `RemoteRejected` with the body verbatim
    pub fn into_result(self) -> Result<ApiResponse> {
        let body = self.body_text();
        match self.status {
            200..=299 => Ok(self),
            404 => Err(Error::not_found(body)),
            401 | 403 => Err(Error::fatal(format!(
                "authentication failed ({}): {}",
                self.status, body
            ))),
            409 => Err(Error::conflict(body, None)),
            429 => Err(Error::RateLimited {
                message: body,
                retry_after: self.retry_after,
            }),
            500..=599 => Err(Error::transient(format!("server error ({}): {}", self.status, body))),
            status => Err(Error::rejected(status, body)),
        }
    }
}

/// Trait for API client implementations
///
/// A client sends exactly one request per call. Status classification,
/// retries and cancellation are layered on top by the core (see
/// [`crate::retry`]); a client never retries on its own.
///
/// # Thread Safety
///
/// Clients are shared across concurrently running handlers and must be
/// safe to call from many tasks at once.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform network I/O for the request it was given
/// - ✅ Attach credentials and headers
/// - ✅ Parse the response body as JSON
///
/// ## Forbidden Capabilities
/// - ❌ Retry or sleep (owned by the retry loop)
/// - ❌ Interpret status codes beyond transport failures
/// - ❌ Cache responses
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Send one request
    ///
    /// # Returns
    ///
    /// - `Ok(ApiResponse)`: the server answered, with any status code
    /// - `Err(Error::Transient)`: transport failure (connect, timeout, reset)
    /// - `Err(Error::Fatal)`: the endpoint itself is malformed
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;

    /// Client name for logs
    fn name(&self) -> &'static str {
        "api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_classification() {
        assert!(ApiResponse::ok(json!({})).into_result().is_ok());
        assert!(ApiResponse::new(404, json!({"errors": ["Not found"]})).into_result().unwrap_err().is_not_found());
        assert!(ApiResponse::new(403, Value::Null).into_result().unwrap_err().is_fatal());
        assert!(ApiResponse::new(502, Value::Null).into_result().unwrap_err().is_retryable());

        match ApiResponse::new(400, json!({"errors": ["bad query"]})).into_result() {
            Err(Error::RemoteRejected { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, r#"{"errors":["bad query"]}"#);
            }
            other => panic!("unexpected: {:?}", other),
        }

        match ApiResponse::new(429, Value::Null)
            .with_retry_after(Duration::from_secs(3))
            .into_result()
        {
            Err(Error::RateLimited { retry_after, .. }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(3)))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_request_builders() {
        let req = ApiRequest::delete("/api/v1/monitor/1").with_query("force", "true");
        assert_eq!(req.describe(), "DELETE /api/v1/monitor/1");
        assert_eq!(req.query, vec![("force".to_string(), "true".to_string())]);
        assert!(req.body.is_none());
    }
}
