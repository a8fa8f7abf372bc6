// # Datadog HTTP Client
//
// `reqwest`-backed implementation of `ApiClient` for the Datadog v1 and v2
// REST APIs.
//
// ## Responsibilities
//
// - ✅ Resolve request paths against the configured site (`api_url`)
// - ✅ Attach `DD-API-KEY` / `DD-APPLICATION-KEY` on every request
// - ✅ Parse JSON bodies (non-JSON bodies are kept as text)
// - ✅ Parse `Retry-After` / `X-RateLimit-Reset` for 429 responses
// - ❌ NO retry logic (owned by `ddprov_core::retry`)
// - ❌ NO status interpretation (owned by `ApiResponse::into_result`)
//
// ## Security Requirements
//
// - Keys NEVER appear in logs or `Debug` output
// - Keys are loaded once, by `ProviderConfig`

use async_trait::async_trait;
use ddprov_core::config::ProviderConfig;
use ddprov_core::traits::{ApiClient, ApiRequest, ApiResponse, Method};
use ddprov_core::{Error, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Per-request HTTP timeout
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the API key
const API_KEY_HEADER: &str = "DD-API-KEY";

/// Header carrying the application key
const APP_KEY_HEADER: &str = "DD-APPLICATION-KEY";

/// Seconds until the rate limit window resets
const RATE_LIMIT_RESET_HEADER: &str = "X-RateLimit-Reset";

/// HTTP client for the Datadog API
///
/// # Security
///
/// The Debug implementation does NOT expose the keys.
pub struct HttpApiClient {
    /// Shared connection pool
    client: reqwest::Client,

    /// Site root, e.g. `https://api.datadoghq.eu`
    base_url: Url,

    /// API key
    /// ⚠️ NEVER log this value
    api_key: String,

    /// Application key
    /// ⚠️ NEVER log this value
    app_key: String,
}

impl fmt::Debug for HttpApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<REDACTED>")
            .field("app_key", &"<REDACTED>")
            .finish()
    }
}

impl HttpApiClient {
    /// Create a client from the provider configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Validated provider configuration
    ///
    /// # Returns
    ///
    /// - `Ok(HttpApiClient)`: ready to send
    /// - `Err(Error::Fatal)`: the endpoint does not parse or the TLS
    ///   backend could not be initialized
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let base_url = Url::parse(config.base_url())
            .map_err(|e| Error::fatal(format!("invalid api_url {:?}: {}", config.base_url(), e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .default_headers(headers)
            .user_agent(concat!("ddprov/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::fatal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            app_key: config.app_key.clone(),
        })
    }

    /// Absolute URL for a request
    fn url_for(&self, request: &ApiRequest) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&request.path)
            .map_err(|e| Error::fatal(format!("invalid request path {:?}: {}", request.path, e)))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

fn method_of(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Wait hint from `Retry-After` (seconds) or `X-RateLimit-Reset`
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    [RETRY_AFTER.as_str(), RATE_LIMIT_RESET_HEADER]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Response body as JSON; other text is kept verbatim as a string
pub(crate) fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.url_for(request)?;
        debug!("{} {}", request.method, url.path());

        let mut builder = self
            .client
            .request(method_of(request.method), url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(APP_KEY_HEADER, &self.app_key);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                Error::fatal(format!("malformed request {}: {}", request.describe(), e))
            } else {
                Error::transient(format!("HTTP request failed for {}: {}", request.describe(), e))
            }
        })?;

        let status = response.status().as_u16();
        let after = retry_after(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::transient(format!("failed to read response body: {}", e)))?;

        debug!("{} -> {}", request.describe(), status);
        let mut parsed = ApiResponse::new(status, parse_body(&bytes));
        parsed.retry_after = after;
        Ok(parsed)
    }

    fn name(&self) -> &'static str {
        "datadog"
    }
}
