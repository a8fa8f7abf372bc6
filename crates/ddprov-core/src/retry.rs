//! Retry loop for API calls
//!
//! Every request goes through [`execute`], which classifies the response,
//! retries transient failures (5xx, transport errors) with exponential
//! backoff, honours `Retry-After` on 429, and gives up once the next sleep
//! would cross the total retry timeout. Both the request and every sleep
//! race the operation's cancellation token.

use crate::error::{Error, Result};
use crate::traits::{ApiClient, ApiRequest, ApiResponse};
use exponential_backoff::Backoff;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound for a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry settings derived from the provider configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    timeout: Duration,
    max_retries: u32,
    first_backoff: Duration,
    factor: u32,
    jitter: f32,
}

impl RetryPolicy {
    /// Default policy: enabled, 60s budget, 3 retries, 2s first sleep doubling
    pub fn new() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(60),
            max_retries: 3,
            first_backoff: Duration::from_secs(2),
            factor: 2,
            jitter: 0.3,
        }
    }

    /// Policy that never retries
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_first_backoff(mut self, first: Duration) -> Self {
        self.first_backoff = first;
        self
    }

    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor.max(1);
        self
    }

    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn backoff(&self) -> Backoff {
        let mut backoff = Backoff::new(
            self.max_retries,
            self.first_backoff,
            Some(MAX_BACKOFF.max(self.first_backoff)),
        );
        backoff.set_factor(self.factor);
        if self.jitter > 0.0 && self.jitter < 1.0 {
            backoff.set_jitter(self.jitter);
        }
        backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Send a request, classify the response and retry what is retryable
///
/// # Returns
///
/// - `Ok(ApiResponse)`: a 2xx response
/// - `Err(Error::Cancelled)`: the token fired while waiting
/// - `Err(e)`: the first non-retryable error, or the last retryable one
///   once retries or the timeout are exhausted
pub async fn execute(
    client: &dyn ApiClient,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    request: &ApiRequest,
) -> Result<ApiResponse> {
    let deadline = Instant::now() + policy.timeout;
    let backoff = policy.backoff();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        debug!("{} {} (attempt {})", client.name(), request.describe(), attempt + 1);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = client.send(request) => result.and_then(ApiResponse::into_result),
        };

        let err = match outcome {
            Ok(response) => return Ok(response),
            Err(e) if policy.enabled && e.is_retryable() => e,
            Err(e) => return Err(e),
        };

        if attempt >= policy.max_retries {
            warn!("{} failed after {} attempts: {}", request.describe(), attempt + 1, err);
            return Err(err);
        }
        let wait = match &err {
            Error::RateLimited {
                retry_after: Some(after),
                ..
            } => Some(*after),
            _ => backoff.next(attempt),
        };
        attempt += 1;

        let Some(wait) = wait else {
            warn!("{} failed after {} attempts: {}", request.describe(), attempt, err);
            return Err(err);
        };
        if Instant::now() + wait > deadline {
            warn!(
                "{} failed and retry timeout of {:?} would be exceeded: {}",
                request.describe(),
                policy.timeout,
                err
            );
            return Err(err);
        }

        warn!(
            "{} attempt {} failed: {}; retrying in {:?}",
            request.describe(),
            attempt,
            err,
            wait
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
