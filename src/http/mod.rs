// Shared blocking HTTP plumbing for the provider clients


use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use crate::GranthError;

pub(crate) const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub(crate) const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Build a ureq agent with a global timeout
#[inline]
pub(crate) fn agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Resolve an API path below `base`, keeping any path prefix it carries
#[inline]
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let prefixed = format!("{}/", base.path());
        base.set_path(&prefixed);
    }
    base.join(path.trim_start_matches('/'))
}

/// How often and how patiently a request is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[inline]
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Outcome of a request that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RequestFailure {
    /// Retries exhausted on timeouts, rate limits or server errors
    Transient(String),
    /// The provider rejected the request; retrying cannot help
    Rejected(String),
}

impl RequestFailure {
    /// Convert into a crate error, using `rejected` for non-retryable failures
    #[inline]
    pub(crate) fn into_error(self, rejected: fn(String) -> GranthError) -> GranthError {
        match self {
            Self::Transient(message) => GranthError::TransientProvider(message),
            Self::Rejected(message) => rejected(message),
        }
    }
}

/// Run `request_fn` until it succeeds, backing off exponentially between attempts.
///
/// HTTP 429, 5xx and transport errors are retried. Any other status is
/// returned immediately as [`RequestFailure::Rejected`].
pub(crate) fn with_retry<T, F>(
    policy: &RetryPolicy,
    target: &str,
    mut request_fn: F,
) -> Result<T, RequestFailure>
where
    F: FnMut() -> Result<T, ureq::Error>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        debug!("HTTP request attempt {}/{} to {}", attempt, attempts, target);

        match request_fn() {
            Ok(value) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(value);
            }
            Err(error) => {
                match &error {
                    ureq::Error::StatusCode(status) if *status == 429 || *status >= 500 => {
                        warn!(
                            "Provider returned HTTP {}, attempt {}/{}",
                            status, attempt, attempts
                        );
                    }
                    ureq::Error::StatusCode(status) => {
                        warn!("Client error (status {}), not retrying", status);
                        return Err(RequestFailure::Rejected(format!(
                            "{} returned HTTP {}",
                            target, status
                        )));
                    }
                    ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_) => {
                        warn!(
                            "Transport error: {}, attempt {}/{}",
                            error, attempt, attempts
                        );
                    }
                    _ => {
                        warn!("Non-retryable error: {}", error);
                        return Err(RequestFailure::Rejected(format!(
                            "{} request failed: {}",
                            target, error
                        )));
                    }
                }

                last_error = Some(error.to_string());

                if attempt < attempts {
                    let delay = policy.delay_for(attempt);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All {} retry attempts failed for {}", attempts, target);
    Err(RequestFailure::Transient(format!(
        "{} unavailable after {} attempts: {}",
        target,
        attempts,
        last_error.unwrap_or_else(|| "unknown error".to_string())
    )))
}
