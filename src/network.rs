use std::time::Duration;

use rand::Rng;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio_util::sync::CancellationToken;

const POOL_MAX_IDLE_PER_HOST: usize = 100;
const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_MAX_MS: u64 = 30_000;

/// HTTP client shared by all scraper tasks.
///
/// Network-level failures, timeouts and 5xx responses are retried with
/// exponential backoff up to `max_attempts`. 429 responses are never
/// retried here; callers decide whether to cool down or skip.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_attempts: u32,
}

impl HttpClient {
    pub fn new(max_attempts: u32, timeout_secs: u64) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| FetchError::ClientBuildError(e.to_string()))?;

        Ok(Self {
            client,
            max_attempts,
        })
    }

    /// Access the underlying client for building requests.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send a request, retrying transient failures.
    ///
    /// Any response that arrives with a status other than 5xx is returned
    /// to the caller as-is, including 404 and 429.
    pub async fn execute(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response, FetchError> {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let builder = request.try_clone().ok_or(FetchError::NotRetryable)?;

            let result = tokio::select! {
                result = builder.send() => result,
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            };

            let error = match result {
                Ok(response) if response.status().is_server_error() => {
                    FetchError::ServerError(response.status().as_u16())
                }
                Ok(response) => return Ok(response),
                Err(e) => FetchError::from_reqwest_error(e),
            };

            attempt += 1;
            if attempt >= self.max_attempts {
                return Err(error);
            }

            tracing::debug!(attempt, %error, "retrying request");
            tokio::select! {
                _ = tokio::time::sleep(backoff_delay(attempt)) => {}
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            }
        }
    }
}

/// Exponential backoff with 10% jitter, capped at `BACKOFF_MAX_MS`.
fn backoff_delay(attempt: u32) -> Duration {
    let exponential = BACKOFF_BASE_MS.saturating_mul(2u64.saturating_pow(attempt.min(20)));
    let capped = exponential.min(BACKOFF_MAX_MS);
    let jitter = rand::thread_rng().gen_range(0..capped / 10 + 1);
    Duration::from_millis(capped + jitter)
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    NetworkError(String),

    #[error("connection refused")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    DnsError,

    #[error("request timeout")]
    Timeout,

    #[error("server error: HTTP {0}")]
    ServerError(u16),

    #[error("unexpected status: HTTP {0}")]
    UnexpectedStatus(u16),

    #[error("failed to read response body: {0}")]
    BodyError(String),

    #[error("request cannot be retried")]
    NotRetryable,

    #[error("failed to build HTTP client: {0}")]
    ClientBuildError(String),

    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn status(status: StatusCode) -> Self {
        FetchError::UnexpectedStatus(status.as_u16())
    }

    fn from_reqwest_error(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return FetchError::Timeout;
        }

        let message = error.to_string().to_lowercase();

        if error.is_connect() {
            if message.contains("connection refused") {
                return FetchError::ConnectionRefused;
            }
            if message.contains("dns")
                || message.contains("name resolution")
                || message.contains("no such host")
            {
                return FetchError::DnsError;
            }
        }

        FetchError::NetworkError(error.to_string())
    }
}
