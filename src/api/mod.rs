//! HTTP side of the game server: the word-list repository and the quiz.
//!
//! Both clients share [`ApiConfig`] and send every request through
//! [`with_retry`], which retries transient failures (connection errors,
//! timeouts, 5xx answers) a fixed number of times with a fixed delay.

pub mod quiz;
pub mod wordlists;

use std::future::Future;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{Result, SpyError};

pub use quiz::{AnswerResult, Question, QuestionId, QuizClient, QuizDraw};
pub use wordlists::{WordListClient, WordPair};

/// Server origin used when nothing else is configured.
pub const DEFAULT_API_BASE: &str = "http://localhost:3001";

/// Environment variable that overrides the API base URL.
pub const API_BASE_ENV: &str = "WHO_IS_SPY_API_BASE";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_COUNT: u32 = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Fixed-delay retry for HTTP calls.
///
/// The default sends the first request plus two retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first request. Zero sends exactly one request.
    pub max_retries: u32,
    /// Pause before every retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRY_COUNT,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Where the HTTP API lives and how patiently to talk to it.
///
/// ```
/// use who_is_spy_client::api::{ApiConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let config = ApiConfig::new("http://spy.local:3001/api")
///     .with_timeout(Duration::from_secs(3))
///     .with_retry(RetryPolicy::default().with_max_retries(3));
/// assert_eq!(config.retry.max_retries, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL; resource paths are appended to it.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Defaults, with the base URL taken from `WHO_IS_SPY_API_BASE` when set.
    pub fn from_env() -> Self {
        match std::env::var(API_BASE_ENV) {
            Ok(base) if !base.trim().is_empty() => Self::new(base.trim()),
            _ => Self::default(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

// ── Retry ───────────────────────────────────────────────────────────

/// Runs `op` until it succeeds, fails permanently, or retries run out.
///
/// Only errors for which [`SpyError::is_transient`] holds are retried; the
/// last error is returned unchanged.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retry < policy.max_retries && e.is_transient() => {
                retry += 1;
                warn!(
                    what,
                    retry,
                    max_retries = policy.max_retries,
                    "request failed, retrying: {e}"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ── Shared HTTP plumbing ────────────────────────────────────────────

/// reqwest client bound to a base URL and retry policy.
#[derive(Debug, Clone)]
pub(crate) struct ApiClient {
    http: reqwest::Client,
    base: Url,
    retry: RetryPolicy,
}

impl ApiClient {
    pub(crate) fn new(config: &ApiConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| SpyError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(SpyError::InvalidUrl(config.base_url.clone()));
        }
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base,
            retry: config.retry.clone(),
        })
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Base URL extended by `segments`, each percent-encoded.
    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| SpyError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends the request built by `build`, retrying per policy, and fails on non-2xx.
    pub(crate) async fn execute<B>(&self, what: &str, build: B) -> Result<Response>
    where
        B: Fn() -> RequestBuilder,
    {
        let build = &build;
        with_retry(&self.retry, what, move || async move {
            let response = build().send().await?;
            error_for_status(response).await
        })
        .await
    }

    /// Like [`execute`](Self::execute), decoding a JSON body.
    pub(crate) async fn fetch_json<T, B>(&self, what: &str, build: B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Fn() -> RequestBuilder,
    {
        let body = self.execute(what, build).await?.text().await?;
        debug!(what, bytes = body.len(), "response received");
        Ok(serde_json::from_str(&body)?)
    }
}

/// Maps a non-success status to [`SpyError::Api`], keeping the body as message.
async fn error_for_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    Err(SpyError::Api {
        status: status.as_u16(),
        message,
    })
}
