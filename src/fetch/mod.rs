//! HTTP fetcher for remote documents with retry/backoff.
//!
//! This module retrieves raw document bytes over HTTP(S). Transient failures
//! (timeouts, 5xx responses, connection resets) are retried internally with
//! backoff and jitter; 4xx responses are terminal and never retried. There is
//! no caching and no URI-based deduplication at this layer - deduplication
//! happens later, on content.
//!
//! # Example
//!
//! ```no_run
//! use raito_ingest::fetch::{FetchOptions, Fetcher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Fetcher::new(FetchOptions::default())?;
//! let doc = fetcher.fetch("https://example.test/page").await?;
//! println!("{} bytes, HTTP {}", doc.bytes.len(), doc.status);
//! # Ok(())
//! # }
//! ```

mod error;
mod retry;

pub use error::FetchError;
pub use retry::{Backoff, DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy};

use std::time::{Duration, SystemTime};

use reqwest::header::{ACCEPT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use tracing::{debug, instrument, warn};
use url::Url;

/// Connect timeout applied to every request (separate from the total timeout).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default total per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default redirect cap.
const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Default user agent sent with every request.
const DEFAULT_USER_AGENT: &str = concat!("raito-ingest/", env!("CARGO_PKG_VERSION"));

/// Options controlling fetch behavior.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Total per-request timeout.
    pub timeout: Duration,
    /// Maximum number of redirects to follow.
    pub max_redirects: usize,
    /// Maximum attempts per fetch, including the initial one.
    pub max_attempts: u32,
    /// Backoff strategy between retries.
    pub backoff: Backoff,
    /// User agent header value.
    pub user_agent: String,
    /// Accept-Encoding header override. `None` keeps the client's automatic
    /// gzip negotiation and transparent decompression.
    pub accept_encoding: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Exponential,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_encoding: None,
        }
    }
}

/// A fetched remote document.
///
/// Lives only for the duration of one pipeline pass; the raw payload is
/// never persisted.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// The URI the document was fetched from.
    pub source_uri: String,
    /// When the fetch completed.
    pub retrieved_at: SystemTime,
    /// Raw response body.
    pub bytes: Vec<u8>,
    /// HTTP status code of the final response.
    pub status: u16,
    /// Content-Type header value, if the server sent one.
    pub content_type: Option<String>,
}

/// Outcome of a single fetch attempt, before retry classification.
#[derive(Debug)]
enum AttemptError {
    Timeout,
    Connection(String),
    ServerStatus(u16),
    ClientStatus(u16),
    Malformed(String),
}

impl AttemptError {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Timeout | Self::Connection(_) | Self::ServerStatus(_) => FailureType::Transient,
            Self::ClientStatus(_) | Self::Malformed(_) => FailureType::Terminal,
        }
    }

    /// Converts the last attempt error into the terminal [`FetchError`].
    fn into_fetch_error(self, uri: &str, attempts: u32) -> FetchError {
        match self {
            Self::Timeout => FetchError::timeout(uri),
            Self::Connection(_) => FetchError::server_unavailable(uri, None, attempts),
            Self::ServerStatus(status) => {
                FetchError::server_unavailable(uri, Some(status), attempts)
            }
            Self::ClientStatus(status) => FetchError::client_rejected(uri, status),
            Self::Malformed(reason) => FetchError::malformed(uri, reason),
        }
    }
}

/// HTTP(S) fetcher with internal retry/backoff.
///
/// Cheap to clone; the underlying `reqwest::Client` is reference-counted and
/// shares its connection pool across clones.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    retry_policy: RetryPolicy,
    options: FetchOptions,
}

impl Fetcher {
    /// Creates a fetcher from the given options.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Malformed`] if the HTTP client cannot be built
    /// (TLS backend initialization failure or an invalid Accept-Encoding
    /// value).
    pub fn new(options: FetchOptions) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(options.timeout)
            .redirect(Policy::limited(options.max_redirects))
            .user_agent(options.user_agent.clone());

        if let Some(encoding) = &options.accept_encoding {
            let value = HeaderValue::from_str(encoding)
                .map_err(|e| FetchError::malformed("<client setup>", e.to_string()))?;
            let mut headers = HeaderMap::new();
            headers.insert(ACCEPT_ENCODING, value);
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::malformed("<client setup>", e.to_string()))?;

        let retry_policy = RetryPolicy::new(
            options.max_attempts,
            Duration::from_millis(500),
            Duration::from_secs(16),
            options.backoff,
        );

        Ok(Self {
            client,
            retry_policy,
            options,
        })
    }

    /// Returns the configured fetch options.
    #[must_use]
    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetches a document, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Malformed`] for a non-HTTP(S) or unparsable URI
    /// - [`FetchError::ClientRejected`] for any 4xx response (no retry)
    /// - [`FetchError::Timeout`] / [`FetchError::ServerUnavailable`] once the
    ///   retry budget is exhausted
    #[instrument(skip(self), fields(max_attempts = self.retry_policy.max_attempts()))]
    pub async fn fetch(&self, uri: &str) -> Result<FetchedDocument, FetchError> {
        let parsed =
            Url::parse(uri).map_err(|e| FetchError::malformed(uri, e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::malformed(
                uri,
                format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(attempt, "attempting fetch");

            match self.attempt(&parsed, uri).await {
                Ok(doc) => {
                    debug!(
                        status = doc.status,
                        bytes = doc.bytes.len(),
                        "fetch succeeded"
                    );
                    return Ok(doc);
                }
                Err(e) => match self.retry_policy.should_retry(e.failure_type(), attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next_attempt,
                    } => {
                        warn!(
                            uri,
                            attempt = next_attempt,
                            delay_ms = delay.as_millis(),
                            error = ?e,
                            "retrying fetch"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(uri, %reason, "not retrying fetch");
                        return Err(e.into_fetch_error(uri, attempt));
                    }
                },
            }
        }
    }

    /// Performs one HTTP attempt without any retry handling.
    async fn attempt(&self, url: &Url, uri: &str) -> Result<FetchedDocument, AttemptError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        if (400..500).contains(&status) {
            return Err(AttemptError::ClientStatus(status));
        }
        if status >= 500 {
            return Err(AttemptError::ServerStatus(status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(classify_reqwest_error)?
            .to_vec();

        Ok(FetchedDocument {
            source_uri: uri.to_string(),
            retrieved_at: SystemTime::now(),
            bytes,
            status,
            content_type,
        })
    }
}

/// Maps a reqwest error to an attempt error for retry classification.
fn classify_reqwest_error(error: reqwest::Error) -> AttemptError {
    if error.is_timeout() {
        AttemptError::Timeout
    } else if error.is_connect() {
        AttemptError::Connection(error.to_string())
    } else if error.is_redirect() || error.is_decode() {
        // Redirect loop or invalid response framing - terminal
        AttemptError::Malformed(error.to_string())
    } else {
        // Mid-body connection resets land here
        AttemptError::Connection(error.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_options_defaults() {
        let options = FetchOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.max_redirects, 5);
        assert_eq!(options.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(options.user_agent.starts_with("raito-ingest/"));
        assert!(options.accept_encoding.is_none());
    }

    #[tokio::test]
    async fn test_fetch_sends_configured_accept_encoding() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/page"))
            .and(wiremock::matchers::header("accept-encoding", "identity"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let options = FetchOptions {
            accept_encoding: Some("identity".to_string()),
            ..FetchOptions::default()
        };
        let fetcher = Fetcher::new(options).unwrap();

        // The mock only matches when the override header is sent
        let doc = fetcher
            .fetch(&format!("{}/page", server.uri()))
            .await
            .unwrap();
        assert_eq!(doc.bytes, b"ok");
    }

    #[test]
    fn test_fetcher_rejects_invalid_accept_encoding() {
        let options = FetchOptions {
            accept_encoding: Some("bad\nvalue".to_string()),
            ..FetchOptions::default()
        };
        assert!(matches!(
            Fetcher::new(options),
            Err(FetchError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_rejects_unparsable_uri() {
        let fetcher = Fetcher::new(FetchOptions::default()).unwrap();
        let result = fetcher.fetch("not a uri").await;
        assert!(matches!(result, Err(FetchError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_http_scheme() {
        let fetcher = Fetcher::new(FetchOptions::default()).unwrap();
        let result = fetcher.fetch("ftp://example.test/file").await;
        match result {
            Err(FetchError::Malformed { reason, .. }) => {
                assert!(reason.contains("ftp"), "Expected scheme in: {reason}");
            }
            other => panic!("Expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_attempt_error_classification() {
        assert_eq!(
            AttemptError::Timeout.failure_type(),
            FailureType::Transient
        );
        assert_eq!(
            AttemptError::ServerStatus(503).failure_type(),
            FailureType::Transient
        );
        assert_eq!(
            AttemptError::ClientStatus(404).failure_type(),
            FailureType::Terminal
        );
        assert_eq!(
            AttemptError::Malformed("bad framing".to_string()).failure_type(),
            FailureType::Terminal
        );
    }

    #[test]
    fn test_attempt_error_into_fetch_error() {
        let e = AttemptError::ServerStatus(502).into_fetch_error("http://x.test", 3);
        assert!(matches!(
            e,
            FetchError::ServerUnavailable {
                status: Some(502),
                attempts: 3,
                ..
            }
        ));

        let e = AttemptError::ClientStatus(410).into_fetch_error("http://x.test", 1);
        assert!(matches!(e, FetchError::ClientRejected { status: 410, .. }));
    }
}
