use std::time::Duration;
use url::Url;

/// Retry policy for Mercury reads. Only `404 Not Found` answers are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 4, delay: Duration::from_millis(600) }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct MercuryConfig {
    pub url: Url,
    /// Client id sent in the `Authorization` header and mixed into the signature.
    pub username: String,
    /// HMAC secret.
    pub password: String,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl MercuryConfig {
    pub fn new(url: Url, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url,
            username: username.into(),
            password: password.into(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl std::fmt::Debug for MercuryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MercuryConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
