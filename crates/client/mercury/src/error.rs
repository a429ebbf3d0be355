use reqwest::StatusCode;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MercuryError {
    #[error("No Mercury protocol for feed label `{feed_label}` and query label `{query_label}`")]
    UnsupportedLabels { feed_label: String, query_label: String },

    #[error("Mercury report not found after {attempts} attempt(s)")]
    NotFound { attempts: u32 },

    #[error("Mercury answered with status {0}")]
    Status(StatusCode),

    #[error("Mercury request failed: {0}")]
    Request(String),

    #[error("Mercury request timed out")]
    Timeout,

    #[error("Failed to decode Mercury response: {0}")]
    Decode(String),

    #[error("Mercury response is missing the report for feed {0}")]
    MissingReport(String),

    #[error("Failed to authenticate Mercury request: {0}")]
    Auth(String),
}

impl MercuryError {
    pub fn from_reqwest_error(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }

    /// Whether the report may simply not exist yet, so the same lookup may
    /// succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
