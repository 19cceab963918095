use thiserror::Error;

/// Failures surfaced by the feed plumbing.
///
/// None of these cross a subscription or polling boundary as a panic: each
/// component catches them and turns them into observable state.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transient transport failure. Retried on the next scheduled fetch.
    #[error("network error: {0}")]
    Network(String),

    /// A tick or event that could not be decoded or failed validation.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The platform refused notification permission.
    #[error("notification permission denied")]
    PermissionDenied,

    /// The platform notification facility is absent.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Work that needs a tokio runtime was requested outside of one.
    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl FeedError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        FeedError::MalformedPayload(msg.into())
    }

    /// Only network failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Network(_))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FeedError::MalformedPayload(e.to_string())
        } else {
            FeedError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::MalformedPayload(e.to_string())
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
