use std::time::Duration;

use tessera_core::error::TesseraError;

/// Errors from outbound calls to the provider and hardware verifiers.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("{what} timed out after {}ms", .after.as_millis())]
    Timeout { what: String, after: Duration },

    #[error("{what} returned HTTP {status}: {body}")]
    Http {
        what: String,
        status: u16,
        body: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl FetchError {
    /// Timeouts are fatal for the request and never retried.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_timeout() && !matches!(self, Self::NotConfigured(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                what: e
                    .url()
                    .map(|u| u.path().to_string())
                    .unwrap_or_else(|| "request".into()),
                after: Duration::ZERO,
            }
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<FetchError> for TesseraError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout { .. } => TesseraError::Timeout(e.to_string()),
            FetchError::NotConfigured(setting) => {
                TesseraError::config_missing(setting, crate::config::env_name(setting))
            }
            other => TesseraError::Upstream(other.to_string()),
        }
    }
}
