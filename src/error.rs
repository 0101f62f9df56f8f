//! Closed error taxonomy for the router.

use thiserror::Error;

/// Category used for metrics and fallback decisions. Every `RouterError`
/// maps to exactly one of these via [`RouterError::category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    Timeout,
    RateLimit,
    AuthError,
    NotFound,
    ServerError,
    NetworkError,
    ValidationError,
    ServiceUnavailable,
    CostExceeded,
    Unknown,
}

impl ErrorCategory {
    /// Whether an attempt in this category may be retried against the same
    /// or a fallback model.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout
                | ErrorCategory::RateLimit
                | ErrorCategory::ServerError
                | ErrorCategory::NetworkError
                | ErrorCategory::ServiceUnavailable
        )
    }
}

#[derive(Error, Debug, Clone)]
pub enum RouterError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("rate limited by provider {provider}, retry after {retry_after_secs}s")]
    RateLimit {
        provider: String,
        retry_after_secs: u64,
    },

    #[error("authentication rejected by provider {0}")]
    AuthError(String),

    #[error("model or endpoint not found: {0}")]
    NotFound(String),

    #[error("provider server error: {0}")]
    ServerError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("provider {0} unavailable (unhealthy or breaker open)")]
    ServiceUnavailable(String),

    #[error("estimated cost {estimated} exceeds budget limit {limit}")]
    CostExceeded { estimated: f64, limit: f64 },

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("no healthy providers available")]
    NoHealthyProviders,

    #[error("all candidates exhausted, last error: {0}")]
    ChainExhausted(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl RouterError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RouterError::Timeout(_) => ErrorCategory::Timeout,
            RouterError::RateLimit { .. } => ErrorCategory::RateLimit,
            RouterError::AuthError(_) => ErrorCategory::AuthError,
            RouterError::NotFound(_) => ErrorCategory::NotFound,
            RouterError::ServerError(_) => ErrorCategory::ServerError,
            RouterError::NetworkError(_) => ErrorCategory::NetworkError,
            RouterError::ValidationError(_) => ErrorCategory::ValidationError,
            RouterError::ServiceUnavailable(_) => ErrorCategory::ServiceUnavailable,
            RouterError::CostExceeded { .. } => ErrorCategory::CostExceeded,
            RouterError::ConfigError(_) => ErrorCategory::ValidationError,
            RouterError::NoHealthyProviders => ErrorCategory::ServiceUnavailable,
            RouterError::ChainExhausted(_) => ErrorCategory::Unknown,
            RouterError::Unknown(_) => ErrorCategory::Unknown,
        }
    }

    pub fn retryable(&self) -> bool {
        self.category().retryable()
    }

    /// Derive a category from an HTTP status code + message, the way
    /// provider adapters classify transport failures. `retry_after_secs`
    /// is the provider's `Retry-After` header value, if present; a 429
    /// without one falls back to a 1s hint.
    pub fn from_status(provider: &str, status: u16, body: &str, retry_after_secs: Option<u64>) -> Self {
        match status {
            401 | 403 => RouterError::AuthError(provider.to_string()),
            404 => RouterError::NotFound(format!("{provider}: {body}")),
            408 => RouterError::Timeout(0),
            429 => RouterError::RateLimit {
                provider: provider.to_string(),
                retry_after_secs: retry_after_secs.unwrap_or(1),
            },
            500..=599 => RouterError::ServerError(format!("{provider} returned {status}: {body}")),
            400 => RouterError::ValidationError(format!("{provider}: {body}")),
            _ => RouterError::Unknown(format!("{provider} returned {status}: {body}")),
        }
    }
}

/// Structured error returned to callers of `Orchestrator::complete`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PublicError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub details: Option<serde_json::Value>,
}

impl From<&RouterError> for PublicError {
    fn from(err: &RouterError) -> Self {
        PublicError {
            code: format!("{:?}", err.category()),
            message: err.to_string(),
            retryable: err.retryable(),
            details: None,
        }
    }
}
