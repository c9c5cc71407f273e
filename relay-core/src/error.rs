use thiserror::Error;

/// Core error type for relay.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// HTTP 429 or backend-declared throttling.
    #[error("rate limited by provider {provider}: {message}")]
    RateLimited {
        provider: String,
        retry_after_ms: Option<u64>,
        message: String,
    },

    /// Billing or quota exhaustion. Never retried.
    #[error("quota exceeded at provider {provider}: {message}")]
    QuotaExceeded { provider: String, message: String },

    /// Transport failure. `status` is `None` when the request never produced a response.
    #[error("provider unavailable: {provider}{}", status_suffix(.status))]
    ProviderUnavailable {
        provider: String,
        status: Option<u16>,
        retry_after_ms: Option<u64>,
    },

    #[error("upstream error from {provider}: {code} {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    /// HTTP success whose content matches a known error signature.
    #[error("{provider} returned error as content: {content}")]
    ContentMasked { provider: String, content: String },

    #[error("maximum retry attempts reached for {provider}: {max_retries} retries")]
    MaxRetriesExceeded {
        provider: String,
        max_retries: u32,
        #[source]
        last: Box<RelayError>,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("failed to decode response from {provider}: {message}")]
    Decode { provider: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// Stable label for logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::RateLimited { .. } => "rate_limited",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ProviderError { .. } => "provider_error",
            Self::ContentMasked { .. } => "content_masked",
            Self::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            Self::Cancelled => "cancelled",
            Self::Decode { .. } => "decode",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }

    /// Explicit retry hint carried by the error, if the backend sent one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. }
            | Self::ProviderUnavailable { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    /// HTTP status behind the error, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::ProviderUnavailable { status, .. } => *status,
            Self::ProviderError { code, .. } => code.parse().ok(),
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

pub type CoreResult<T> = std::result::Result<T, RelayError>;
