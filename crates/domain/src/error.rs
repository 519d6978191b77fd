/// Shared error type used across all foreman crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// A non-2xx HTTP response from an LLM provider.  Carries the status
    /// code so the retry layer can classify it, and any `Retry-After`
    /// value the server supplied.
    #[error("HTTP {code}: {message}")]
    Status {
        code: u16,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error is worth retrying: transient transport failures
    /// and the retryable HTTP status family.  Client errors (4xx other
    /// than 408/425/429) are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) | Error::Http(_) | Error::Timeout(_) => true,
            Error::Status { code, .. } => {
                matches!(code, 408 | 425 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    /// The server-supplied `Retry-After` delay, when present.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::Status { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_status_codes() {
        for code in [408u16, 425, 429, 500, 502, 503, 504] {
            let e = Error::Status {
                code,
                message: "x".into(),
                retry_after_ms: None,
            };
            assert!(e.is_retryable(), "expected {code} to be retryable");
        }
    }

    #[test]
    fn permanent_status_codes() {
        for code in [400u16, 401, 403, 404, 422] {
            let e = Error::Status {
                code,
                message: "x".into(),
                retry_after_ms: None,
            };
            assert!(!e.is_retryable(), "expected {code} to be permanent");
        }
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert!(Error::Http("connection reset".into()).is_retryable());
        assert!(Error::Timeout("read timed out".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }
}
