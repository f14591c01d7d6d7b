use thiserror::Error;

/// Failure of a single provider attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Timeout, connection reset, empty upstream response.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Authentication or parse failure. Retrying will not help.
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("HTTP {0}")]
    Http(u16),

    /// Exactly zero usually means a blocked or empty response.
    #[error("provider returned zero")]
    ZeroValue,

    #[error("value {value} outside plausible range [{min}, {max}]")]
    OutOfBounds { value: f64, min: f64, max: f64 },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transient(_) | FetchError::ZeroValue | FetchError::OutOfBounds { .. } => {
                true
            }
            FetchError::Http(status) => matches!(status, 408 | 429 | 500..=599),
            FetchError::Permanent(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return FetchError::Http(status.as_u16());
        }
        if e.is_decode() {
            return FetchError::Permanent(e.to_string());
        }
        FetchError::Transient(e.to_string())
    }
}
