use scriptwatch_diff::DiffError;
use scriptwatch_store::StoreError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckError>;

/// Configuration problems, reported before any check runs
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Fetch of {url} timed out after {}ms", .after.as_millis())]
    Timeout { url: String, after: Duration },

    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned {size} bytes, limit is {limit}")]
    TooLarge { url: String, size: u64, limit: u64 },

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl FetchError {
    /// Network errors, timeouts, HTTP 5xx and 429 are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Self::TooLarge { .. } | Self::Client(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read registry {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid registry {path}: {detail}")]
    Invalid { path: String, detail: String },
}

#[derive(Error, Debug)]
#[error("Event delivery failed: {0}")]
pub struct SinkError(pub String);

/// Why a single check failed
#[derive(Error, Debug)]
pub enum CheckError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Diff error: {0}")]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Resource '{0}' is not registered")]
    UnknownResource(String),

    #[error("Resource '{0}' is inactive")]
    Inactive(String),

    #[error("Check cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl CheckError {
    /// Short machine-readable kind, persisted in the resource status
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(err) if err.is_timeout() => "fetch_timeout",
            Self::Fetch(_) => "fetch",
            Self::Store(_) => "storage",
            Self::Diff(_) => "diff",
            Self::Registry(_) | Self::UnknownResource(_) | Self::Inactive(_) => "registry",
            Self::Cancelled => "cancelled",
            Self::Task(_) => "task",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> FetchError {
        FetchError::Status {
            url: "https://cdn.example/app.js".into(),
            status: code,
        }
    }

    #[test]
    fn transient_classification() {
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(403).is_transient());
        assert!(FetchError::Timeout {
            url: "u".into(),
            after: Duration::from_secs(1)
        }
        .is_transient());
        assert!(!FetchError::Client("bad".into()).is_transient());
    }

    #[test]
    fn timeout_kind_is_distinct() {
        let err = CheckError::from(FetchError::Timeout {
            url: "u".into(),
            after: Duration::from_millis(10),
        });
        assert_eq!(err.kind(), "fetch_timeout");
        assert_eq!(CheckError::from(status(500)).kind(), "fetch");
    }
}
