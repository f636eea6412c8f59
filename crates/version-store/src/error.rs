use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid resource id '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidResourceId(String),

    #[error("Invalid diff id '{0}'")]
    InvalidDiffId(String),

    #[error("Version {sequence} of resource '{resource}' not found")]
    VersionNotFound { resource: String, sequence: u64 },

    #[error("Change record '{0}' not found")]
    ChangeNotFound(String),

    #[error("Corrupt store entry {path}: {detail}")]
    Corrupt { path: String, detail: String },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn corrupt(path: &std::path::Path, detail: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.display().to_string(),
            detail: detail.into(),
        }
    }
}
