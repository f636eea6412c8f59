use thiserror::Error;

/// Result type for diff engine operations
pub type Result<T> = std::result::Result<T, DiffError>;

/// Errors raised while building or running the diff engine.
///
/// Parse failures are deliberately absent: a payload that does not parse is a
/// regular [`crate::ParseOutcome::Failed`] value, not an error.
#[derive(Error, Debug)]
pub enum DiffError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configured normalization rule does not compile
    #[error("Invalid normalization rule '{name}': {source}")]
    InvalidRule {
        name: String,
        #[source]
        source: regex::Error,
    },

    /// Tree-sitter grammar could not be loaded
    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),

    /// Artifact serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DiffError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a tree-sitter error
    pub fn tree_sitter(msg: impl Into<String>) -> Self {
        Self::TreeSitter(msg.into())
    }
}
