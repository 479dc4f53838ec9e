use anyhow::Error as AnyhowError;

#[derive(Debug, thiserror::Error)]
pub enum SnowcheckError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("General error: {0}")]
    General(#[from] AnyhowError),
}

impl SnowcheckError {
    /// True for expectation mismatches, as opposed to failures of the
    /// warehouse or of the harness inputs.
    pub fn is_assertion(&self) -> bool {
        matches!(self, SnowcheckError::Assertion(_))
    }
}

pub type Result<T> = std::result::Result<T, SnowcheckError>;
