use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unknown dataset scope: {0}")]
    UnknownScope(String),

    #[error("Retrieval of '{identifier}' failed: {cause}")]
    Retrieval { identifier: String, cause: String },

    #[error("Unknown unit code: {unit_code}")]
    UnknownUnit { unit_code: String },

    #[error("Join key mismatch, unmatched keys: {}", keys.join(", "))]
    JoinKeyMismatch { keys: Vec<String> },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    pub fn retrieval(identifier: impl Into<String>, cause: impl ToString) -> Self {
        PipelineError::Retrieval {
            identifier: identifier.into(),
            cause: cause.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
