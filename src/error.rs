use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    /// A defect caught at an operator's recovery boundary.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Error evaluating {operation}: {message}")]
    Evaluation { operation: String, message: String },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Indexer provider '{0}' not found")]
    ProviderNotFound(String),

    #[error("Index '{0}' not found")]
    IndexNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(String),
}

pub type ExecResult<T> = Result<T, ExecError>;

impl ExecError {
    pub fn evaluation(err: impl std::fmt::Display, operation: impl Into<String>) -> Self {
        ExecError::Evaluation {
            operation: operation.into(),
            message: err.to_string(),
        }
    }
}

impl serde::Serialize for ExecError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<serde_json::Error> for ExecError {
    fn from(err: serde_json::Error) -> Self {
        ExecError::Json(err.to_string())
    }
}

impl From<toml::de::Error> for ExecError {
    fn from(err: toml::de::Error) -> Self {
        ExecError::Config(err.to_string())
    }
}
