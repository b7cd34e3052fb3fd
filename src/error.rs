//! Error types for the reconciliation review service

use thiserror::Error;

/// Result type alias for review operations
pub type Result<T> = std::result::Result<T, ReviewError>;

#[derive(Error, Debug)]
pub enum ReviewError {

    // =============================
    // Review Pipeline Errors
    // =============================

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Prompt template error: {0}")]
    Template(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    /// The model replied outside its reply contract. Distinct from a
    /// "No" verdict: this is "could not parse", never "no anomaly".
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Review session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid reviewer action: {0}")]
    InvalidAction(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
