use thiserror::Error;

/// Failures that stop an import run (or the CLI) outright.
///
/// Content-level problems never surface here; they are collected as
/// [`crate::types::ImportError`] records inside the import result.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No input files were supplied")]
    NoInput,

    #[error("Unknown source kind: {0}")]
    UnknownSource(String),

    #[error("Import was cancelled")]
    Cancelled,

    #[error("Event store error: {message}")]
    Store { message: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
