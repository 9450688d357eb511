//! Error types and handling
//!
//! Common error types used across the application.

use crate::config::ConfigError;
use crate::onvif::SourceError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Camera error: {0}")]
    Source(#[from] SourceError),

    #[error("Server error: {0}")]
    Server(String),
}

impl AppError {
    /// Stable code used in exit diagnostics
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Source(_) => "SOURCE_ERROR",
            AppError::Server(_) => "SERVER_ERROR",
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Collect the messages of an error and all of its sources, outermost first.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![error.to_string()];
    let mut current = error.source();
    while let Some(inner) = current {
        chain.push(inner.to_string());
        current = inner.source();
    }
    chain
}
