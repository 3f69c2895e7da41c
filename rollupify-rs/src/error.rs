//! Error types for rollupify-rs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using TransformError.
pub type TransformResult<T> = Result<T, TransformError>;

/// Errors that end a transform session.
///
/// Every variant names the source file being transformed.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Reading the upstream input failed.
    #[error("Failed to read input for {file}: {source}")]
    Read {
        file: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The accumulated source is not UTF-8 text.
    #[error("Source of {file} is not valid UTF-8")]
    InvalidUtf8 { file: PathBuf },

    /// The temporary entry file could not be written.
    #[error("Failed to stage {file} to {staged}: {source}")]
    Stage {
        file: PathBuf,
        staged: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The bundler configuration could not be loaded.
    #[error("Invalid bundler configuration for {file}: {source}")]
    Config {
        file: PathBuf,
        #[source]
        source: ConfigError,
    },

    /// The sub-bundler failed.
    #[error("Failed to bundle {file}: {source:#}")]
    Bundle {
        file: PathBuf,
        source: anyhow::Error,
    },

    /// The temporary entry file could not be removed.
    #[error("Failed to remove {staged} after bundling {file}: {source}")]
    Cleanup {
        file: PathBuf,
        staged: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The blocking bundler task panicked or was cancelled.
    #[error("Bundler task for {file} did not complete: {message}")]
    Task { file: PathBuf, message: String },

    /// Writing the output downstream failed.
    #[error("Failed to write output for {file}: {source}")]
    Write {
        file: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors loading a bundler configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl TransformError {
    /// The source file whose session failed.
    pub fn file(&self) -> &PathBuf {
        match self {
            TransformError::Read { file, .. }
            | TransformError::InvalidUtf8 { file }
            | TransformError::Stage { file, .. }
            | TransformError::Config { file, .. }
            | TransformError::Bundle { file, .. }
            | TransformError::Cleanup { file, .. }
            | TransformError::Task { file, .. }
            | TransformError::Write { file, .. } => file,
        }
    }
}
