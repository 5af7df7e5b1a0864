use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while packing, storing, or transferring genes.
#[derive(Error, Debug)]
pub enum GeneError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported format: {0} (expected one of plain, gz, xz)")]
    UnsupportedFormat(String),

    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("Source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Invalid chunk size: {0} (must be greater than zero)")]
    InvalidChunkSize(u64),

    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Gene not found: {0}")]
    GeneNotFound(String),

    #[error("Stream closed")]
    StreamClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Chunk {chunk} is corrupt: expected {expected}, got {actual}")]
    DigestMismatch {
        chunk: String,
        expected: String,
        actual: String,
    },

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Remote store error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upload incomplete: {} chunk(s) outstanding", outstanding.len())]
    IncompleteUpload { outstanding: Vec<String> },

    #[error("Timed out after {}s waiting for the gene to become available", waited.as_secs())]
    Timeout { waited: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GeneError {
    /// True for failures caused by caller input rather than the environment.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GeneError::UnsupportedFormat(_)
                | GeneError::UnsupportedArchitecture(_)
                | GeneError::SourceNotFound(_)
                | GeneError::InvalidChunkSize(_)
                | GeneError::Validation { .. }
                | GeneError::InvalidDigest(_)
        )
    }

    /// True for failures worth retrying: server-side errors and
    /// connection-level problems.
    pub fn is_transient(&self) -> bool {
        match self {
            GeneError::Remote { status, .. } => *status >= 500,
            GeneError::Transport(_) => true,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GeneError::Timeout { .. })
    }

    /// Wrap for transport through `std::io::{Read, Write}` adapters.
    pub fn into_io(self) -> std::io::Error {
        match self {
            GeneError::Io(e) => e,
            GeneError::StreamClosed => {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, GeneError::StreamClosed)
            }
            other => std::io::Error::other(other),
        }
    }

    /// Recover an error that travelled through an I/O adapter.
    pub fn from_io(err: std::io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<GeneError>()) {
            return GeneError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<GeneError>()) {
            Some(Ok(gene)) => *gene,
            Some(Err(other)) => GeneError::Io(std::io::Error::other(other)),
            None => GeneError::Io(std::io::Error::other("I/O adapter error")),
        }
    }
}

impl From<reqwest::Error> for GeneError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => GeneError::Remote {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => GeneError::Transport(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GeneError>;
