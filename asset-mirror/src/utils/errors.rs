//! Custom error types for the asset mirror.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a whole run.
///
/// Per-asset failures never surface here; they are recorded as
/// [`DownloadOutcome`](crate::transfer::task::DownloadOutcome)s instead.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    Parse(#[from] ManifestError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure to read, parse or write a manifest document.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest {path}: {msg}")]
    Xml { path: PathBuf, msg: String },

    #[error("manifest {path} has no root element")]
    NoRoot { path: PathBuf },

    #[error("manifest {path} ends with unclosed elements")]
    Unclosed { path: PathBuf },

    #[error("cannot write manifest {path}: {msg}")]
    Write { path: PathBuf, msg: String },
}

pub type Result<T> = std::result::Result<T, MirrorError>;
