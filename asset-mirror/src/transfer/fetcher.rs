//! The network seam of the scheduler.
//!
//! A [`Fetcher`] retrieves one URL into one file. [`HttpFetcher`] is the
//! production implementation; tests plug in fakes.

use crate::utils::MirrorError;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Why a single fetch attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("not found (HTTP 404)")]
    NotFound,

    #[error("HTTP {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("file system error: {0}")]
    FileSystem(String),
}

impl FetchError {
    /// A terminal error ends the task regardless of the remaining attempts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchError::NotFound)
    }

    /// Map an HTTP status to the error it represents, if any.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        if status.is_success() {
            None
        } else if status == StatusCode::NOT_FOUND {
            Some(FetchError::NotFound)
        } else {
            Some(FetchError::Status(status.as_u16()))
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::FileSystem(e.to_string())
    }
}

/// Retrieves a URL into a destination file.
pub trait Fetcher: Send + Sync + 'static {
    /// Fetch `url` into `dest` and return the number of bytes written.
    ///
    /// `dest` only appears once its whole content has been written.
    fn fetch(&self, url: &str, dest: &Path) -> impl Future<Output = Result<u64, FetchError>> + Send;
}

/// Streams HTTP GET responses to disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// `timeout` bounds each attempt, connect through last body byte.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, MirrorError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> impl Future<Output = Result<u64, FetchError>> + Send {
        let client = self.client.clone();
        let url = url.to_string();
        let dest = dest.to_path_buf();

        async move {
            let response = client.get(&url).send().await?;
            if let Some(err) = FetchError::from_status(response.status()) {
                return Err(err);
            }

            let part = part_path(&dest);
            match stream_to_file(response, &part).await {
                Ok(written) => {
                    tokio::fs::rename(&part, &dest).await?;
                    debug!(url = %url, path = %dest.display(), bytes = written, "Fetched asset");
                    Ok(written)
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&part).await;
                    Err(e)
                }
            }
        }
    }
}

async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<u64, FetchError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}

/// In-progress download location for `dest`.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
