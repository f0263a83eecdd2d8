//! Shard archive fetching.
//!
//! A [`ShardFetcher`] turns a `(dataset, shard)` pair into a local archive
//! path. [`HubFetcher`] downloads from a dataset hub into a cache directory
//! with bounded, retried attempts; [`LocalFetcher`] resolves shards inside a
//! local mirror.

use crate::config::DataConfig;
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Errors that can occur while fetching a shard.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Shard not found: {0}")]
    NotFound(String),

    #[error("HTTP {status} while fetching {url}")]
    Http { status: u16, url: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Download timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http { status, .. } => *status == 429 || *status >= 500,
            FetchError::Request(_) | FetchError::Timeout(_) => true,
            FetchError::NotFound(_) | FetchError::Io(_) => false,
        }
    }
}

/// Collaborator that makes one shard archive available on local disk.
#[async_trait]
pub trait ShardFetcher: Send + Sync {
    async fn fetch(&self, dataset: &str, shard: &str) -> Result<PathBuf, FetchError>;
}

/// Downloads shards from a dataset hub into a local cache.
pub struct HubFetcher {
    client: reqwest::Client,
    endpoint: String,
    revision: String,
    cache_dir: PathBuf,
    timeout: Duration,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    token: Option<String>,
}

impl HubFetcher {
    /// Create a fetcher from the data configuration.
    ///
    /// An `HF_TOKEN` environment variable, when set, is sent as a bearer token.
    pub fn new(config: &DataConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.hub_endpoint.trim_end_matches('/').to_string(),
            revision: config.revision.clone(),
            cache_dir: config.cache_dir.clone(),
            timeout: config.fetch_timeout(),
            max_attempts: config.max_fetch_attempts.max(1),
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
            token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }

    /// Resolve URL for a shard inside a dataset repository.
    pub fn shard_url(&self, dataset: &str, shard: &str) -> String {
        format!(
            "{endpoint}/datasets/{dataset}/resolve/{revision}/{shard}",
            endpoint = self.endpoint,
            dataset = dataset,
            revision = self.revision,
            shard = shard.trim_start_matches('/'),
        )
    }

    /// Location of a shard inside the cache directory.
    pub fn cache_path(&self, dataset: &str, shard: &str) -> PathBuf {
        self.cache_dir
            .join(dataset.replace('/', "--"))
            .join(&self.revision)
            .join(shard.trim_start_matches('/'))
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = partial_path(dest);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut bytes_written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, dest).await?;

        debug!(url = %url, bytes = bytes_written, "Shard download complete");
        Ok(())
    }
}

#[async_trait]
impl ShardFetcher for HubFetcher {
    async fn fetch(&self, dataset: &str, shard: &str) -> Result<PathBuf, FetchError> {
        let dest = self.cache_path(dataset, shard);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(shard = %shard, path = %dest.display(), "Using cached shard");
            return Ok(dest);
        }

        let url = self.shard_url(dataset, shard);
        let mut backoff = ExponentialBackoff {
            initial_interval: self.base_delay,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();

        let mut attempts = 0u32;

        loop {
            let result = match tokio::time::timeout(self.timeout, self.download_once(&url, &dest))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.timeout)),
            };

            match result {
                Ok(()) => {
                    info!(shard = %shard, attempts = attempts + 1, "Shard downloaded");
                    return Ok(dest);
                }
                Err(e) => {
                    attempts += 1;

                    if !e.is_retryable() || attempts >= self.max_attempts {
                        let _ = tokio::fs::remove_file(partial_path(&dest)).await;
                        return Err(e);
                    }

                    let delay = backoff.next_backoff().unwrap_or(self.max_delay);
                    warn!(
                        shard = %shard,
                        attempt = attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Shard download failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Resolves shards inside a local directory mirror of the dataset.
pub struct LocalFetcher {
    root: PathBuf,
}

impl LocalFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ShardFetcher for LocalFetcher {
    async fn fetch(&self, _dataset: &str, shard: &str) -> Result<PathBuf, FetchError> {
        let path = self.root.join(shard.trim_start_matches('/'));
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(FetchError::NotFound(path.display().to_string())),
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
