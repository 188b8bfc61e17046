//! Partition sources
//!
//! A source serves the raw bytes of partition `index` of a series. The series has no
//! manifest: a "does not exist" answer is the only signal that the series has ended,
//! which every source reports as `Ok(None)`.

use crate::{DemandError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

/// Placeholder replaced by the partition index in file and URL patterns
pub const CHUNK_PLACEHOLDER: &str = "{chunk}";

/// Default partition file name pattern
pub const DEFAULT_PATTERN: &str = "demandrank_{chunk}.geojson";

/// A readable series of indexed partitions
pub trait PartitionSource: Send + Sync {
    /// Fetch partition `index`
    ///
    /// Returns `Ok(None)` when the partition does not exist.
    fn fetch(&self, index: usize) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Human readable location of partition `index`, for logs
    fn describe(&self, index: usize) -> String;
}

/// Partitions stored as files in one directory
#[derive(Debug, Clone)]
pub struct FsSource {
    directory: PathBuf,
    pattern: String,
}

impl FsSource {
    /// Source reading `demandrank_{chunk}.geojson` files from `directory`
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self::with_pattern(directory, DEFAULT_PATTERN)
    }

    pub fn with_pattern(directory: impl AsRef<Path>, pattern: impl Into<String>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            pattern: pattern.into(),
        }
    }

    fn path_for(&self, index: usize) -> PathBuf {
        self.directory
            .join(self.pattern.replace(CHUNK_PLACEHOLDER, &index.to_string()))
    }
}

impl PartitionSource for FsSource {
    async fn fetch(&self, index: usize) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(index)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DemandError::Io(e)),
        }
    }

    fn describe(&self, index: usize) -> String {
        self.path_for(index).display().to_string()
    }
}

/// Partitions served over HTTP, e.g. from a storage bucket
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url_pattern: String,
}

#[cfg(feature = "http")]
impl HttpSource {
    /// `url_pattern` must contain the `{chunk}` placeholder
    pub fn new(url_pattern: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url_pattern: url_pattern.into(),
        }
    }

    fn url_for(&self, index: usize) -> String {
        self.url_pattern
            .replace(CHUNK_PLACEHOLDER, &index.to_string())
    }
}

#[cfg(feature = "http")]
impl PartitionSource for HttpSource {
    async fn fetch(&self, index: usize) -> Result<Option<Vec<u8>>> {
        let response = self.client.get(self.url_for(index)).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(DemandError::PartitionLoad {
                index,
                reason: format!("HTTP status {status}"),
            });
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }

    fn describe(&self, index: usize) -> String {
        self.url_for(index)
    }
}

/// In-memory partitions, with optional scripted failures
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    partitions: HashMap<usize, std::result::Result<Vec<u8>, String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` as partition `index`
    pub fn with_partition(mut self, index: usize, bytes: impl Into<Vec<u8>>) -> Self {
        self.partitions.insert(index, Ok(bytes.into()));
        self
    }

    /// Fail partition `index` with a non-"not found" error
    pub fn with_failure(mut self, index: usize, reason: impl Into<String>) -> Self {
        self.partitions.insert(index, Err(reason.into()));
        self
    }
}

impl PartitionSource for MemorySource {
    async fn fetch(&self, index: usize) -> Result<Option<Vec<u8>>> {
        match self.partitions.get(&index) {
            None => Ok(None),
            Some(Ok(bytes)) => Ok(Some(bytes.clone())),
            Some(Err(reason)) => Err(DemandError::PartitionLoad {
                index,
                reason: reason.clone(),
            }),
        }
    }

    fn describe(&self, index: usize) -> String {
        format!("memory partition {index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_source_reads_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("demandrank_0.geojson"), b"[]").unwrap();

        let source = FsSource::new(dir.path());
        assert_eq!(source.fetch(0).await.unwrap(), Some(b"[]".to_vec()));
        assert_eq!(source.fetch(1).await.unwrap(), None);
        assert!(source.describe(1).ends_with("demandrank_1.geojson"));
    }

    #[tokio::test]
    async fn test_fs_source_custom_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("part-2.json"), b"{}").unwrap();

        let source = FsSource::with_pattern(dir.path(), "part-{chunk}.json");
        assert!(source.fetch(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_source() {
        let source = MemorySource::new()
            .with_partition(0, "[]")
            .with_failure(1, "connection reset");

        assert!(source.fetch(0).await.unwrap().is_some());
        assert!(matches!(
            source.fetch(1).await,
            Err(DemandError::PartitionLoad { index: 1, .. })
        ));
        assert!(source.fetch(2).await.unwrap().is_none());
    }
}
