//! Core types for the file cache proxy

use file_cache::{CacheStats, FileCacheConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the file cache proxy
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub cache_dir: PathBuf,
    /// Maximum number of cached files
    pub cache_size: usize,
    pub download_timeout: Duration,
    pub default_extension: String,
    /// Request headers that differentiate cache entries and reach the backends
    pub hashable_args: Vec<String>,
    pub aws_region: String,
    /// Path-style S3-compatible endpoint; AWS is used when unset
    pub s3_endpoint: Option<String>,
    /// Leading path segment of document routes
    pub document_root: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            cache_dir: PathBuf::from("./cache/files"),
            cache_size: 512,
            download_timeout: Duration::from_secs(10),
            default_extension: String::new(),
            hashable_args: Vec::new(),
            aws_region: "us-east-1".to_string(),
            s3_endpoint: None,
            document_root: "documents".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Settings for the underlying [`FileCache`](file_cache::FileCache)
    pub fn cache_config(&self) -> FileCacheConfig {
        FileCacheConfig::new(self.cache_size, self.cache_dir.clone())
            .with_download_timeout(self.download_timeout)
            .with_default_extension(self.default_extension.clone())
            .with_hashable_args(&self.hashable_args)
            .with_root(self.document_root.clone())
    }
}

/// Query parameters accepted on document routes
#[derive(Debug, Default, Deserialize)]
pub struct DocumentQuery {
    /// Force a fresh download
    #[serde(default)]
    pub reload: bool,
    /// Unix timestamp (seconds) the cached copy must not be older than
    pub newer_than: Option<i64>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}
