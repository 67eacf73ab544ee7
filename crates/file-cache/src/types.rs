//! Cache configuration and statistics

use crate::descriptor::{ArgAllowList, BackendSelector, DescriptorRules};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`FileCache`](crate::FileCache)
#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    /// Maximum number of files kept on disk
    pub capacity: usize,
    /// Root of the shard directories
    pub base_dir: PathBuf,
    /// Passed to every fetcher
    pub download_timeout: Duration,
    /// Appended to cached file names whose remote path has no extension
    pub default_extension: String,
    pub rules: DescriptorRules,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            base_dir: PathBuf::from("./cache/files"),
            download_timeout: Duration::from_secs(10),
            default_extension: String::new(),
            rules: DescriptorRules::default(),
        }
    }
}

impl FileCacheConfig {
    pub fn new(capacity: usize, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            capacity,
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_default_extension(mut self, ext: impl Into<String>) -> Self {
        self.default_extension = ext.into();
        self
    }

    /// Argument names that differentiate cache keys and reach the fetchers
    pub fn with_hashable_args<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rules.allow_list = ArgAllowList::new(names);
        self
    }

    pub fn with_backends(mut self, backends: BackendSelector) -> Self {
        self.rules.backends = backends;
        self
    }

    /// Leading path segment stripped from raw identifiers
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.rules.root = root.into();
        self
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub evictions: u64,
}
