//! Disk-backed LRU file cache with single-flight downloads

use crate::descriptor::Descriptor;
use crate::error::{CacheError, Result};
use crate::fetcher::FetcherRegistry;
use crate::index::{EvictionListener, LruIndex};
use crate::naming;
use crate::single_flight::{Flight, SingleFlight};
use crate::types::{CacheStats, FileCacheConfig};
use chrono::{DateTime, Utc};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Called with the key and local path of every evicted entry, before the
/// file is deleted
pub type EvictionObserver = Arc<dyn Fn(&str, &Path) + Send + Sync>;

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    evictions: AtomicU64,
}

/// Deletes the cached file of every entry leaving the index
struct EvictionHandler {
    observer: Option<EvictionObserver>,
    counters: Arc<Counters>,
}

impl EvictionListener<String, PathBuf> for EvictionHandler {
    fn on_evict(&self, key: String, path: PathBuf) {
        if let Some(observer) = &self.observer {
            observer(&key, &path);
        }
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);

        debug!(key = %key, "Got eviction notice, removing");
        if let Err(e) = std::fs::remove_file(&path) {
            error!(key = %key, path = ?path, error = %e, "Unable to evict cached file");
        }
    }
}

/// A bounded cache of remote files on local disk.
///
/// At most `capacity` files are tracked; the least recently used one is
/// deleted when room is needed. Concurrent requests for the same key share a
/// single download.
pub struct FileCache {
    config: FileCacheConfig,
    index: Arc<LruIndex<String, PathBuf>>,
    flights: SingleFlight<String>,
    fetchers: FetcherRegistry,
    counters: Arc<Counters>,
}

impl FileCache {
    /// Create a cache. Fails on zero capacity or an empty base directory.
    pub fn new(config: FileCacheConfig, fetchers: FetcherRegistry) -> Result<Self> {
        Self::build(config, fetchers, None)
    }

    /// Create a cache that also reports every eviction to `observer`
    pub fn with_eviction_observer(
        config: FileCacheConfig,
        fetchers: FetcherRegistry,
        observer: EvictionObserver,
    ) -> Result<Self> {
        Self::build(config, fetchers, Some(observer))
    }

    fn build(
        config: FileCacheConfig,
        fetchers: FetcherRegistry,
        observer: Option<EvictionObserver>,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.capacity)
            .ok_or_else(|| CacheError::Config("invalid size: capacity must be non-zero".into()))?;

        if config.base_dir.as_os_str().is_empty() {
            return Err(CacheError::Config("empty base_dir".into()));
        }

        let counters = Arc::new(Counters::default());
        let handler = EvictionHandler {
            observer,
            counters: counters.clone(),
        };

        Ok(Self {
            config,
            index: Arc::new(LruIndex::new(capacity, Box::new(handler))),
            flights: SingleFlight::new(),
            fetchers,
            counters,
        })
    }

    pub fn config(&self) -> &FileCacheConfig {
        &self.config
    }

    /// Build a descriptor from a raw remote identifier, keeping only the
    /// arguments on this cache's allow-list
    pub fn descriptor<I, K, V>(&self, raw: &str, args: I) -> Result<Descriptor>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Ok(self.config.rules.parse(raw, args)?)
    }

    /// Where `descriptor` lives on disk, whether or not it is cached
    pub fn storage_path(&self, descriptor: &Descriptor) -> PathBuf {
        naming::storage_path(
            &self.config.base_dir,
            descriptor,
            &self.config.default_extension,
        )
    }

    /// Whether the index has an entry for this descriptor. Never blocks.
    pub fn contains(&self, descriptor: &Descriptor) -> bool {
        self.index.contains(&descriptor.unique_key())
    }

    /// Whether a download for this descriptor is in progress
    pub fn is_downloading(&self, descriptor: &Descriptor) -> bool {
        self.flights.is_in_flight(&descriptor.unique_key())
    }

    /// Make sure the file is cached, downloading it if needed. Returns false
    /// only if it could not be fetched; the error is logged.
    pub async fn fetch(&self, descriptor: &Descriptor) -> bool {
        match self.try_fetch(descriptor).await {
            Ok(()) => true,
            Err(e) => {
                error!(path = %descriptor.path(), error = %e, "Tried to fetch file");
                false
            }
        }
    }

    /// Like [`fetch`](Self::fetch), but reports why it failed
    pub async fn try_fetch(&self, descriptor: &Descriptor) -> Result<()> {
        if self.index.get(&descriptor.unique_key()).is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.fetch_or_wait(descriptor).await
    }

    /// Drop any cached copy (deleting its file) and download it again
    pub async fn reload(&self, descriptor: &Descriptor) -> bool {
        match self.try_reload(descriptor).await {
            Ok(()) => true,
            Err(e) => {
                error!(path = %descriptor.path(), error = %e, "Tried to reload file");
                false
            }
        }
    }

    /// Like [`reload`](Self::reload), but reports why it failed
    pub async fn try_reload(&self, descriptor: &Descriptor) -> Result<()> {
        self.index.remove(&descriptor.unique_key());
        self.fetch_or_wait(descriptor).await
    }

    /// Make sure the cached file was modified at or after `threshold`,
    /// reloading it otherwise.
    ///
    /// Modification time is checked rather than index presence alone because
    /// the file may have been overwritten with newer data out of band.
    pub async fn fetch_newer_than(&self, descriptor: &Descriptor, threshold: DateTime<Utc>) -> bool {
        if !self.contains(descriptor) {
            return self.fetch(descriptor).await;
        }

        let storage_path = self.storage_path(descriptor);
        let modified = match fs::metadata(&storage_path).await.and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(e) => {
                debug!(path = ?storage_path, error = %e, "Unable to stat cached file");
                return self.fetch(descriptor).await;
            }
        };

        // The entry could have gone while we were looking at the file
        if modified >= threshold && self.contains(descriptor) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        debug!(path = %descriptor.path(), modified = %modified, threshold = %threshold, "Cached file is stale");
        self.reload(descriptor).await
    }

    /// Download the file unless another caller already is, in which case wait
    /// for them.
    ///
    /// Only the caller that performs the download sees its error. Callers
    /// that waited check the index once released and get
    /// [`CacheError::NotFetched`] if the entry is not there.
    pub async fn fetch_or_wait(&self, descriptor: &Descriptor) -> Result<()> {
        let key = descriptor.unique_key();

        // The file could have arrived while we were getting here
        let flight = self
            .flights
            .join_unless(key.clone(), || self.index.contains(&key));

        let guard = match flight {
            None => return Ok(()),
            Some(Flight::Follower(waiter)) => {
                debug!(path = %descriptor.path(), "Awaiting download");
                waiter.wait().await;

                return if self.index.contains(&key) {
                    Ok(())
                } else {
                    Err(CacheError::NotFetched { key })
                };
            }
            Some(Flight::Leader(guard)) => guard,
        };

        debug!(path = %descriptor.path(), key = %key, "Starting download");
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let result = self.download(descriptor).await;
        if let Ok(storage_path) = &result {
            self.index.insert(key, storage_path.clone());
        }

        // Waiters are released before we report back
        guard.complete();

        if result.is_err() {
            self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
        }
        result.map(|_| ())
    }

    /// Run the registered fetcher into the descriptor's storage path
    async fn download(&self, descriptor: &Descriptor) -> Result<PathBuf> {
        let fetcher = self
            .fetchers
            .get(descriptor.backend())
            .ok_or_else(|| CacheError::NoFetcher(descriptor.backend().clone()))?;

        let storage_path = self.storage_path(descriptor);
        if let Some(parent) = storage_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&storage_path).await?;

        let started = Instant::now();
        let fetched = fetcher
            .fetch(descriptor, &mut file, self.config.download_timeout)
            .await;

        let fetched = match fetched {
            Ok(bytes) => file.flush().await.map(|_| bytes).map_err(CacheError::from),
            Err(e) => Err(CacheError::Fetch(e)),
        };
        drop(file);

        match fetched {
            Ok(bytes) => {
                debug!(
                    path = %descriptor.path(),
                    bytes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Downloaded file"
                );
                Ok(storage_path)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&storage_path).await {
                    warn!(path = ?storage_path, error = %rm, "Failed to remove partial download");
                }
                Err(e)
            }
        }
    }

    /// Evict every entry, deleting its file
    pub fn purge(&self) {
        let evicted = self.index.purge();
        info!(evicted, "Purged file cache");
    }

    /// Purge on the blocking pool. `done`, if given, is signalled once every
    /// entry is gone. Must be called from within a Tokio runtime.
    pub fn purge_async(&self, done: Option<oneshot::Sender<()>>) {
        let index = self.index.clone();
        tokio::task::spawn_blocking(move || {
            let evicted = index.purge();
            info!(evicted, "Purged file cache");
            if let Some(done) = done {
                let _ = done.send(());
            }
        });
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.index.capacity()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.index.len(),
            capacity: self.index.capacity(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            fetch_failures: self.counters.fetch_failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}
