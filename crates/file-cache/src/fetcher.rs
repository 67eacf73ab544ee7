//! Backend fetchers and the registry that dispatches to them

use crate::descriptor::{BackendTag, Descriptor};
use crate::error::FetchError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;

/// Retrieves a remote object into a local file.
///
/// Implementations must honour `timeout`, handle backend-specific addressing
/// and authentication (using [`Descriptor::args`]), and should not report
/// success for an empty object.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Populate `file` with the object's bytes, returning how many were written
    async fn fetch(
        &self,
        descriptor: &Descriptor,
        file: &mut File,
        timeout: Duration,
    ) -> Result<u64, FetchError>;
}

/// Maps backend tags to fetchers
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<BackendTag, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fetcher` for `tag`, replacing any earlier one
    pub fn register(mut self, tag: BackendTag, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.insert(tag, fetcher);
        self
    }

    pub fn get(&self, tag: &BackendTag) -> Option<Arc<dyn Fetcher>> {
        self.fetchers.get(tag).cloned()
    }

    pub fn contains(&self, tag: &BackendTag) -> bool {
        self.fetchers.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &BackendTag> {
        self.fetchers.keys()
    }
}

impl std::fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetcherRegistry")
            .field("backends", &self.fetchers.keys().collect::<Vec<_>>())
            .finish()
    }
}
