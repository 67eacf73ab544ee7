//! Fetchers for the file cache
//!
//! Backends that populate cached files from S3 object storage and from
//! Dropbox shared links. Register them with a
//! [`FetcherRegistry`](file_cache::FetcherRegistry) under the matching
//! [`BackendTag`](file_cache::BackendTag).

mod download;
pub mod dropbox;
pub mod error;
pub mod object_store;

pub use dropbox::DropboxFetcher;
pub use error::{FetcherError, Result};
pub use object_store::ObjectStoreFetcher;

use file_cache::{BackendTag, FetcherRegistry};
use std::sync::Arc;

/// Registry with the object-store fetcher on the default tag and the Dropbox
/// fetcher on [`BackendTag::DROPBOX`]
pub fn default_registry(object_store: ObjectStoreFetcher) -> FetcherRegistry {
    FetcherRegistry::new()
        .register(BackendTag::OBJECT_STORE, Arc::new(object_store))
        .register(BackendTag::DROPBOX, Arc::new(DropboxFetcher::new()))
}
