//! Dropbox shared-link downloads
//!
//! Dropbox paths carry the base64-encoded shared file URL after `dropbox/`.

use crate::download::{stream_to_file, with_timeout};
use crate::error::{FetcherError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use file_cache::{Descriptor, FetchError, Fetcher};
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tracing::debug;
use url::Url;

const PATH_PREFIX: &str = "dropbox/";

/// Downloads files from Dropbox shared links
#[derive(Clone)]
pub struct DropboxFetcher {
    client: Client,
}

impl DropboxFetcher {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Decode the file URL carried in a `dropbox/<base64>` path
    pub fn file_url(path: &str) -> Result<Url> {
        let encoded = path.strip_prefix(PATH_PREFIX).unwrap_or(path);

        // URL-safe without padding is canonical; accept the other alphabets too
        let decoded = [URL_SAFE_NO_PAD, URL_SAFE, STANDARD]
            .iter()
            .find_map(|engine| engine.decode(encoded).ok())
            .ok_or_else(|| FetcherError::Decode(format!("{:?} is not valid base64", encoded)))?;

        let url = String::from_utf8(decoded)
            .map_err(|e| FetcherError::Decode(e.to_string()))?;

        Url::parse(&url).map_err(|e| FetcherError::InvalidUrl(format!("{:?}: {}", url, e)))
    }
}

impl Default for DropboxFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for DropboxFetcher {
    async fn fetch(
        &self,
        descriptor: &Descriptor,
        file: &mut File,
        timeout: Duration,
    ) -> std::result::Result<u64, FetchError> {
        let url = Self::file_url(descriptor.path())?;

        let started = Instant::now();
        let written = with_timeout(
            timeout,
            stream_to_file(&self.client, url.as_str(), descriptor.args(), file),
        )
        .await?;

        debug!(
            path = %descriptor.path(),
            bytes = written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Downloaded file from Dropbox"
        );
        Ok(written)
    }
}
