//! Shared HTTP download plumbing

use crate::error::FetcherError;
use file_cache::FetchError;
use reqwest::Client;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// GET `url` with `headers` and stream the body into `file`.
///
/// Non-2xx responses and empty bodies are errors.
pub(crate) async fn stream_to_file(
    client: &Client,
    url: &str,
    headers: &HashMap<String, String>,
    file: &mut File,
) -> Result<u64, FetchError> {
    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    debug!(url = %url, "Requesting file");
    let mut response = request.send().await.map_err(FetcherError::from)?;

    if !response.status().is_success() {
        warn!(status = %response.status(), url = %url, "Failed to fetch file");
        return Err(FetchError::Status {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await.map_err(FetcherError::from)? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    if written == 0 {
        return Err(FetchError::EmptyBody);
    }

    Ok(written)
}

/// Bound `fut` by `timeout`
pub(crate) async fn with_timeout<F>(timeout: Duration, fut: F) -> Result<u64, FetchError>
where
    F: Future<Output = Result<u64, FetchError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| FetchError::Timeout(timeout))?
}
