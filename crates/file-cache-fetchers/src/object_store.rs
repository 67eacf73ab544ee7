//! S3 object storage downloads
//!
//! The bucket is the first segment of the descriptor path and everything
//! after it is the object key. Requests go through the AWS SDK, so they are
//! signed with whatever the default credential chain provides.

use crate::download::with_timeout;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use file_cache::{Descriptor, FetchError, Fetcher};
use moka::future::Cache;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const REGION_HEADER: &str = "x-amz-bucket-region";

/// Downloads objects from S3 or an S3-compatible store.
///
/// Each bucket's region is looked up once with `HeadBucket` and a client
/// configured for it is kept for later downloads. Buckets are never
/// forgotten, so this suits a bounded set of buckets.
#[derive(Clone)]
pub struct ObjectStoreFetcher {
    config: SdkConfig,
    default_region: String,
    endpoint: Option<String>,
    clients: Cache<String, Client>,
}

impl ObjectStoreFetcher {
    /// Load credentials and settings from the environment, preferring
    /// `default_region` when locating buckets
    pub async fn from_env(default_region: impl Into<String>) -> Self {
        let default_region = default_region.into();
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(default_region.clone()))
            .load()
            .await;
        Self::new(config, default_region)
    }

    pub fn new(config: SdkConfig, default_region: impl Into<String>) -> Self {
        Self {
            config,
            default_region: default_region.into(),
            endpoint: None,
            // bucket -> client for its region, no expiry
            clients: Cache::new(1_000),
        }
    }

    /// Talk to a path-style endpoint such as MinIO instead of AWS
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    /// Split `<bucket>/<key...>`
    pub fn split_path(path: &str) -> Result<(&str, &str), FetchError> {
        match path.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
            _ => Err(FetchError::InvalidPath(format!(
                "not enough path to fetch a file, expected <bucket>/<filename>: {:?}",
                path
            ))),
        }
    }

    fn client_for_region(&self, region: &str) -> Client {
        let mut builder =
            aws_sdk_s3::config::Builder::from(&self.config).region(Region::new(region.to_string()));
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Client::from_conf(builder.build())
    }

    /// Client for the region hosting `bucket`. A lookup that fails for any
    /// reason other than a missing bucket falls back to the default region
    /// and is retried next time.
    async fn client_for_bucket(&self, bucket: &str) -> Result<Client, FetchError> {
        if let Some(client) = self.clients.get(bucket).await {
            return Ok(client);
        }

        let client = self.client_for_region(&self.default_region);
        let region = match client.head_bucket().bucket(bucket).send().await {
            Ok(output) => Some(
                output
                    .bucket_region()
                    .unwrap_or(self.default_region.as_str())
                    .to_string(),
            ),
            Err(err) => {
                let raw = err.raw_response();
                // Wrong-region answers still name the right region
                if let Some(region) = raw.and_then(|r| r.headers().get(REGION_HEADER)) {
                    Some(region.to_string())
                } else if raw.map(|r| r.status().as_u16()) == Some(404) {
                    return Err(FetchError::Status {
                        status: 404,
                        url: format!("s3://{}", bucket),
                    });
                } else {
                    warn!(bucket, error = %DisplayErrorContext(&err), "Failed to look up bucket region");
                    None
                }
            }
        };

        let Some(region) = region else {
            return Ok(client);
        };

        debug!(bucket, region = %region, "Resolved bucket region");
        let client = if region == self.default_region {
            client
        } else {
            self.client_for_region(&region)
        };
        self.clients.insert(bucket.to_string(), client.clone()).await;
        Ok(client)
    }
}

/// Non-2xx answers become [`FetchError::Status`]; anything else is a backend
/// error carrying the full SDK context
fn sdk_error<E>(url: String, err: SdkError<E, HttpResponse>) -> FetchError
where
    E: std::error::Error + 'static,
{
    match err.raw_response().map(|r| r.status().as_u16()) {
        Some(status) if !(200..300).contains(&status) => FetchError::Status { status, url },
        _ => FetchError::Backend(format!("{}", DisplayErrorContext(&err)).into()),
    }
}

async fn write_body(mut body: ByteStream, file: &mut File) -> Result<u64, FetchError> {
    let mut written: u64 = 0;
    while let Some(chunk) = body
        .try_next()
        .await
        .map_err(|e| FetchError::Backend(Box::new(e)))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    if written == 0 {
        return Err(FetchError::EmptyBody);
    }
    Ok(written)
}

#[async_trait]
impl Fetcher for ObjectStoreFetcher {
    /// Context arguments are not sent to S3; requests are authorized by the
    /// SDK's credentials alone.
    async fn fetch(
        &self,
        descriptor: &Descriptor,
        file: &mut File,
        timeout: Duration,
    ) -> Result<u64, FetchError> {
        let (bucket, key) = Self::split_path(descriptor.path())?;

        let started = Instant::now();
        let written = with_timeout(timeout, async {
            let client = self.client_for_bucket(bucket).await?;
            let object = client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| sdk_error(format!("s3://{}/{}", bucket, key), err))?;
            write_body(object.body, file).await
        })
        .await?;

        info!(
            bucket,
            key,
            bytes = written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Downloaded object"
        );
        Ok(written)
    }
}
