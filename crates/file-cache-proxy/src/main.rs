//! File Cache Proxy - serves remote documents from a bounded local disk cache
//!
//! Documents are downloaded from S3-style object storage or Dropbox shared
//! links on first request and served from disk afterwards.

mod error;
mod server;
mod types;

use crate::error::{ProxyError, Result};
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ProxyConfig;
use file_cache::FileCache;
use file_cache_fetchers::{default_registry, ObjectStoreFetcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("file_cache_proxy=info".parse()?)
        .add_directive("file_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting File Cache Proxy...");

    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Cache size: {} files", config.cache_size);
    info!("Download timeout: {:?}", config.download_timeout);
    if !config.hashable_args.is_empty() {
        info!("Hashable args: {}", config.hashable_args.join(", "));
    }

    info!("Object store region: {}", config.aws_region);
    let mut object_store = ObjectStoreFetcher::from_env(config.aws_region.clone()).await;
    if let Some(endpoint) = &config.s3_endpoint {
        info!("Object store endpoint: {}", endpoint);
        object_store = object_store.with_endpoint(endpoint.clone());
    }

    let cache = FileCache::new(config.cache_config(), default_registry(object_store))?;
    let state: SharedState = Arc::new(ServerState::new(cache));

    start_server(state, config.port)
        .await
        .map_err(|e| ProxyError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

fn load_config() -> Result<ProxyConfig> {
    let defaults = ProxyConfig::default();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(defaults.port);

    let cache_dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.cache_dir);

    let cache_size = match std::env::var("CACHE_SIZE") {
        Ok(s) => s
            .parse::<usize>()
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| ProxyError::Config(format!("invalid CACHE_SIZE: {:?}", s)))?,
        Err(_) => defaults.cache_size,
    };

    let download_timeout = std::env::var("DOWNLOAD_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(defaults.download_timeout);

    let default_extension =
        std::env::var("DEFAULT_EXTENSION").unwrap_or(defaults.default_extension);

    let hashable_args = std::env::var("HASHABLE_ARGS")
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or(defaults.hashable_args);

    let aws_region = std::env::var("AWS_REGION").unwrap_or(defaults.aws_region);

    let s3_endpoint = std::env::var("S3_ENDPOINT")
        .ok()
        .filter(|s| !s.is_empty());

    let document_root = std::env::var("DOCUMENT_ROOT").unwrap_or(defaults.document_root);

    Ok(ProxyConfig {
        port,
        cache_dir,
        cache_size,
        download_timeout,
        default_extension,
        hashable_args,
        aws_region,
        s3_endpoint,
        document_root,
    })
}
