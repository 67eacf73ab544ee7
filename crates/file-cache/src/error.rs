//! Error types for the file cache

use crate::descriptor::BackendTag;
use std::fmt;
use std::time::Duration;

/// Errors raised while turning a raw remote identifier into a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    InvalidPath(String),
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::InvalidPath(path) => write!(f, "Invalid URL path: {:?}", path),
        }
    }
}

impl std::error::Error for DescriptorError {}

/// Errors reported by a [`Fetcher`](crate::Fetcher) backend
#[derive(Debug)]
pub enum FetchError {
    Timeout(Duration),
    EmptyBody,
    Status { status: u16, url: String },
    InvalidPath(String),
    Io(Box<std::io::Error>),
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Timeout(timeout) => write!(f, "Download timed out after {:?}", timeout),
            FetchError::EmptyBody => write!(f, "0 length file received"),
            FetchError::Status { status, url } => {
                write!(f, "Backend returned status {} for {}", status, url)
            }
            FetchError::InvalidPath(msg) => write!(f, "Invalid remote path: {}", msg),
            FetchError::Io(err) => write!(f, "Failed to write local file: {}", err),
            FetchError::Backend(err) => write!(f, "Backend error: {}", err),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Io(err) => Some(err.as_ref()),
            FetchError::Backend(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io(Box::new(err))
    }
}

/// Errors from cache operations
#[derive(Debug)]
pub enum CacheError {
    Config(String),
    Descriptor(DescriptorError),
    NoFetcher(BackendTag),
    Fetch(FetchError),
    Io(Box<std::io::Error>),
    NotFetched { key: String },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CacheError::Descriptor(err) => write!(f, "Descriptor error: {}", err),
            CacheError::NoFetcher(tag) => write!(f, "No fetcher registered for backend {}", tag),
            CacheError::Fetch(err) => write!(f, "Fetch error: {}", err),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::NotFetched { key } => {
                write!(f, "Concurrent download of {} did not produce a cache entry", key)
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Descriptor(err) => Some(err),
            CacheError::Fetch(err) => Some(err),
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<DescriptorError> for CacheError {
    fn from(err: DescriptorError) -> Self {
        CacheError::Descriptor(err)
    }
}

impl From<FetchError> for CacheError {
    fn from(err: FetchError) -> Self {
        CacheError::Fetch(err)
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_display() {
        let err = DescriptorError::InvalidPath("/documents/foo.pdf".to_string());
        assert_eq!(
            format!("{}", err),
            "Invalid URL path: \"/documents/foo.pdf\""
        );
    }

    #[test]
    fn test_empty_body_display() {
        let err = CacheError::Fetch(FetchError::EmptyBody);
        assert_eq!(format!("{}", err), "Fetch error: 0 length file received");
    }

    #[test]
    fn test_no_fetcher_display() {
        let err = CacheError::NoFetcher(BackendTag::DROPBOX);
        assert_eq!(
            format!("{}", err),
            "No fetcher registered for backend dropbox"
        );
    }

    #[test]
    fn test_fetch_error_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = CacheError::Fetch(FetchError::from(io));
        let source = err.source().unwrap();
        assert!(source.to_string().contains("read-only"));
    }

    #[test]
    fn test_error_is_debug() {
        let err = CacheError::NotFetched {
            key: "bilbo".to_string(),
        };
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("NotFetched"));
    }
}
