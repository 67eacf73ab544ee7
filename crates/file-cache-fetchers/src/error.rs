//! Error types for the HTTP fetchers

use file_cache::FetchError;
use std::fmt;

#[derive(Debug)]
pub enum FetcherError {
    Http(Box<reqwest::Error>),
    Decode(String),
    InvalidUrl(String),
}

impl fmt::Display for FetcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetcherError::Http(err) => write!(f, "HTTP error: {}", err),
            FetcherError::Decode(msg) => write!(f, "Could not decode file URL: {}", msg),
            FetcherError::InvalidUrl(msg) => write!(f, "Invalid file URL: {}", msg),
        }
    }
}

impl std::error::Error for FetcherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetcherError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetcherError {
    fn from(err: reqwest::Error) -> Self {
        FetcherError::Http(Box::new(err))
    }
}

impl From<FetcherError> for FetchError {
    fn from(err: FetcherError) -> Self {
        match err {
            FetcherError::Http(_) => FetchError::Backend(Box::new(err)),
            FetcherError::Decode(_) | FetcherError::InvalidUrl(_) => {
                FetchError::InvalidPath(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FetcherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = FetcherError::Decode("invalid byte".to_string());
        assert_eq!(format!("{}", err), "Could not decode file URL: invalid byte");
    }

    #[test]
    fn test_decode_error_maps_to_invalid_path() {
        let err: FetchError = FetcherError::InvalidUrl("relative URL without a base".into()).into();
        assert!(matches!(err, FetchError::InvalidPath(msg) if msg.contains("relative URL")));
    }

    #[test]
    fn test_error_is_debug() {
        let err = FetcherError::Decode("test".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("Decode"));
    }
}
