//! Error types for the image pipeline
//!
//! Cache misses and non-cacheable requests are not errors; they are plain
//! `Option`s at the call sites. Everything that can surface to a caller of
//! [`ImageLoader::execute`](crate::loader::ImageLoader::execute) is a
//! [`PipelineError`].

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Filesystem error (disk cache, file fetcher)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A fetcher failed to produce data
    #[error("Fetch failed for {data}: {message}")]
    Fetch { data: String, message: String },

    /// The remote server answered with a non-success status
    #[error("HTTP {code} for {url}")]
    HttpStatus { code: u16, url: String },

    /// A decoder failed to produce an image
    #[error("Decode failed: {message}")]
    Decode { message: String },

    /// A transformation failed
    #[error("Transformation '{name}' failed: {message}")]
    Transform { name: String, message: String },

    /// No registered fetcher accepts the request data
    #[error("No fetcher supports data: {0}")]
    NoFetcher(String),

    /// No registered decoder accepts the fetched source
    #[error("No decoder supports source (mime type: {mime_type})")]
    NoDecoder { mime_type: String },

    /// The network was required but the request's network policy forbids it
    #[error("Network access disabled for {0} and no cached copy is available")]
    NetworkDisabled(String),

    /// An interceptor changed a field it is not allowed to touch
    #[error("Interceptor '{interceptor}' cannot modify the request's {field}")]
    InterceptorContract {
        interceptor: String,
        field: &'static str,
    },

    /// The request was cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl PipelineError {
    /// Whether this error represents cancellation rather than failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<String> for PipelineError {
    fn from(s: String) -> Self {
        PipelineError::Other(s)
    }
}

impl From<&str> for PipelineError {
    fn from(s: &str) -> Self {
        PipelineError::Other(s.to_string())
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            PipelineError::Cancelled
        } else {
            PipelineError::Other(format!("background task panicked: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = PipelineError::Fetch {
            data: "https://example.com/a.png".to_string(),
            message: "connection reset".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Fetch failed for https://example.com/a.png: connection reset"
        );

        let contract = PipelineError::InterceptorContract {
            interceptor: "ResizeHint".to_string(),
            field: "target",
        };
        assert_eq!(
            contract.to_string(),
            "Interceptor 'ResizeHint' cannot modify the request's target"
        );

        let status = PipelineError::HttpStatus {
            code: 404,
            url: "https://example.com/missing.png".to_string(),
        };
        assert!(status.to_string().contains("404"));
    }

    #[test]
    fn test_error_conversion() {
        let error: PipelineError = "test error".into();
        assert!(matches!(error, PipelineError::Other(_)));

        let error: PipelineError = "test error".to_string().into();
        assert!(matches!(error, PipelineError::Other(_)));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: PipelineError = io.into();
        assert!(matches!(error, PipelineError::Io(_)));
    }

    #[test]
    fn test_cancelled_is_distinguished() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(!PipelineError::Other("boom".into()).is_cancelled());
    }
}
