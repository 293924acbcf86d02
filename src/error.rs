use std::path::PathBuf;
use thiserror::Error;

/// Errors raised anywhere in the ingestion, indexing and answering pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// The corpus directory does not exist (or is not a directory)
    #[error("corpus directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// A corpus file has an extension no loader understands
    #[error("unsupported file type for {file}: {mime_type}")]
    UnsupportedFileType { file: String, mime_type: String },

    /// Text could not be extracted from a single file or record
    #[error("failed to extract {file}: {reason}")]
    ExtractionFailure { file: String, reason: String },

    /// Invalid settings, e.g. an overlap that is not smaller than the chunk size
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Nothing to index after loading and splitting the corpus
    #[error("no documents to index in {}", .0.display())]
    EmptyCorpus(PathBuf),

    #[error("embedding failed: {0}")]
    Embedding(#[source] ProviderError),

    /// A persisted snapshot is unreadable or inconsistent with the configuration
    #[error("index snapshot at {} is corrupt: {reason}", .path.display())]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("language model failed: {0}")]
    Llm(#[source] ProviderError),

    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::IndexCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of an external model service (embedding or generation)
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport failure, including request timeouts
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API request failed: {status} {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_display() {
        let err = Error::Configuration("overlap must be smaller than chunk_size".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: overlap must be smaller than chunk_size"
        );
    }

    #[test]
    fn test_index_corrupt_display() {
        let err = Error::corrupt("idx", "checksum mismatch");
        assert_eq!(
            err.to_string(),
            "index snapshot at idx is corrupt: checksum mismatch"
        );
    }

    #[test]
    fn test_provider_error_is_source() {
        let err = Error::Llm(ProviderError::Status {
            status: 500,
            body: "boom".to_string(),
        });
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("API request failed: 500 boom"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
