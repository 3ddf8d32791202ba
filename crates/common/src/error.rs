//! Error types for the Eyes client

use thiserror::Error;

use crate::geometry::CoordinatesType;
use crate::types::TestResults;

/// Result type alias using the Eyes Error
pub type Result<T> = std::result::Result<T, Error>;

/// Eyes client error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{operation}: unexpected status {status}: {body}")]
    Protocol {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("{operation}: the server task has gone")]
    TaskGone { operation: String },

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Cannot convert coordinates from '{from}' to '{to}'")]
    UnsupportedConversion {
        from: CoordinatesType,
        to: CoordinatesType,
    },

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("{message}")]
    TestFailed {
        message: String,
        results: Option<Box<TestResults>>,
    },

    #[error("{message}")]
    DiffsFound {
        message: String,
        results: Box<TestResults>,
    },

    #[error("{message}")]
    NewTest {
        message: String,
        results: Box<TestResults>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The test results attached to a test outcome error, if any
    pub fn test_results(&self) -> Option<&TestResults> {
        match self {
            Error::TestFailed { results, .. } => results.as_deref(),
            Error::DiffsFound { results, .. } | Error::NewTest { results, .. } => Some(results),
            _ => None,
        }
    }

    /// Whether this error came from the transport rather than the protocol
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Io(_))
    }
}
