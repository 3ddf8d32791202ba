//! Error types for the end-to-end harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Fake service failed to start: {0}")]
    ServerStartup(String),

    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Eyes error: {0}")]
    Eyes(#[from] eyes_common::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
