use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("Failed to decode image {}: {reason}", .path.display())]
    ImageDecode { path: PathBuf, reason: String },

    #[error("Failed to encode image {}: {reason}", .path.display())]
    ImageEncode { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid reference database: {0}")]
    Database(String),

    #[error("Perceptual hash error: {0}")]
    PerceptualHash(String),

    #[error("Feature index error: {0}")]
    Index(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[cfg(feature = "network")]
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, MatchError>;
