use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PtmError>;

#[derive(Error, Debug)]
pub enum PtmError {
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("No .plymouth file found in {}", .0.display())]
    MarkerNotFound(PathBuf),

    #[error("Archive contains {0} .plymouth files, expected exactly one")]
    AmbiguousMarker(usize),

    #[error("Invalid theme name: {0:?}")]
    InvalidThemeName(String),

    #[error("{program} failed: {stderr}")]
    CommandFailed { program: String, stderr: String },

    #[error("Theme catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Background(String),
}
