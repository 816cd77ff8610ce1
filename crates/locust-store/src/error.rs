use std::path::PathBuf;

use locust_core::LocustError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("{path}: {reason}")]
    Georeference { path: PathBuf, reason: String },

    #[error("{path}: unsupported sample format {format}")]
    SampleFormat { path: PathBuf, format: String },

    /// Strip or tile layout the window reader cannot follow.
    #[error("{path}: {reason}")]
    Layout { path: PathBuf, reason: String },

    #[error("tile {0} has no path in the catalog")]
    NoPath(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] LocustError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for LocustError {
    /// Store failures surface to the core as Geometry Store errors, except
    /// core errors, which pass through unchanged.
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Core(inner) => inner,
            other => LocustError::GeometryStore(other.to_string()),
        }
    }
}
