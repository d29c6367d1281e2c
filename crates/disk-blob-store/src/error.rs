//! Error types for the disk blob store

use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    /// The cache directory does not exist and could not be created.
    Unavailable(Box<std::io::Error>),
    /// A blob could not be written.
    Write(Box<std::io::Error>),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(err) => write!(f, "cache directory unavailable: {}", err),
            StoreError::Write(err) => write!(f, "blob write failed: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Unavailable(err) => Some(err.as_ref()),
            StoreError::Write(err) => Some(err.as_ref()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
