//! Error types for StrataDB.

use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in StrataDB operations.
#[derive(Debug, Error)]
pub enum StrataError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("page not resident: {page_id}")]
    PageNotResident { page_id: u32 },

    // Index errors
    #[error("duplicate key")]
    DuplicateKey,

    #[error("key not found")]
    KeyNotFound,

    #[error("index node full")]
    NodeFull,

    #[error("corrupted page: {0}")]
    Corrupted(String),

    // Configuration errors
    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: StrataError = io_err.into();
        assert!(matches!(err, StrataError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = StrataError::BufferPoolFull;
        assert_eq!(
            err.to_string(),
            "buffer pool full, unable to allocate frame"
        );
    }

    #[test]
    fn test_page_not_resident_display() {
        let err = StrataError::PageNotResident { page_id: 42 };
        assert_eq!(err.to_string(), "page not resident: 42");
    }

    #[test]
    fn test_index_errors_display() {
        assert_eq!(StrataError::DuplicateKey.to_string(), "duplicate key");
        assert_eq!(StrataError::KeyNotFound.to_string(), "key not found");
        assert_eq!(StrataError::NodeFull.to_string(), "index node full");

        let err = StrataError::Corrupted("bad page type".to_string());
        assert_eq!(err.to_string(), "corrupted page: bad page type");
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = StrataError::InvalidParameter {
            name: "num_frames".to_string(),
            value: "0".to_string(),
        };
        assert_eq!(err.to_string(), "invalid parameter: num_frames = 0");
    }

    #[test]
    fn test_internal_error_display() {
        let err = StrataError::Internal("assertion failed".to_string());
        assert_eq!(err.to_string(), "internal error: assertion failed");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(StrataError::KeyNotFound)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StrataError>();
    }
}
