//! Common error types used throughout imagevault.
//!
//! This module provides a unified error type covering registry failures
//! (not found, duplicate, illegal transition), authorization denials, and
//! storage backend failures (full media, denied writes, size cap).

/// Common error type for imagevault.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested record or backend object was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the supplied identifier already exists.
    #[error("An image with identifier {0} already exists")]
    Duplicate(String),

    /// Denied by policy or by lifecycle protection.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The operation is illegal for the record's current status.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed metadata, bad filter, or otherwise invalid input.
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// The storage backend has no space left.
    #[error("Image storage media is full")]
    StorageFull,

    /// The storage backend refused the write.
    #[error("Insufficient permissions on image storage media")]
    StorageWriteDenied,

    /// The upload exceeded the maximum permitted image size.
    #[error("Image exceeds the maximum permitted size")]
    SizeLimitExceeded,

    /// No storage backend is registered for the requested scheme.
    #[error("Store for scheme {0} not found")]
    UnknownScheme(String),

    /// A metadata store operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Duplicate error.
    pub fn duplicate<S: Into<String>>(id: S) -> Self {
        Self::Duplicate(id.into())
    }

    /// Create a new Forbidden error.
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a new Conflict error.
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a new Invalid error.
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::Invalid(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("image abc");
        assert_eq!(err.to_string(), "Not found: image abc");

        let err = Error::duplicate("abc");
        assert_eq!(
            err.to_string(),
            "An image with identifier abc already exists"
        );

        let err = Error::forbidden("image is protected");
        assert_eq!(err.to_string(), "Forbidden: image is protected");

        let err = Error::conflict("cannot upload to an unqueued image");
        assert_eq!(
            err.to_string(),
            "Conflict: cannot upload to an unqueued image"
        );

        let err = Error::UnknownScheme("swift".to_string());
        assert_eq!(err.to_string(), "Store for scheme swift not found");

        let err = Error::SizeLimitExceeded;
        assert_eq!(
            err.to_string(),
            "Image exceeds the maximum permitted size"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(Error::not_found("x"), Error::NotFound(_)));
        assert!(matches!(Error::duplicate("x"), Error::Duplicate(_)));
        assert!(matches!(Error::forbidden("x"), Error::Forbidden(_)));
        assert!(matches!(Error::conflict("x"), Error::Conflict(_)));
        assert!(matches!(Error::invalid("x"), Error::Invalid(_)));
        assert!(matches!(Error::database("x"), Error::Database(_)));
        assert!(matches!(Error::internal("x"), Error::Internal(_)));
    }

    #[test]
    fn test_result_type() {
        fn ok_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(ok_fn().unwrap(), 42);

        fn err_fn() -> Result<i32> {
            Err(Error::StorageFull)
        }
        assert!(err_fn().is_err());
    }
}
