//! Error types for cache operations.

use std::fmt;

/// Operational errors returned by cache operations.
///
/// Every variant is a normal, recoverable outcome that callers are
/// expected to handle. Internal invariant violations are not represented
/// here; those panic with a diagnostic because they indicate a corrupted
/// cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// No object with the given id (or no such transaction/listing).
    NoEntry,

    /// Read offset past the end of the object.
    OutOfBounds,

    /// A refcount change would make the count negative.
    BadCount,

    /// Shrink could not reach the requested target; everything evictable
    /// was already dropped.
    Partial,

    /// The object does not fit: eviction cannot free enough bytes, or a
    /// fixed-size transaction buffer is full.
    NoSpace,

    /// An object with this id is already cached.
    AlreadyExists,

    /// The open-handle table is full.
    TooManyHandles,

    /// The handle does not name an open object.
    BadHandle,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEntry => write!(f, "no such object"),
            Self::OutOfBounds => write!(f, "offset out of bounds"),
            Self::BadCount => write!(f, "refcount would become negative"),
            Self::Partial => write!(f, "shrink target not reached"),
            Self::NoSpace => write!(f, "not enough space"),
            Self::AlreadyExists => write!(f, "object already exists"),
            Self::TooManyHandles => write!(f, "too many open handles"),
            Self::BadHandle => write!(f, "invalid handle"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_all_variants() {
        assert_eq!(format!("{}", CacheError::NoEntry), "no such object");
        assert_eq!(
            format!("{}", CacheError::OutOfBounds),
            "offset out of bounds"
        );
        assert_eq!(
            format!("{}", CacheError::BadCount),
            "refcount would become negative"
        );
        assert_eq!(
            format!("{}", CacheError::Partial),
            "shrink target not reached"
        );
        assert_eq!(format!("{}", CacheError::NoSpace), "not enough space");
        assert_eq!(
            format!("{}", CacheError::AlreadyExists),
            "object already exists"
        );
        assert_eq!(
            format!("{}", CacheError::TooManyHandles),
            "too many open handles"
        );
        assert_eq!(format!("{}", CacheError::BadHandle), "invalid handle");
    }

    #[test]
    fn test_error_is_error_trait() {
        fn assert_error<E: std::error::Error>() {}
        assert_error::<CacheError>();
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(CacheError::NoEntry, CacheError::NoEntry);
        assert_ne!(CacheError::NoEntry, CacheError::BadHandle);
    }
}
