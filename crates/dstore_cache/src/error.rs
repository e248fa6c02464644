//! Error types for the cache layer.
//!
//! Cache errors are always recovered inside the layer and logged; they never
//! become datastore errors.

use dstore_codec::CodecError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by cache backends and item encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The cache could not serve the request.
    #[error("cache unavailable: {message}")]
    Unavailable {
        /// What went wrong.
        message: String,
    },

    /// An item or payload could not be encoded or decoded.
    #[error("cache encoding error: {message}")]
    Encoding {
        /// What went wrong.
        message: String,
    },

    /// CBOR error from the payload codec.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl CacheError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            CacheError::unavailable("down").to_string(),
            "cache unavailable: down"
        );
        let err: CacheError = CodecError::NaNForbidden.into();
        assert!(matches!(err, CacheError::Codec(_)));
    }
}
