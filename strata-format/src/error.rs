//! Error types for the Strata format

use thiserror::Error;

/// Strata error types
#[derive(Debug, Error)]
pub enum StrataError {
    /// Encountered a type discriminant outside the defined range.
    #[error("Unknown tag type {0}")]
    UnknownTagType(u8),
    /// `read_object` found a top-level value that is not an Object.
    #[error("Expected object, got tag type {0}")]
    ExpectedObject(u8),
    /// Input ended while a value was still being decoded.
    #[error("Truncated tag input")]
    TruncatedInput,
    /// A signed 32-bit length prefix held a negative count.
    #[error("Negative length {0} in tag stream")]
    NegativeLength(i32),
    /// A configured decode limit was exceeded.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
    /// Chunk payload carries a compression discriminant other than 1 or 2.
    #[error("Unknown compression type {0}")]
    UnknownCompression(u8),
    /// A chunk stream's top-level object carried a non-empty name.
    #[error("Chunk object is unexpectedly named {0:?}")]
    UnexpectedName(String),
    /// A chunk stream contained more than one top-level value.
    #[error("Chunk object is not alone")]
    TrailingValue,
    /// Coordinate or slot index outside the region's addressable range.
    #[error("{0}")]
    SlotOutOfRange(String),
    /// Malformed caller input rejected before any I/O.
    #[error("{0}")]
    InvalidArgument(String),
    /// Write attempted against a file that was not opened writable.
    #[error("Block file is not writable")]
    NotWritable,
    /// I/O operation failed while reading or writing data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_discriminant() {
        let err = StrataError::UnknownTagType(99);
        assert_eq!(err.to_string(), "Unknown tag type 99");
        let err = StrataError::UnknownCompression(9);
        assert_eq!(err.to_string(), "Unknown compression type 9");
    }

    #[test]
    fn io_error_converts() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(StrataError::Io(_))));
    }
}
