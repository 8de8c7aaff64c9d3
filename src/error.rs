//! Error surface of the snapshot reader.
//!
//! Remote failures are carried verbatim in [`Error::Service`]; everything else
//! is a condition detected by the reader itself.

use std::io::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Listing or fetch failure reported by the block service.
    #[error(transparent)]
    Service(#[from] anyhow::Error),

    /// A fetched or cached block does not have the declared block size.
    #[error("invalid block size for block {index}: got {actual} bytes, expected {expected}")]
    BlockSizeMismatch {
        index: u64,
        expected: u32,
        actual: usize,
    },

    /// The listing itself is unusable (bad block size, volume size overflow, ...).
    #[error("invalid block listing: {0}")]
    InvalidListing(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid seek to a negative or overflowing position")]
    InvalidSeek,

    #[error("unexpected end of snapshot")]
    UnexpectedEof,
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        let kind = match &value {
            Error::BlockSizeMismatch { .. } | Error::InvalidListing(_) => ErrorKind::InvalidData,
            Error::Cancelled => ErrorKind::Interrupted,
            Error::DeadlineExceeded => ErrorKind::TimedOut,
            Error::InvalidSeek => ErrorKind::InvalidInput,
            Error::UnexpectedEof => ErrorKind::UnexpectedEof,
            Error::Service(_) => ErrorKind::Other,
        };
        std::io::Error::new(kind, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let err: std::io::Error = Error::BlockSizeMismatch {
            index: 3,
            expected: 512,
            actual: 100,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("block 3"));

        let err: std::io::Error = Error::DeadlineExceeded.into();
        assert_eq!(err.kind(), ErrorKind::TimedOut);

        let err: std::io::Error = Error::InvalidSeek.into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_service_error_is_transparent() {
        let err = Error::from(anyhow::anyhow!("throttled by remote"));
        assert_eq!(err.to_string(), "throttled by remote");
    }
}
