use thiserror::Error;

/// Errors raised by the compression codec wrapper.
///
/// These map directly onto the `carray-core` error kinds of the same name;
/// `carray-core` converts a `CodecError` into its own `CArrayError` at the
/// boundary rather than re-deriving the distinction.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown codec: {0}")]
    UnknownCodec(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("corrupt compressed buffer: {0}")]
    CorruptBuffer(String),

    #[error("type size {0} is too large for this codec")]
    TypeTooLarge(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
