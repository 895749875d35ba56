use std::path::PathBuf;
use thiserror::Error;

use carray_codecs::CodecError;

/// Error kinds from spec §7. Every variant is fatal to the failing call;
/// the `CArray` is left exactly as it was before the call.
#[derive(Debug, Error)]
pub enum CArrayError {
    #[error("array is read-only")]
    ReadOnly,

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("type size {0} is too large")]
    TypeTooLarge(usize),

    #[error("unknown codec: {0}")]
    UnknownCodec(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("corrupt buffer: {0}")]
    CorruptBuffer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("root directory already exists: {}", .0.display())]
    RootExists(PathBuf),

    #[error("metadata error: {0}")]
    Meta(#[from] serde_json::Error),
}

impl From<CodecError> for CArrayError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::UnknownCodec(s) => CArrayError::UnknownCodec(s),
            CodecError::CompressionFailed(s) => CArrayError::CompressionFailed(s),
            CodecError::CorruptBuffer(s) => CArrayError::CorruptBuffer(s),
            CodecError::TypeTooLarge(n) => CArrayError::TypeTooLarge(n),
            CodecError::InvalidArgument(s) => CArrayError::InvalidArgument(s),
        }
    }
}
