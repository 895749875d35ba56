//! Per-block (de)compression for each registered backend. Every backend
//! compresses/decompresses one independent block at a time, which is what
//! lets `decompress_range` touch only the blocks it needs.

use std::io::{Read, Write};

use crate::error::CodecError;
use crate::params::CodecId;

pub fn compress_block(codec: CodecId, raw: &[u8], level: u8) -> Result<Vec<u8>, CodecError> {
    match codec {
        CodecId::Lz4 => Ok(lz4_flex::block::compress_prepend_size(raw)),
        CodecId::Zstd => zstd::bulk::compress(raw, level as i32)
            .map_err(|e| CodecError::CompressionFailed(format!("zstd: {e}"))),
        CodecId::Deflate => {
            let mut encoder = flate2::write::DeflateEncoder::new(
                Vec::new(),
                flate2::Compression::new(level as u32),
            );
            encoder
                .write_all(raw)
                .map_err(|e| CodecError::CompressionFailed(format!("deflate: {e}")))?;
            encoder
                .finish()
                .map_err(|e| CodecError::CompressionFailed(format!("deflate: {e}")))
        }
    }
}

pub fn decompress_block(codec: CodecId, compressed: &[u8], raw_len: usize) -> Result<Vec<u8>, CodecError> {
    match codec {
        CodecId::Lz4 => lz4_flex::block::decompress_size_prepended(compressed)
            .map_err(|e| CodecError::CorruptBuffer(format!("lz4: {e}"))),
        CodecId::Zstd => zstd::bulk::decompress(compressed, raw_len)
            .map_err(|e| CodecError::CorruptBuffer(format!("zstd: {e}"))),
        CodecId::Deflate => {
            let mut decoder = flate2::read::DeflateDecoder::new(compressed);
            let mut out = Vec::with_capacity(raw_len);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| CodecError::CorruptBuffer(format!("deflate: {e}")))?;
            Ok(out)
        }
    }
}
