//! Block-oriented, self-describing compression wrapper.
//!
//! A compressed buffer produced by [`compress`] carries its own 16-byte
//! header (see [`header::BufferInfo`]) plus a per-block length table, so
//! [`decompress_range`] can decode a contiguous sub-range of items by
//! touching only the blocks that intersect it.

pub mod backend;
pub mod context;
pub mod error;
pub mod header;
pub mod params;
pub mod quantize;
pub mod shuffle;

pub use context::CodecContext;
pub use error::CodecError;
pub use header::BufferInfo;
pub use params::{CParams, CodecId, FloatWidth, QuantizeSpec, Shuffle, ThreadMode};

use header::{decode_index, encode_index, index_size, HEADER_SIZE};
use rayon::prelude::*;

const DEFAULT_TARGET_BLOCK_SIZE: usize = 64 * 1024;

fn choose_block_size(n_bytes: usize, item_size: usize) -> u32 {
    let item_size = item_size.max(1);
    let target = DEFAULT_TARGET_BLOCK_SIZE.min(n_bytes.max(item_size));
    let rounded = (target / item_size).max(1) * item_size;
    rounded as u32
}

fn block_raw_len(block_idx: usize, n_blocks: usize, block_size: usize, n_bytes: usize) -> usize {
    if block_idx + 1 == n_blocks {
        n_bytes - block_idx * block_size
    } else {
        block_size
    }
}

/// Compress `src[..n_bytes]` under `params`, returning the self-describing
/// buffer and the block size actually used.
pub fn compress(
    src: &[u8],
    item_size: usize,
    n_bytes: usize,
    params: &CParams,
    ctx: &CodecContext,
) -> Result<(Vec<u8>, u32), CodecError> {
    params.validate()?;
    if item_size == 0 {
        return Err(CodecError::InvalidArgument("item_size must be > 0".into()));
    }
    if n_bytes > src.len() {
        return Err(CodecError::InvalidArgument(format!(
            "n_bytes {n_bytes} exceeds source buffer length {}",
            src.len()
        )));
    }

    let mut working = src[..n_bytes].to_vec();
    let mut flags = 0u8;

    if let Some(spec) = params.quantize {
        quantize::quantize(&mut working, spec);
        flags |= header::FLAG_QUANTIZED;
    }

    let block_size = params.block_size.unwrap_or_else(|| choose_block_size(n_bytes, item_size));
    let block_size_usize = block_size.max(1) as usize;
    let n_blocks = if n_bytes == 0 {
        0
    } else {
        (n_bytes + block_size_usize - 1) / block_size_usize
    };

    let shuffle_mode = params.shuffle;
    match shuffle_mode {
        Shuffle::None => {}
        Shuffle::Byte => flags |= header::FLAG_BYTE_SHUFFLE,
        Shuffle::Bit => flags |= header::FLAG_BIT_SHUFFLE,
    }

    let transform = |block: &[u8]| -> Vec<u8> {
        match shuffle_mode {
            Shuffle::None => block.to_vec(),
            Shuffle::Byte => shuffle::byte_shuffle(block, item_size),
            Shuffle::Bit => shuffle::bit_shuffle(block, item_size),
        }
    };

    let raw_blocks: Vec<&[u8]> = working.chunks(block_size_usize).collect();
    let use_threads = ctx.threads_allowed(params.threads);
    if use_threads {
        tracing::debug!(n_blocks, "compressing blocks in parallel");
    } else {
        tracing::debug!(n_blocks, "compressing blocks serially");
    }

    let compress_one = |block: &[u8]| -> Result<Vec<u8>, CodecError> {
        let transformed = transform(block);
        backend::compress_block(params.codec, &transformed, params.level)
    };

    let compressed_blocks: Vec<Vec<u8>> = if use_threads {
        raw_blocks
            .par_iter()
            .map(|b| compress_one(b))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        raw_blocks
            .iter()
            .map(|b| compress_one(b))
            .collect::<Result<Vec<_>, _>>()?
    };

    let lengths: Vec<u32> = compressed_blocks.iter().map(|b| b.len() as u32).collect();
    let index_bytes = encode_index(&lengths);
    let payload_len: usize = compressed_blocks.iter().map(|b| b.len()).sum();
    let c_bytes = HEADER_SIZE + index_bytes.len() + payload_len;

    let info = BufferInfo {
        version: 1,
        flags,
        type_size: if item_size <= 255 { item_size as u8 } else { 0 },
        codec_id: params.codec as u8,
        n_bytes: n_bytes as u32,
        block_size,
        c_bytes: c_bytes as u32,
    };

    let mut out = Vec::with_capacity(c_bytes);
    out.extend_from_slice(&info.encode());
    out.extend_from_slice(&index_bytes);
    for block in &compressed_blocks {
        out.extend_from_slice(block);
    }

    Ok((out, block_size))
}

/// Decompress the entire buffer into `dest`, which must be exactly
/// `n_bytes` long.
pub fn decompress(
    src: &[u8],
    dest: &mut [u8],
    n_bytes: usize,
    ctx: &CodecContext,
) -> Result<(), CodecError> {
    let info = BufferInfo::decode(src)?;
    if info.n_bytes as usize != n_bytes {
        return Err(CodecError::CorruptBuffer(format!(
            "header declares {} bytes, caller expected {}",
            info.n_bytes, n_bytes
        )));
    }
    if dest.len() != n_bytes {
        return Err(CodecError::InvalidArgument(format!(
            "dest length {} does not match n_bytes {}",
            dest.len(),
            n_bytes
        )));
    }

    let item_size = if info.type_size == 0 { 1 } else { info.type_size as usize };
    let n_blocks = info.n_blocks();
    let block_size = info.block_size as usize;

    let (offsets, lengths) = locate_blocks(src, &info, n_blocks)?;

    let use_threads = ctx.threads_allowed(ThreadMode::Adaptive);
    let decode_one = |i: usize| -> Result<Vec<u8>, CodecError> {
        let start = offsets[i];
        let len = lengths[i] as usize;
        let end = start + len;
        if end > src.len() {
            return Err(CodecError::CorruptBuffer(format!(
                "block {i} overruns buffer: needs {end} bytes, have {}",
                src.len()
            )));
        }
        let raw_len = block_raw_len(i, n_blocks, block_size, n_bytes);
        let raw = backend::decompress_block(CodecId::try_from(info.codec_id)?, &src[start..end], raw_len)?;
        Ok(unshuffle(&raw, item_size, info))
    };

    let decoded: Vec<Vec<u8>> = if use_threads && n_blocks > 1 {
        (0..n_blocks)
            .into_par_iter()
            .map(decode_one)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        (0..n_blocks).map(decode_one).collect::<Result<Vec<_>, _>>()?
    };

    let mut pos = 0;
    for block in decoded {
        dest[pos..pos + block.len()].copy_from_slice(&block);
        pos += block.len();
    }
    Ok(())
}

/// Decompress only the items in `[start_item, start_item + n_items)`,
/// decoding the minimal span of blocks that covers them.
pub fn decompress_range(
    src: &[u8],
    start_item: usize,
    n_items: usize,
    dest: &mut [u8],
    _ctx: &CodecContext,
) -> Result<(), CodecError> {
    let info = BufferInfo::decode(src)?;
    let item_size = if info.type_size == 0 { 1 } else { info.type_size as usize };
    let start_byte = start_item * item_size;
    let end_byte = start_byte + n_items * item_size;

    if end_byte > info.n_bytes as usize {
        return Err(CodecError::CorruptBuffer(format!(
            "range [{start_byte}, {end_byte}) exceeds buffer n_bytes {}",
            info.n_bytes
        )));
    }
    if dest.len() != n_items * item_size {
        return Err(CodecError::InvalidArgument(
            "dest length does not match n_items * item_size".into(),
        ));
    }
    if n_items == 0 {
        return Ok(());
    }

    let block_size = info.block_size as usize;
    let n_blocks = info.n_blocks();
    let first_block = start_byte / block_size;
    let last_block = (end_byte - 1) / block_size;

    let (offsets, lengths) = locate_blocks(src, &info, n_blocks)?;

    let mut dest_pos = 0;
    for block_idx in first_block..=last_block {
        let start = offsets[block_idx];
        let len = lengths[block_idx] as usize;
        let end = start + len;
        if end > src.len() {
            return Err(CodecError::CorruptBuffer(format!(
                "block {block_idx} overruns buffer"
            )));
        }
        let raw_len = block_raw_len(block_idx, n_blocks, block_size, info.n_bytes as usize);
        let raw = backend::decompress_block(CodecId::try_from(info.codec_id)?, &src[start..end], raw_len)?;
        let raw = unshuffle(&raw, item_size, info);

        let block_start_byte = block_idx * block_size;
        let slice_start = if block_idx == first_block {
            start_byte - block_start_byte
        } else {
            0
        };
        let slice_end = if block_idx == last_block {
            end_byte - block_start_byte
        } else {
            raw.len()
        };

        let n = slice_end - slice_start;
        dest[dest_pos..dest_pos + n].copy_from_slice(&raw[slice_start..slice_end]);
        dest_pos += n;
    }

    Ok(())
}

/// Parse the header and block index, returning the count/size/etc without
/// decompressing any payload.
pub fn buffer_info(src: &[u8]) -> Result<BufferInfo, CodecError> {
    BufferInfo::decode(src)
}

fn unshuffle(raw: &[u8], item_size: usize, info: BufferInfo) -> Vec<u8> {
    if info.has_flag(header::FLAG_BYTE_SHUFFLE) {
        shuffle::byte_unshuffle(raw, item_size)
    } else if info.has_flag(header::FLAG_BIT_SHUFFLE) {
        shuffle::bit_unshuffle(raw, item_size)
    } else {
        raw.to_vec()
    }
}

fn locate_blocks(src: &[u8], info: &BufferInfo, n_blocks: usize) -> Result<(Vec<usize>, Vec<u32>), CodecError> {
    let index_start = HEADER_SIZE;
    let index_end = index_start + index_size(n_blocks);
    if index_end > src.len() {
        return Err(CodecError::CorruptBuffer("block index truncated".into()));
    }
    let lengths = decode_index(&src[index_start..index_end], n_blocks)?;
    let mut offsets = Vec::with_capacity(n_blocks);
    let mut pos = index_end;
    for &len in &lengths {
        offsets.push(pos);
        pos += len as usize;
    }
    let _ = info;
    Ok((offsets, lengths))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(codec: CodecId, shuffle: Shuffle) -> CParams {
        CParams {
            level: 5,
            shuffle,
            codec,
            quantize: None,
            block_size: Some(64),
            threads: ThreadMode::AlwaysOff,
        }
    }

    fn roundtrip(codec: CodecId, shuffle: Shuffle) {
        let ctx = CodecContext::new();
        let data: Vec<u8> = (0..2000u32).flat_map(|v| v.to_le_bytes()).collect();
        let (compressed, _) = compress(&data, 4, data.len(), &params(codec, shuffle), &ctx).unwrap();

        let mut dest = vec![0u8; data.len()];
        decompress(&compressed, &mut dest, data.len(), &ctx).unwrap();
        assert_eq!(dest, data, "{codec:?}/{shuffle:?} full decompress mismatch");

        let info = buffer_info(&compressed).unwrap();
        assert_eq!(info.n_bytes as usize, data.len());

        let mut range_dest = vec![0u8; 4 * 10];
        decompress_range(&compressed, 50, 10, &mut range_dest, &ctx).unwrap();
        assert_eq!(&range_dest[..], &data[200..240]);
    }

    #[test]
    fn lz4_roundtrip_all_shuffles() {
        roundtrip(CodecId::Lz4, Shuffle::None);
        roundtrip(CodecId::Lz4, Shuffle::Byte);
        roundtrip(CodecId::Lz4, Shuffle::Bit);
    }

    #[test]
    fn zstd_roundtrip() {
        roundtrip(CodecId::Zstd, Shuffle::Byte);
    }

    #[test]
    fn deflate_roundtrip() {
        roundtrip(CodecId::Deflate, Shuffle::Byte);
    }

    #[test]
    fn unknown_codec_name_rejected() {
        assert!(CodecId::from_name("bogus").is_err());
    }

    #[test]
    fn range_spanning_blocks() {
        let ctx = CodecContext::new();
        let data: Vec<u8> = (0..5000u32).flat_map(|v| v.to_le_bytes()).collect();
        let (compressed, _) =
            compress(&data, 4, data.len(), &params(CodecId::Zstd, Shuffle::None), &ctx).unwrap();
        let mut dest = vec![0u8; 4 * 40];
        decompress_range(&compressed, 10, 40, &mut dest, &ctx).unwrap();
        assert_eq!(&dest[..], &data[40..200]);
    }
}
