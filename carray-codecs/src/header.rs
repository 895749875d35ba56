use crate::error::CodecError;

pub const HEADER_SIZE: usize = 16;

pub const FLAG_BYTE_SHUFFLE: u8 = 1 << 0;
pub const FLAG_BIT_SHUFFLE: u8 = 1 << 1;
pub const FLAG_QUANTIZED: u8 = 1 << 2;

/// The self-describing header every compressed buffer this crate produces
/// carries in its first 16 bytes (spec §4.1 `buffer_info`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub version: u8,
    pub flags: u8,
    /// 0 when the true item size didn't fit in a byte (caller already knows
    /// it out of band in that case — see spec §4.2's type-size fallback).
    pub type_size: u8,
    pub codec_id: u8,
    pub n_bytes: u32,
    pub block_size: u32,
    /// Total length of this buffer, header included.
    pub c_bytes: u32,
}

impl BufferInfo {
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn n_blocks(&self) -> usize {
        if self.block_size == 0 {
            0
        } else {
            ((self.n_bytes as u64 + self.block_size as u64 - 1) / self.block_size as u64) as usize
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.version;
        buf[1] = self.flags;
        buf[2] = self.type_size;
        buf[3] = self.codec_id;
        buf[4..8].copy_from_slice(&self.n_bytes.to_le_bytes());
        buf[8..12].copy_from_slice(&self.block_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.c_bytes.to_le_bytes());
        buf
    }

    pub fn decode(src: &[u8]) -> Result<Self, CodecError> {
        if src.len() < HEADER_SIZE {
            return Err(CodecError::CorruptBuffer(format!(
                "buffer of {} bytes shorter than the {}-byte header",
                src.len(),
                HEADER_SIZE
            )));
        }
        Ok(BufferInfo {
            version: src[0],
            flags: src[1],
            type_size: src[2],
            codec_id: src[3],
            n_bytes: u32::from_le_bytes(src[4..8].try_into().unwrap()),
            block_size: u32::from_le_bytes(src[8..12].try_into().unwrap()),
            c_bytes: u32::from_le_bytes(src[12..16].try_into().unwrap()),
        })
    }
}

/// The per-block length table immediately follows the header: one `u32` LE
/// per block, in order, giving that block's compressed payload length.
pub fn index_size(n_blocks: usize) -> usize {
    n_blocks * 4
}

pub fn encode_index(lengths: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(lengths.len() * 4);
    for len in lengths {
        out.extend_from_slice(&len.to_le_bytes());
    }
    out
}

pub fn decode_index(src: &[u8], n_blocks: usize) -> Result<Vec<u32>, CodecError> {
    let needed = index_size(n_blocks);
    if src.len() < needed {
        return Err(CodecError::CorruptBuffer(format!(
            "block index truncated: need {needed} bytes, have {}",
            src.len()
        )));
    }
    let mut lengths = Vec::with_capacity(n_blocks);
    for i in 0..n_blocks {
        let off = i * 4;
        lengths.push(u32::from_le_bytes(src[off..off + 4].try_into().unwrap()));
    }
    Ok(lengths)
}
