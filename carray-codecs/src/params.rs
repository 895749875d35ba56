use crate::error::CodecError;

/// Registered backend codecs. The numeric value is the on-disk `codec_id`
/// stored in the buffer header (`carray-codecs::header`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    Lz4 = 0,
    Zstd = 1,
    Deflate = 2,
}

impl CodecId {
    pub fn name(self) -> &'static str {
        match self {
            CodecId::Lz4 => "lz4",
            CodecId::Zstd => "zstd",
            CodecId::Deflate => "deflate",
        }
    }

    /// Resolve a codec by its registered name. Mirrors `blosc_compname_to_compcode`.
    pub fn from_name(name: &str) -> Result<Self, CodecError> {
        match name {
            "lz4" => Ok(CodecId::Lz4),
            "zstd" => Ok(CodecId::Zstd),
            "deflate" | "zlib" => Ok(CodecId::Deflate),
            other => Err(CodecError::UnknownCodec(other.to_string())),
        }
    }
}

impl TryFrom<u8> for CodecId {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(CodecId::Lz4),
            1 => Ok(CodecId::Zstd),
            2 => Ok(CodecId::Deflate),
            other => Err(CodecError::UnknownCodec(format!("codec id {other}"))),
        }
    }
}

/// Shuffle filter applied to the raw buffer before block compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shuffle {
    #[default]
    None,
    /// Byte-wise transpose across items — the default for numeric arrays.
    Byte,
    /// Bit-wise transpose across groups of 8 items — slower, usually denser.
    Bit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatWidth {
    F32,
    F64,
}

/// Round floats to `digits` significant decimal digits before compression.
///
/// This is lossy by construction (spec calls it "value-preserving-to-q-
/// digits rounding", not a reversible transform): decompression returns the
/// rounded values, it does not recover the originals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizeSpec {
    pub digits: u32,
    pub width: FloatWidth,
}

/// Compression parameters, one per Chunk (spec §4.1 `params`).
#[derive(Debug, Clone)]
pub struct CParams {
    /// 0 (no compression) through 9 (max).
    pub level: u8,
    pub shuffle: Shuffle,
    pub codec: CodecId,
    pub quantize: Option<QuantizeSpec>,
    /// Overrides the block-size heuristic when set.
    pub block_size: Option<u32>,
    pub threads: ThreadMode,
}

impl Default for CParams {
    fn default() -> Self {
        CParams {
            level: 5,
            shuffle: Shuffle::Byte,
            codec: CodecId::Lz4,
            quantize: None,
            block_size: None,
            threads: ThreadMode::Adaptive,
        }
    }
}

impl CParams {
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.level > 9 {
            return Err(CodecError::InvalidArgument(format!(
                "clevel {} out of range 0..=9",
                self.level
            )));
        }
        Ok(())
    }
}

/// Governs whether the codec is allowed to parallelize block (de)compression
/// with `rayon`. See `carray-codecs::context::CodecContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadMode {
    AlwaysOn,
    AlwaysOff,
    /// Threads only when called from the process's main thread.
    #[default]
    Adaptive,
}
