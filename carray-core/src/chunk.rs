//! Immutable compressed container for one fixed-size run of rows (spec §4.2).
//!
//! Modeled as a tagged union per spec §9's redesign note, rather than a
//! struct with an `isconstant` flag bifurcating every code path.

use carray_codecs::{CParams, CodecContext, FloatWidth};

use crate::dtype::{DTypeKind, ElementType};
use crate::error::CArrayError;

#[derive(Debug, Clone)]
pub enum Chunk {
    /// All rows equal; stored symbolically, never compressed bytes.
    Constant { value: Vec<u8>, rows: usize },
    /// The general case: a real compressed buffer produced by `carray_codecs::compress`.
    Compressed {
        bytes: Vec<u8>,
        nbytes: usize,
        blocksize: u32,
        /// Cached for boolean chunks, used by the fast `sum` path.
        true_count: Option<u64>,
    },
    /// One opaque, host-pickled element, stored via the codec wrapper like
    /// any other chunk so the on-disk wire format stays uniform.
    Object { bytes: Vec<u8>, pickled_len: usize },
}

impl Chunk {
    /// Build a chunk from `rows` full rows of `elem`-typed data.
    ///
    /// `detect_constant` is false when reconstructing from disk — disk
    /// chunks never apply constant detection (spec §4.2), keeping the
    /// on-disk format uniform regardless of what's in memory.
    pub fn from_array(
        elem: &ElementType,
        data: &[u8],
        rows: usize,
        params: &CParams,
        ctx: &CodecContext,
        detect_constant: bool,
    ) -> Result<Self, CArrayError> {
        debug_assert_eq!(data.len(), rows * elem.atom_size);

        if detect_constant && rows > 0 {
            if let Some(value) = detect_constant_value(data, elem.atom_size) {
                return Ok(Chunk::Constant { value, rows });
            }
        }

        let true_count = if elem.kind.is_bool() {
            Some(data.iter().filter(|&&b| b != 0).count() as u64)
        } else {
            None
        };

        let mut params = params.clone();
        if !elem.kind.is_float() {
            params.quantize = None;
        } else if let Some(spec) = params.quantize.as_mut() {
            spec.width = match elem.kind {
                DTypeKind::F32 => FloatWidth::F32,
                _ => FloatWidth::F64,
            };
        }

        let item_size = elem.codec_item_size();
        let (bytes, blocksize) = carray_codecs::compress(data, item_size, data.len(), &params, ctx)?;

        Ok(Chunk::Compressed {
            bytes,
            nbytes: data.len(),
            blocksize,
            true_count,
        })
    }

    /// Reconstruct a chunk from a previously compressed buffer (disk read
    /// path). Never applies constant detection.
    pub fn from_compressed_bytes(bytes: Vec<u8>, true_count: Option<u64>) -> Result<Self, CArrayError> {
        let info = carray_codecs::buffer_info(&bytes)?;
        Ok(Chunk::Compressed {
            nbytes: info.n_bytes as usize,
            blocksize: info.block_size,
            bytes,
            true_count,
        })
    }

    pub fn from_pickled_object(
        pickled: &[u8],
        params: &CParams,
        ctx: &CodecContext,
    ) -> Result<Self, CArrayError> {
        let mut params = params.clone();
        params.quantize = None;
        let (bytes, _) = carray_codecs::compress(pickled, 1, pickled.len(), &params, ctx)?;
        Ok(Chunk::Object {
            bytes,
            pickled_len: pickled.len(),
        })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Chunk::Constant { .. })
    }

    pub fn true_count(&self) -> Option<u64> {
        match self {
            Chunk::Compressed { true_count, .. } => *true_count,
            _ => None,
        }
    }

    /// Uncompressed size in bytes.
    pub fn nbytes(&self, elem: &ElementType) -> usize {
        match self {
            Chunk::Constant { rows, .. } => rows * elem.atom_size,
            Chunk::Compressed { nbytes, .. } => *nbytes,
            Chunk::Object { pickled_len, .. } => *pickled_len,
        }
    }

    /// On-disk / in-memory footprint in bytes.
    pub fn cbytes(&self) -> usize {
        match self {
            Chunk::Constant { value, .. } => value.len(),
            Chunk::Compressed { bytes, .. } => bytes.len(),
            Chunk::Object { bytes, .. } => bytes.len(),
        }
    }

    pub fn blocksize(&self) -> u32 {
        match self {
            Chunk::Constant { .. } => 0,
            Chunk::Compressed { blocksize, .. } => *blocksize,
            Chunk::Object { .. } => 0,
        }
    }

    /// Decompress rows `[start, stop)` into `dst`.
    pub fn get(
        &self,
        dst: &mut [u8],
        start: usize,
        stop: usize,
        elem: &ElementType,
        ctx: &CodecContext,
    ) -> Result<(), CArrayError> {
        let atom = elem.atom_size;
        match self {
            Chunk::Constant { value, rows } => {
                if stop > *rows {
                    return Err(CArrayError::OutOfRange(format!(
                        "{stop} beyond constant chunk of {rows} rows"
                    )));
                }
                for row in start..stop {
                    let off = (row - start) * atom;
                    dst[off..off + atom].copy_from_slice(value);
                }
                Ok(())
            }
            Chunk::Compressed { bytes, nbytes, .. } => {
                let full_rows = nbytes / atom;
                if stop > full_rows {
                    return Err(CArrayError::OutOfRange(format!(
                        "{stop} beyond chunk of {full_rows} rows"
                    )));
                }
                let item_size = elem.codec_item_size();
                if start == 0 && stop == full_rows {
                    carray_codecs::decompress(bytes, dst, *nbytes, ctx)?;
                } else {
                    let start_item = start * atom / item_size;
                    let n_items = (stop - start) * atom / item_size;
                    carray_codecs::decompress_range(bytes, start_item, n_items, dst, ctx)?;
                }
                Ok(())
            }
            Chunk::Object { .. } => Err(CArrayError::NotSupported(
                "use get_object() for O-kind chunks".into(),
            )),
        }
    }

    pub fn get_object(&self, ctx: &CodecContext) -> Result<Vec<u8>, CArrayError> {
        match self {
            Chunk::Object { bytes, pickled_len } => {
                let mut dst = vec![0u8; *pickled_len];
                carray_codecs::decompress(bytes, &mut dst, *pickled_len, ctx)?;
                Ok(dst)
            }
            _ => Err(CArrayError::TypeMismatch("chunk is not object-kind".into())),
        }
    }

    /// Chunks are immutable after construction.
    pub fn set(&self, _dst: &[u8]) -> Result<(), CArrayError> {
        Err(CArrayError::NotSupported("chunks are immutable".into()))
    }
}

/// Stride-0 input (a single repeated row) or all-zero input both mark a
/// chunk constant (spec §4.2, §8 boundary behavior).
fn detect_constant_value(data: &[u8], atom_size: usize) -> Option<Vec<u8>> {
    if atom_size == 0 || data.is_empty() {
        return None;
    }
    let first = &data[..atom_size];
    if data.chunks(atom_size).all(|row| row == first) {
        return Some(first.to_vec());
    }
    if data.iter().all(|&b| b == 0) {
        return Some(vec![0u8; atom_size]);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use carray_codecs::{CParams, Shuffle};

    fn params() -> CParams {
        CParams {
            codec: carray_codecs::CodecId::Lz4,
            shuffle: Shuffle::Byte,
            ..Default::default()
        }
    }

    #[test]
    fn constant_detection_fires_for_repeated_rows() {
        let elem = ElementType::scalar(DTypeKind::F64).unwrap();
        let data: Vec<u8> = std::iter::repeat(0.0f64.to_le_bytes())
            .take(1000)
            .flatten()
            .collect();
        let ctx = CodecContext::new();
        let chunk = Chunk::from_array(&elem, &data, 1000, &params(), &ctx, true).unwrap();
        assert!(chunk.is_constant());
        assert!(chunk.cbytes() < chunk.nbytes(&elem));

        let mut dst = vec![0u8; 8];
        chunk.get(&mut dst, 500, 501, &elem, &ctx).unwrap();
        assert_eq!(f64::from_le_bytes(dst.try_into().unwrap()), 0.0);
    }

    #[test]
    fn non_constant_roundtrips() {
        let elem = ElementType::scalar(DTypeKind::I32).unwrap();
        let data: Vec<u8> = (0..1000i32).flat_map(|v| v.to_le_bytes()).collect();
        let ctx = CodecContext::new();
        let chunk = Chunk::from_array(&elem, &data, 1000, &params(), &ctx, true).unwrap();
        assert!(!chunk.is_constant());

        let mut dst = vec![0u8; data.len()];
        chunk.get(&mut dst, 0, 1000, &elem, &ctx).unwrap();
        assert_eq!(dst, data);
    }

    #[test]
    fn object_chunk_roundtrips() {
        let ctx = CodecContext::new();
        let pickled = b"a pickled python object, opaque to the core";
        let chunk = Chunk::from_pickled_object(pickled, &params(), &ctx).unwrap();
        assert_eq!(chunk.get_object(&ctx).unwrap(), pickled);
    }

    #[test]
    fn disk_reconstruction_skips_constant_detection() {
        let elem = ElementType::scalar(DTypeKind::I32).unwrap();
        let data = vec![0u8; 4000];
        let ctx = CodecContext::new();
        let (bytes, _) = carray_codecs::compress(&data, 4, data.len(), &params(), &ctx).unwrap();
        let chunk = Chunk::from_compressed_bytes(bytes, None).unwrap();
        assert!(!chunk.is_constant());
        let mut dst = vec![0u8; data.len()];
        chunk.get(&mut dst, 0, 1000, &elem, &ctx).unwrap();
        assert_eq!(dst, data);
    }
}
