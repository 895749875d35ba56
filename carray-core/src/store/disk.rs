use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::error::CArrayError;
use crate::store::ChunkStore;

/// Magic bytes opening every on-disk chunk file (spec §4.3).
const PACK_MAGIC: &[u8; 4] = b"blpk";
const PACK_HEADER_SIZE: usize = 16;
const PACK_FORMAT_VERSION: u8 = 1;

struct PackHeader {
    version: u8,
    /// Always 1 for a chunk file written by this store; −1 means unknown,
    /// used only while materializing a header ahead of knowing the count
    /// (spec §9 open question: `None` is stored as −1, range check skipped).
    chunk_count: i64,
}

impl PackHeader {
    fn encode(&self) -> [u8; PACK_HEADER_SIZE] {
        let mut buf = [0u8; PACK_HEADER_SIZE];
        buf[0..4].copy_from_slice(PACK_MAGIC);
        buf[4] = self.version;
        // bytes 5..7 reserved, stay zero
        buf[8..16].copy_from_slice(&self.chunk_count.to_le_bytes());
        buf
    }

    fn decode(src: &[u8]) -> Result<Self, CArrayError> {
        if src.len() < PACK_HEADER_SIZE {
            return Err(CArrayError::CorruptBuffer(
                "chunk file shorter than pack header".into(),
            ));
        }
        if &src[0..4] != PACK_MAGIC {
            return Err(CArrayError::CorruptBuffer("bad pack magic".into()));
        }
        let chunk_count = i64::from_le_bytes(src[8..16].try_into().unwrap());
        Ok(PackHeader {
            version: src[4],
            chunk_count,
        })
    }
}

/// On-disk chunk store: one file per chunk under `data/` (spec §4.3).
///
/// Keeps a single-slot most-recently-read cache; `free_cache()` drops it.
#[derive(Debug)]
pub struct DiskStore {
    dir: PathBuf,
    len: usize,
    read_only: bool,
    cache: Option<(usize, Rc<Chunk>)>,
}

impl DiskStore {
    pub fn open(dir: impl AsRef<Path>, len: usize, read_only: bool) -> Self {
        DiskStore {
            dir: dir.as_ref().to_path_buf(),
            len,
            read_only,
            cache: None,
        }
    }

    fn chunk_path(&self, i: usize) -> PathBuf {
        self.dir.join(format!("__{i}.blp"))
    }

    fn read_file(&self, i: usize) -> Result<Chunk, CArrayError> {
        let bytes = fs::read(self.chunk_path(i))?;
        let header = PackHeader::decode(&bytes)?;
        if header.version != PACK_FORMAT_VERSION {
            return Err(CArrayError::CorruptBuffer(format!(
                "unsupported pack format version {}",
                header.version
            )));
        }
        let codec_buf = bytes[PACK_HEADER_SIZE..].to_vec();
        Chunk::from_compressed_bytes(codec_buf, None)
    }

    fn write_file(&self, i: usize, chunk: &Chunk) -> Result<(), CArrayError> {
        if chunk.is_constant() {
            return Err(CArrayError::NotSupported(
                "disk-backed chunks cannot store a constant chunk directly; materialize it first"
                    .into(),
            ));
        }
        let header = PackHeader {
            version: PACK_FORMAT_VERSION,
            chunk_count: 1,
        };
        let codec_bytes = match chunk {
            Chunk::Compressed { bytes, .. } | Chunk::Object { bytes, .. } => bytes,
            Chunk::Constant { .. } => unreachable!(),
        };
        let mut file = fs::File::create(self.chunk_path(i))?;
        file.write_all(&header.encode())?;
        file.write_all(codec_bytes)?;
        file.flush()?;
        Ok(())
    }
}

impl ChunkStore for DiskStore {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&mut self, i: usize) -> Result<Rc<Chunk>, CArrayError> {
        if i >= self.len {
            return Err(CArrayError::OutOfRange(format!("chunk {i} out of range")));
        }
        if let Some((cached_i, chunk)) = &self.cache {
            if *cached_i == i {
                return Ok(chunk.clone());
            }
        }
        let chunk = Rc::new(self.read_file(i)?);
        self.cache = Some((i, chunk.clone()));
        Ok(chunk)
    }

    fn append(&mut self, chunk: Chunk) -> Result<(), CArrayError> {
        if self.read_only {
            return Err(CArrayError::ReadOnly);
        }
        self.write_file(self.len, &chunk)?;
        self.len += 1;
        Ok(())
    }

    fn set(&mut self, i: usize, chunk: Chunk) -> Result<(), CArrayError> {
        if self.read_only {
            return Err(CArrayError::ReadOnly);
        }
        if i >= self.len {
            return Err(CArrayError::OutOfRange(format!("chunk {i} out of range")));
        }
        self.write_file(i, &chunk)?;
        if matches!(&self.cache, Some((cached_i, _)) if *cached_i == i) {
            self.cache = None;
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<(), CArrayError> {
        if self.read_only {
            return Err(CArrayError::ReadOnly);
        }
        if self.len == 0 {
            return Err(CArrayError::OutOfRange("pop from empty chunk store".into()));
        }
        let last = self.len - 1;
        let _ = fs::remove_file(self.chunk_path(last));
        // A stale tail may have been flushed past the last committed chunk.
        let _ = fs::remove_file(self.chunk_path(self.len));
        self.len = last;
        self.cache = None;
        Ok(())
    }

    fn flush_tail(&mut self, chunk: Chunk) -> Result<(), CArrayError> {
        if self.read_only {
            return Err(CArrayError::ReadOnly);
        }
        self.write_file(self.len, &chunk)
    }

    fn read_flushed_tail(&mut self) -> Result<Option<Chunk>, CArrayError> {
        match self.read_file(self.len) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(CArrayError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn free_cache(&mut self) {
        self.cache = None;
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::{DTypeKind, ElementType};
    use carray_codecs::{CParams, CodecContext};

    #[test]
    fn append_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DiskStore::open(dir.path(), 0, false);
        let elem = ElementType::scalar(DTypeKind::I32).unwrap();
        let ctx = CodecContext::new();
        let data: Vec<u8> = (0..100i32).flat_map(|v| v.to_le_bytes()).collect();
        let chunk = Chunk::from_array(&elem, &data, 100, &CParams::default(), &ctx, true).unwrap();
        store.append(chunk).unwrap();
        assert_eq!(store.len(), 1);

        let back = store.get(0).unwrap();
        let mut dst = vec![0u8; data.len()];
        back.get(&mut dst, 0, 100, &elem, &ctx).unwrap();
        assert_eq!(dst, data);
    }

    #[test]
    fn read_only_rejects_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DiskStore::open(dir.path(), 0, true);
        let elem = ElementType::scalar(DTypeKind::I32).unwrap();
        let ctx = CodecContext::new();
        let data = vec![0u8; 16];
        let chunk = Chunk::from_array(&elem, &data, 4, &CParams::default(), &ctx, false).unwrap();
        let err = store.append(chunk).unwrap_err();
        assert!(matches!(err, CArrayError::ReadOnly));
    }

    #[test]
    fn flushed_tail_is_recoverable_without_incrementing_len() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DiskStore::open(dir.path(), 0, false);
        let elem = ElementType::scalar(DTypeKind::U8).unwrap();
        let ctx = CodecContext::new();
        let data = vec![7u8; 10];
        let chunk = Chunk::from_array(&elem, &data, 10, &CParams::default(), &ctx, false).unwrap();
        store.flush_tail(chunk).unwrap();
        assert_eq!(store.len(), 0);

        let recovered = store.read_flushed_tail().unwrap().unwrap();
        let mut dst = vec![0u8; data.len()];
        recovered.get(&mut dst, 0, 10, &elem, &ctx).unwrap();
        assert_eq!(dst, data);
    }
}
