//! The CArray core (spec §4.4): logical length, element type, chunk length,
//! default fill value; owns the Chunk store and the mutable leftover tail.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use carray_codecs::{CParams, CodecContext};

use crate::chunk::Chunk;
use crate::dtype::{DTypeKind, ElementType};
use crate::error::CArrayError;
use crate::iter::{MaskSource, RangeIter, WhereIter, WhereTrueIter};
use crate::meta::{self, CParamsJson, SizesMeta, StorageMeta};
use crate::store::{ChunkStore, DiskStore, MemoryStore};

const MIN_CHUNKSIZE: u64 = 16 * 1024;
const MAX_CHUNKSIZE: u64 = 4 * 1024 * 1024;

/// Read-only / append / truncate-on-open access mode (spec §3 "mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Append,
    Write,
}

/// Three-state block cache (spec §9 redesign note): replaces the source's
/// `-1`/`-2` sentinel pair with a named tagged record.
#[derive(Debug)]
enum BlockCache {
    Empty,
    Valid { row: usize, buf: Vec<u8> },
    /// A write happened since the cache was last populated; the next scalar
    /// read must repopulate, but no cbytes bookkeeping needs fixing up.
    Dirty,
}

/// Construction-time options shared by both constructors.
#[derive(Debug, Clone)]
pub struct CArrayOptions {
    pub chunklen: Option<usize>,
    pub expectedlen: Option<usize>,
    pub params: CParams,
    pub dflt: Option<Vec<u8>>,
    pub root: Option<PathBuf>,
    pub mode: Mode,
}

impl Default for CArrayOptions {
    fn default() -> Self {
        CArrayOptions {
            chunklen: None,
            expectedlen: None,
            params: CParams::default(),
            dflt: None,
            root: None,
            mode: Mode::Append,
        }
    }
}

pub struct CArray {
    elem: ElementType,
    chunklen: usize,
    expectedlen: usize,
    store: Rc<RefCell<Box<dyn ChunkStore>>>,
    leftover_buf: Vec<u8>,
    leftover_rows: usize,
    n: usize,
    params: CParams,
    ctx: CodecContext,
    dflt: Vec<u8>,
    mode: Mode,
    root: Option<PathBuf>,
    block_cache: BlockCache,
    attrs: Value,
}

/// Sub-linearly scaled chunk-length heuristic (spec §4.4.1): small arrays get
/// small chunks so per-chunk overhead stays bounded, large arrays get bigger
/// chunks so compression ratio and streaming throughput improve.
fn choose_chunklen(expected_nbytes: u64, atomsize: usize) -> usize {
    let atomsize = atomsize.max(1) as u64;
    let target_chunksize = if expected_nbytes <= MAX_CHUNKSIZE {
        // The whole array fits under the cap: a single covering chunk beats
        // splitting it, so constant-chunk detection and compression both
        // see the data as one unit.
        expected_nbytes.max(MIN_CHUNKSIZE)
    } else {
        let target = (expected_nbytes as f64).sqrt() as u64 * 256;
        target.clamp(MIN_CHUNKSIZE, MAX_CHUNKSIZE)
    };
    let chunksize = (target_chunksize / atomsize).max(1) * atomsize;
    (chunksize / atomsize) as usize
}

impl CArray {
    pub fn elem(&self) -> &ElementType {
        &self.elem
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn chunklen(&self) -> usize {
        self.chunklen
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn is_object(&self) -> bool {
        self.elem.kind.is_object()
    }

    pub fn nbytes(&self) -> u64 {
        self.n as u64 * self.elem.atom_size as u64
    }

    /// The tail is never compressed, so its contribution is its valid
    /// (uncompressed) byte count, not its full allocated capacity — spec §3
    /// calls this "accounted at its uncompressed capacity", i.e. raw bytes
    /// rather than a compressed estimate (§8's nbytes invariant uses the
    /// same `leftover_rows * atomsize` term).
    pub fn cbytes(&self) -> u64 {
        let store_cbytes: u64 = {
            let mut store = self.store.borrow_mut();
            let mut total = 0u64;
            for i in 0..store.len() {
                total += store.get(i).map(|c| c.cbytes() as u64).unwrap_or(0);
            }
            total
        };
        store_cbytes + (self.leftover_rows * self.elem.atom_size) as u64
    }

    fn is_read_only(&self) -> bool {
        matches!(self.mode, Mode::Read)
    }

    pub fn nchunks(&self) -> usize {
        self.store.borrow().len()
    }

    fn chunksize(&self) -> usize {
        self.chunklen * self.elem.atom_size
    }

    /// Fetch chunk `i` through the store's own cache. Exposed for the
    /// iterator engine (spec §4.4 "Iteration"), which scans row-chunks
    /// directly rather than going through scalar/slice reads.
    pub(crate) fn store_get(&self, i: usize) -> Result<Rc<Chunk>, CArrayError> {
        self.store.borrow_mut().get(i)
    }

    pub(crate) fn leftover(&self) -> (&[u8], usize) {
        (&self.leftover_buf, self.leftover_rows)
    }

    pub(crate) fn ctx(&self) -> &CodecContext {
        &self.ctx
    }

    // ---------------------------------------------------------------- construction

    /// Build from an initial in-memory buffer (spec §4.4 "From data").
    pub fn from_data(
        data: &[u8],
        elem: ElementType,
        opts: CArrayOptions,
    ) -> Result<Self, CArrayError> {
        if elem.kind.is_object() {
            return Self::from_objects(&[], elem, opts);
        }

        if data.len() % elem.atom_size != 0 {
            return Err(CArrayError::TypeMismatch(
                "input length is not a multiple of the atom size".into(),
            ));
        }
        let n = data.len() / elem.atom_size;
        let expectedlen = opts.expectedlen.unwrap_or(n);
        let chunklen = opts
            .chunklen
            .map(|c| c.max(1))
            .unwrap_or_else(|| choose_chunklen(expectedlen as u64 * elem.atom_size as u64, elem.atom_size));
        if chunklen < 1 {
            return Err(CArrayError::InvalidArgument("chunklen < 1".into()));
        }

        let dflt = opts.dflt.unwrap_or_else(|| vec![0u8; elem.atom_size]);
        if dflt.len() != elem.atom_size {
            return Err(CArrayError::TypeMismatch("dflt does not match atom size".into()));
        }

        let store_is_disk = opts.root.is_some();
        let boxed_store: Box<dyn ChunkStore> = if store_is_disk {
            let root = opts.root.clone().unwrap();
            if root.exists() && opts.mode != Mode::Write {
                return Err(CArrayError::RootExists(root));
            }
            if root.exists() {
                fs::remove_dir_all(&root)?;
            }
            fs::create_dir_all(root.join("data"))?;
            fs::create_dir_all(root.join("meta"))?;
            fs::create_dir_all(root.join("attrs"))?;
            Box::new(DiskStore::open(root.join("data"), 0, false))
        } else {
            Box::new(MemoryStore::new(false))
        };

        let mut array = CArray {
            elem,
            chunklen,
            expectedlen,
            store: Rc::new(RefCell::new(boxed_store)),
            leftover_buf: Vec::new(), // resized just below, once chunksize() is known
            leftover_rows: 0,
            n: 0,
            params: opts.params,
            ctx: CodecContext::new(),
            dflt,
            mode: opts.mode,
            root: opts.root,
            block_cache: BlockCache::Empty,
            attrs: Value::Object(Default::default()),
        };
        array.leftover_buf = vec![0u8; array.chunksize()];

        array.append_rows(data, n)?;

        if array.root.is_some() {
            array.write_storage_meta()?;
            array.flush()?;
        }

        Ok(array)
    }

    /// Build an O-kind array; each element is pickled independently.
    fn from_objects(
        pickled: &[&[u8]],
        elem: ElementType,
        opts: CArrayOptions,
    ) -> Result<Self, CArrayError> {
        let boxed_store: Box<dyn ChunkStore> = if let Some(root) = &opts.root {
            if root.exists() && opts.mode != Mode::Write {
                return Err(CArrayError::RootExists(root.clone()));
            }
            if root.exists() {
                fs::remove_dir_all(root)?;
            }
            fs::create_dir_all(root.join("data"))?;
            fs::create_dir_all(root.join("meta"))?;
            fs::create_dir_all(root.join("attrs"))?;
            Box::new(DiskStore::open(root.join("data"), 0, false))
        } else {
            Box::new(MemoryStore::new(false))
        };

        let mut array = CArray {
            elem,
            chunklen: 1,
            expectedlen: opts.expectedlen.unwrap_or(0),
            store: Rc::new(RefCell::new(boxed_store)),
            leftover_buf: Vec::new(),
            leftover_rows: 0,
            n: 0,
            params: opts.params,
            ctx: CodecContext::new(),
            dflt: Vec::new(),
            mode: opts.mode,
            root: opts.root,
            block_cache: BlockCache::Empty,
            attrs: Value::Object(Default::default()),
        };

        for p in pickled {
            array.append_object(p)?;
        }

        if array.root.is_some() {
            array.write_storage_meta()?;
            array.flush()?;
        }

        Ok(array)
    }

    /// Reopen a persistent array from its root directory (spec §4.4 "From
    /// root directory").
    pub fn open_root(root: impl AsRef<Path>, mode: Mode) -> Result<Self, CArrayError> {
        let root = root.as_ref().to_path_buf();
        let storage = meta::read_storage(&root)?;
        let sizes = meta::read_sizes(&root)?;
        let attrs = meta::read_attrs(&root)?;

        let kind = DTypeKind::from_descriptor(&storage.dtype)?;
        let elem = ElementType::new(kind, &[])?;
        let params = storage.cparams.to_cparams()?;

        let data_dir = root.join("data");
        let total_entries = fs::read_dir(&data_dir)?.count();

        let read_only = mode == Mode::Read;

        let n = sizes.shape.first().copied().unwrap_or(0);
        let chunklen = storage.chunklen;

        let (nchunks, leftover_rows, leftover_buf) = if elem.kind.is_object() {
            (total_entries, 0, Vec::new())
        } else {
            let nchunks = n / chunklen;
            let leftover_rows = n % chunklen;
            let mut leftover_buf = vec![0u8; chunklen * elem.atom_size];
            if leftover_rows > 0 {
                // DiskStore's internal `len` isn't set yet; peek the tail
                // file directly at the expected nchunks index.
                let mut probe = DiskStore::open(&data_dir, nchunks, read_only);
                if let Some(chunk) = probe.read_flushed_tail()? {
                    chunk.get(
                        &mut leftover_buf[..leftover_rows * elem.atom_size],
                        0,
                        leftover_rows,
                        &elem,
                        &CodecContext::new(),
                    )?;
                }
            }
            (nchunks, leftover_rows, leftover_buf)
        };
        let disk_store = DiskStore::open(&data_dir, nchunks, read_only);

        let dflt = if elem.kind.is_object() {
            Vec::new()
        } else {
            default_bytes_from_json(&storage.dflt, &elem)
        };

        let mut array = CArray {
            elem,
            chunklen,
            expectedlen: storage.expectedlen,
            store: Rc::new(RefCell::new(Box::new(disk_store))),
            leftover_buf,
            leftover_rows,
            n,
            params,
            ctx: CodecContext::new(),
            dflt,
            mode,
            root: Some(root),
            block_cache: BlockCache::Empty,
            attrs,
        };

        if mode == Mode::Write {
            array.resize(0)?;
        }

        Ok(array)
    }

    fn write_storage_meta(&self) -> Result<(), CArrayError> {
        let root = self.root.as_ref().unwrap();
        let storage = StorageMeta {
            dtype: self.elem.descriptor(),
            cparams: CParamsJson::from(&self.params),
            chunklen: self.chunklen,
            expectedlen: self.expectedlen,
            dflt: meta::dflt_to_json(&self.elem, &self.dflt),
        };
        meta::write_storage(root, &storage)
    }

    // -------------------------------------------------------------------- append

    /// Append `rows` rows of element-type-compatible data (spec §4.4 "Append").
    pub fn append(&mut self, data: &[u8]) -> Result<(), CArrayError> {
        if self.elem.kind.is_object() {
            return Err(CArrayError::TypeMismatch(
                "use append_object for O-kind arrays".into(),
            ));
        }
        if data.len() % self.elem.atom_size != 0 {
            return Err(CArrayError::TypeMismatch(
                "input length is not a multiple of the atom size".into(),
            ));
        }
        let rows = data.len() / self.elem.atom_size;
        self.append_rows(data, rows)
    }

    fn append_rows(&mut self, data: &[u8], rows: usize) -> Result<(), CArrayError> {
        if self.is_read_only() {
            return Err(CArrayError::ReadOnly);
        }
        if rows == 0 {
            return Ok(());
        }
        let atomsize = self.elem.atom_size;
        let chunksize = self.chunksize();
        let leftover_bytes = self.leftover_rows * atomsize;

        if leftover_bytes + rows * atomsize < chunksize {
            self.leftover_buf[leftover_bytes..leftover_bytes + rows * atomsize].copy_from_slice(data);
            self.leftover_rows += rows;
        } else {
            let k = self.chunklen - self.leftover_rows;
            self.leftover_buf[leftover_bytes..leftover_bytes + k * atomsize]
                .copy_from_slice(&data[..k * atomsize]);
            let full_tail = std::mem::replace(&mut self.leftover_buf, vec![0u8; chunksize]);
            let detect_constant = self.root.is_none();
            let chunk = Chunk::from_array(&self.elem, &full_tail, self.chunklen, &self.params, &self.ctx, detect_constant)?;
            self.store.borrow_mut().append(chunk)?;
            self.leftover_rows = 0;

            let mut offset = k;
            let remaining_rows = rows - k;
            let full_chunks = remaining_rows / self.chunklen;
            for _ in 0..full_chunks {
                let slice = &data[offset * atomsize..(offset + self.chunklen) * atomsize];
                let chunk = Chunk::from_array(&self.elem, slice, self.chunklen, &self.params, &self.ctx, detect_constant)?;
                self.store.borrow_mut().append(chunk)?;
                offset += self.chunklen;
            }
            let rem = remaining_rows - full_chunks * self.chunklen;
            if rem > 0 {
                self.leftover_buf[..rem * atomsize]
                    .copy_from_slice(&data[offset * atomsize..(offset + rem) * atomsize]);
                self.leftover_rows = rem;
            }
        }
        self.n += rows;
        self.block_cache = BlockCache::Dirty;
        Ok(())
    }

    /// Append a single pickled object (spec §4.4 "Append", O-kind path).
    /// Bypasses the leftover tail entirely; `len()` equals `chunks.len()`.
    pub fn append_object(&mut self, pickled: &[u8]) -> Result<(), CArrayError> {
        if !self.elem.kind.is_object() {
            return Err(CArrayError::TypeMismatch("array is not object-kind".into()));
        }
        if self.is_read_only() {
            return Err(CArrayError::ReadOnly);
        }
        let chunk = Chunk::from_pickled_object(pickled, &self.params, &self.ctx)?;
        self.store.borrow_mut().append(chunk)?;
        self.n += 1;
        Ok(())
    }

    pub fn get_object(&mut self, i: usize) -> Result<Vec<u8>, CArrayError> {
        if !self.elem.kind.is_object() {
            return Err(CArrayError::TypeMismatch("array is not object-kind".into()));
        }
        if i >= self.n {
            return Err(CArrayError::OutOfRange(format!("{i} out of range")));
        }
        let chunk = self.store.borrow_mut().get(i)?;
        chunk.get_object(&self.ctx)
    }

    // ---------------------------------------------------------------------- trim

    /// Remove the last `k` rows (spec §4.4 "Trim").
    pub fn trim(&mut self, k: usize) -> Result<(), CArrayError> {
        if self.is_read_only() {
            return Err(CArrayError::ReadOnly);
        }
        if k > self.n {
            return Err(CArrayError::OutOfRange(format!("trim({k}) exceeds length {}", self.n)));
        }
        if k == 0 {
            return Ok(());
        }

        if k <= self.leftover_rows {
            self.leftover_rows -= k;
            self.n -= k;
        } else {
            let new_n = self.n - k;
            let new_nchunks_target = new_n / self.chunklen;
            let new_leftover_rows = new_n % self.chunklen;

            let mut last_popped: Option<Rc<Chunk>> = None;
            {
                let mut store = self.store.borrow_mut();
                while store.len() > new_nchunks_target {
                    let idx = store.len() - 1;
                    let chunk = store.get(idx)?;
                    store.pop()?;
                    last_popped = Some(chunk);
                }
            }
            if new_leftover_rows > 0 {
                let chunk = last_popped.ok_or_else(|| {
                    CArrayError::CorruptBuffer("trim needs the popped chunk's data to rebuild the tail".into())
                })?;
                chunk.get(
                    &mut self.leftover_buf[..new_leftover_rows * self.elem.atom_size],
                    0,
                    new_leftover_rows,
                    &self.elem,
                    &self.ctx,
                )?;
            }
            self.leftover_rows = new_leftover_rows;
            self.n = new_n;
        }
        self.block_cache = BlockCache::Dirty;
        Ok(())
    }

    // -------------------------------------------------------------------- resize

    /// Grow or shrink to `new_len` (spec §4.4 "Resize").
    pub fn resize(&mut self, new_len: usize) -> Result<(), CArrayError> {
        if new_len == self.n {
            return Ok(());
        }
        if new_len > self.n {
            let extra = new_len - self.n;
            if self.elem.kind.is_object() {
                return Err(CArrayError::NotSupported("cannot resize an object-kind array upward".into()));
            }
            let mut filler = Vec::with_capacity(extra * self.elem.atom_size);
            for _ in 0..extra {
                filler.extend_from_slice(&self.dflt);
            }
            self.append(&filler)
        } else {
            self.trim(self.n - new_len)
        }
    }

    // -------------------------------------------------------------------- flush

    /// Persist the leftover tail and refresh `meta/sizes` (spec §4.4 "Flush").
    /// No-op for an in-memory array. Flush is explicit; destruction never flushes.
    pub fn flush(&mut self) -> Result<(), CArrayError> {
        let Some(root) = self.root.clone() else {
            return Ok(());
        };
        if self.leftover_rows > 0 && !self.elem.kind.is_object() {
            let valid = self.leftover_rows * self.elem.atom_size;
            let chunk = Chunk::from_array(
                &self.elem,
                &self.leftover_buf[..valid],
                self.leftover_rows,
                &self.params,
                &self.ctx,
                false,
            )?;
            self.store.borrow_mut().flush_tail(chunk)?;
        }
        let sizes = SizesMeta {
            shape: vec![self.n],
            nbytes: self.nbytes(),
            cbytes: self.cbytes(),
        };
        meta::write_sizes(&root, &sizes)?;
        meta::write_attrs(&root, &self.attrs)?;
        debug!(n = self.n, "flushed CArray to {}", root.display());
        Ok(())
    }

    /// Delete the root directory and everything under it.
    pub fn purge(self) -> Result<(), CArrayError> {
        if let Some(root) = &self.root {
            fs::remove_dir_all(root)?;
        }
        Ok(())
    }

    pub fn free_cache(&mut self) {
        self.block_cache = BlockCache::Empty;
        self.store.borrow_mut().free_cache();
    }

    pub fn attrs(&self) -> &Value {
        &self.attrs
    }

    pub fn set_attrs(&mut self, attrs: Value) {
        self.attrs = attrs;
    }

    // --------------------------------------------------------------- slice read

    /// Read `[start, stop)` by `step` (spec §4.4 "Slice read").
    pub fn read_slice(&mut self, start: usize, stop: usize, step: isize) -> Result<Vec<u8>, CArrayError> {
        if step <= 0 {
            return Err(CArrayError::NotSupported("non-positive step is not supported".into()));
        }
        let step = step as usize;
        let start = start.min(self.n);
        let stop = stop.clamp(start, self.n);
        let out_len = ceil_div(stop - start, step);
        let atomsize = self.elem.atom_size;
        let mut out = vec![0u8; out_len * atomsize];
        let mut out_pos = 0usize;

        let total_chunk_rows = self.nchunks() * self.chunklen;
        let chunk_stop = stop.min(total_chunk_rows);

        if start < chunk_stop {
            let first_chunk = start / self.chunklen;
            let last_chunk = (chunk_stop - 1) / self.chunklen;
            for i in first_chunk..=last_chunk {
                let chunk_start_row = i * self.chunklen;
                let mut startb = start.saturating_sub(chunk_start_row);
                let dist = chunk_start_row + startb - start;
                let rem = (step - dist % step) % step;
                startb += rem;
                if startb >= self.chunklen {
                    continue;
                }
                let stopb = self.chunklen.min(chunk_stop - chunk_start_row);
                if startb >= stopb {
                    continue;
                }
                let blen = ceil_div(stopb - startb, step);
                let chunk = self.store.borrow_mut().get(i)?;

                if step == 1 {
                    chunk.get(
                        &mut out[out_pos * atomsize..(out_pos + blen) * atomsize],
                        startb,
                        stopb,
                        &self.elem,
                        &self.ctx,
                    )?;
                } else {
                    let mut scratch = vec![0u8; (stopb - startb) * atomsize];
                    chunk.get(&mut scratch, startb, stopb, &self.elem, &self.ctx)?;
                    for k in 0..blen {
                        let src_off = k * step * atomsize;
                        let dst_off = (out_pos + k) * atomsize;
                        out[dst_off..dst_off + atomsize].copy_from_slice(&scratch[src_off..src_off + atomsize]);
                    }
                }
                out_pos += blen;
            }
        }

        if stop > total_chunk_rows {
            let mut r = start.max(total_chunk_rows);
            let misalign = (r - start) % step;
            if misalign != 0 {
                r += step - misalign;
            }
            while r < stop {
                let tail_off = (r - total_chunk_rows) * atomsize;
                out[out_pos * atomsize..(out_pos + 1) * atomsize]
                    .copy_from_slice(&self.leftover_buf[tail_off..tail_off + atomsize]);
                out_pos += 1;
                r += step;
            }
        }

        Ok(out)
    }

    // -------------------------------------------------------------- scalar read

    /// Random single-row read through the block cache (spec §4.4 "Scalar read").
    pub fn get_scalar(&mut self, p: usize) -> Result<Vec<u8>, CArrayError> {
        if p >= self.n {
            return Err(CArrayError::OutOfRange(format!("{p} out of range")));
        }
        let atomsize = self.elem.atom_size;
        let total_chunk_rows = self.nchunks() * self.chunklen;

        if p >= total_chunk_rows {
            let off = (p - total_chunk_rows) * atomsize;
            return Ok(self.leftover_buf[off..off + atomsize].to_vec());
        }

        let nchunk = p / self.chunklen;
        let offset_in_chunk = p % self.chunklen;
        let chunk = self.store.borrow_mut().get(nchunk)?;
        let blocksize = chunk.blocksize() as usize;

        if blocksize == 0 || atomsize > blocksize {
            // Constant chunk or a row too wide for the block cache to hold:
            // fall back to a length-1 slice read (spec's "intentional complexity cap").
            let mut dst = vec![0u8; atomsize];
            chunk.get(&mut dst, offset_in_chunk, offset_in_chunk + 1, &self.elem, &self.ctx)?;
            return Ok(dst);
        }

        let blocklen = blocksize / atomsize;
        let block_start_in_chunk = (offset_in_chunk / blocklen) * blocklen;
        let global_block_start = nchunk * self.chunklen + block_start_in_chunk;

        if let BlockCache::Valid { row, buf } = &self.block_cache {
            if *row == global_block_start {
                let off = (offset_in_chunk - block_start_in_chunk) * atomsize;
                return Ok(buf[off..off + atomsize].to_vec());
            }
        }

        let chunk_rows = self.chunklen.min(self.chunk_row_count(nchunk)?);
        let block_stop_in_chunk = (block_start_in_chunk + blocklen).min(chunk_rows);
        let mut buf = vec![0u8; (block_stop_in_chunk - block_start_in_chunk) * atomsize];
        chunk.get(&mut buf, block_start_in_chunk, block_stop_in_chunk, &self.elem, &self.ctx)?;
        let off = (offset_in_chunk - block_start_in_chunk) * atomsize;
        let value = buf[off..off + atomsize].to_vec();
        self.block_cache = BlockCache::Valid { row: global_block_start, buf };
        Ok(value)
    }

    fn chunk_row_count(&mut self, nchunk: usize) -> Result<usize, CArrayError> {
        let chunk = self.store.borrow_mut().get(nchunk)?;
        Ok(chunk.nbytes(&self.elem) / self.elem.atom_size)
    }

    // ------------------------------------------------------------- slice write

    /// Overwrite `[start, stop)` by `step` with `data` (spec §4.4 "Slice write").
    pub fn write_slice(&mut self, start: usize, stop: usize, step: isize, data: &[u8]) -> Result<(), CArrayError> {
        if self.is_read_only() {
            return Err(CArrayError::ReadOnly);
        }
        if step <= 0 {
            return Err(CArrayError::NotSupported("non-positive step is not supported".into()));
        }
        let step = step as usize;
        let start = start.min(self.n);
        let stop = stop.clamp(start, self.n);
        let atomsize = self.elem.atom_size;
        let expected_rows = ceil_div(stop.saturating_sub(start), step);
        if data.len() != expected_rows * atomsize {
            return Err(CArrayError::TypeMismatch("input length does not match slice length".into()));
        }

        let total_chunk_rows = self.nchunks() * self.chunklen;
        let chunk_stop = stop.min(total_chunk_rows);
        let mut src_pos = 0usize;

        if start < chunk_stop {
            let first_chunk = start / self.chunklen;
            let last_chunk = (chunk_stop - 1) / self.chunklen;
            for i in first_chunk..=last_chunk {
                let chunk_start_row = i * self.chunklen;
                let mut startb = start.saturating_sub(chunk_start_row);
                let dist = chunk_start_row + startb - start;
                let rem = (step - dist % step) % step;
                startb += rem;
                if startb >= self.chunklen {
                    continue;
                }
                let stopb = self.chunklen.min(chunk_stop - chunk_start_row);
                if startb >= stopb {
                    continue;
                }
                let blen = ceil_div(stopb - startb, step);
                let chunk_rows = self.chunk_row_count(i)?;
                let full_overwrite = step == 1 && startb == 0 && stopb == chunk_rows;

                if full_overwrite {
                    let detect_constant = self.root.is_none();
                    let new_chunk = Chunk::from_array(
                        &self.elem,
                        &data[src_pos * atomsize..(src_pos + blen) * atomsize],
                        blen,
                        &self.params,
                        &self.ctx,
                        detect_constant,
                    )?;
                    self.store.borrow_mut().set(i, new_chunk)?;
                } else {
                    let mut scratch = vec![0u8; chunk_rows * atomsize];
                    {
                        let chunk = self.store.borrow_mut().get(i)?;
                        chunk.get(&mut scratch, 0, chunk_rows, &self.elem, &self.ctx)?;
                    }
                    if step == 1 {
                        scratch[startb * atomsize..stopb * atomsize]
                            .copy_from_slice(&data[src_pos * atomsize..(src_pos + blen) * atomsize]);
                    } else {
                        for k in 0..blen {
                            let row = startb + k * step;
                            let dst_off = row * atomsize;
                            let src_off = (src_pos + k) * atomsize;
                            scratch[dst_off..dst_off + atomsize].copy_from_slice(&data[src_off..src_off + atomsize]);
                        }
                    }
                    let detect_constant = self.root.is_none();
                    let new_chunk =
                        Chunk::from_array(&self.elem, &scratch, chunk_rows, &self.params, &self.ctx, detect_constant)?;
                    self.store.borrow_mut().set(i, new_chunk)?;
                }
                src_pos += blen;
            }
        }

        if stop > total_chunk_rows {
            let mut r = start.max(total_chunk_rows);
            let misalign = (r - start) % step;
            if misalign != 0 {
                r += step - misalign;
            }
            while r < stop {
                let tail_off = (r - total_chunk_rows) * atomsize;
                let src_off = src_pos * atomsize;
                self.leftover_buf[tail_off..tail_off + atomsize].copy_from_slice(&data[src_off..src_off + atomsize]);
                src_pos += 1;
                r += step;
            }
        }

        self.block_cache = BlockCache::Dirty;
        Ok(())
    }

    // -------------------------------------------------------------- fancy index

    /// Gather rows at arbitrary `indices` (a consequence of `get`/slice read
    /// operations named by the spec, not a separate named operation).
    pub fn fancy_index_read(&mut self, indices: &[usize]) -> Result<Vec<u8>, CArrayError> {
        let atomsize = self.elem.atom_size;
        let mut out = vec![0u8; indices.len() * atomsize];
        for (k, &idx) in indices.iter().enumerate() {
            let row = self.get_scalar(idx)?;
            out[k * atomsize..(k + 1) * atomsize].copy_from_slice(&row);
        }
        Ok(out)
    }

    /// Scatter rows to arbitrary `indices` (the write-side counterpart of
    /// `fancy_index_read`, following the same per-row decompose-and-rebuild
    /// approach as `write_slice`).
    pub fn fancy_index_write(&mut self, indices: &[usize], data: &[u8]) -> Result<(), CArrayError> {
        if self.is_read_only() {
            return Err(CArrayError::ReadOnly);
        }
        let atomsize = self.elem.atom_size;
        if data.len() != indices.len() * atomsize {
            return Err(CArrayError::TypeMismatch("input length does not match index count".into()));
        }
        for (k, &idx) in indices.iter().enumerate() {
            let row = &data[k * atomsize..(k + 1) * atomsize];
            self.write_slice(idx, idx + 1, 1, row)?;
        }
        Ok(())
    }

    /// Scatter `values` into positions where `mask` is true (spec §4.4
    /// "Boolean-mask write").
    pub fn mask_write(&mut self, mask: &[bool], values: &[u8]) -> Result<(), CArrayError> {
        if self.is_read_only() {
            return Err(CArrayError::ReadOnly);
        }
        if mask.len() != self.n {
            return Err(CArrayError::InvalidArgument("mask length must equal array length".into()));
        }
        let atomsize = self.elem.atom_size;
        let true_count = mask.iter().filter(|&&b| b).count();
        if values.len() != true_count * atomsize {
            return Err(CArrayError::InvalidArgument("values length must equal sum(mask)".into()));
        }

        let total_chunk_rows = self.nchunks() * self.chunklen;
        let mut value_pos = 0usize;

        let nchunks = self.nchunks();
        for i in 0..nchunks {
            let chunk_start = i * self.chunklen;
            let chunk_rows = self.chunk_row_count(i)?;
            let chunk_mask = &mask[chunk_start..chunk_start + chunk_rows];
            if !chunk_mask.iter().any(|&b| b) {
                continue;
            }
            let mut scratch = vec![0u8; chunk_rows * atomsize];
            {
                let chunk = self.store.borrow_mut().get(i)?;
                chunk.get(&mut scratch, 0, chunk_rows, &self.elem, &self.ctx)?;
            }
            for (row, &is_true) in chunk_mask.iter().enumerate() {
                if is_true {
                    let dst_off = row * atomsize;
                    let src_off = value_pos * atomsize;
                    scratch[dst_off..dst_off + atomsize].copy_from_slice(&values[src_off..src_off + atomsize]);
                    value_pos += 1;
                }
            }
            let detect_constant = self.root.is_none();
            let new_chunk = Chunk::from_array(&self.elem, &scratch, chunk_rows, &self.params, &self.ctx, detect_constant)?;
            self.store.borrow_mut().set(i, new_chunk)?;
        }

        if total_chunk_rows < self.n {
            let tail_mask = &mask[total_chunk_rows..self.n];
            for (row, &is_true) in tail_mask.iter().enumerate() {
                if is_true {
                    let dst_off = row * atomsize;
                    let src_off = value_pos * atomsize;
                    self.leftover_buf[dst_off..dst_off + atomsize].copy_from_slice(&values[src_off..src_off + atomsize]);
                    value_pos += 1;
                }
            }
        }

        self.block_cache = BlockCache::Dirty;
        Ok(())
    }

    // ------------------------------------------------------------------ reduce

    /// Sum reduction with dtype promotion (spec §4.4 "Reduction: sum").
    /// Booleans and small integer kinds widen to `i64`; floats stay `f64`.
    pub fn sum(&mut self) -> Result<f64, CArrayError> {
        let mut total = 0.0f64;
        let atomsize = self.elem.atom_size;
        let nchunks = self.nchunks();

        for i in 0..nchunks {
            let chunk = self.store.borrow_mut().get(i)?;
            let rows = chunk.nbytes(&self.elem) / atomsize;
            if let Some(true_count) = chunk.true_count() {
                total += true_count as f64;
                continue;
            }
            if chunk.is_constant() {
                let mut one = vec![0u8; atomsize];
                chunk.get(&mut one, 0, 1, &self.elem, &self.ctx)?;
                total += self.sum_row(&one) * rows as f64;
                continue;
            }
            let mut buf = vec![0u8; rows * atomsize];
            chunk.get(&mut buf, 0, rows, &self.elem, &self.ctx)?;
            for row in buf.chunks(atomsize) {
                total += self.sum_row(row);
            }
        }

        for row in 0..self.leftover_rows {
            let off = row * atomsize;
            total += self.sum_row(&self.leftover_buf[off..off + atomsize]);
        }

        Ok(total)
    }

    fn sum_row(&self, row: &[u8]) -> f64 {
        match self.elem.kind {
            DTypeKind::Bool => (row.first().copied().unwrap_or(0) != 0) as i64 as f64,
            DTypeKind::I8 => row[0] as i8 as f64,
            DTypeKind::U8 => row[0] as f64,
            DTypeKind::I16 => i16::from_le_bytes(row[..2].try_into().unwrap()) as f64,
            DTypeKind::U16 => u16::from_le_bytes(row[..2].try_into().unwrap()) as f64,
            DTypeKind::I32 => i32::from_le_bytes(row[..4].try_into().unwrap()) as f64,
            DTypeKind::U32 => u32::from_le_bytes(row[..4].try_into().unwrap()) as f64,
            DTypeKind::I64 => i64::from_le_bytes(row[..8].try_into().unwrap()) as f64,
            DTypeKind::U64 => u64::from_le_bytes(row[..8].try_into().unwrap()) as f64,
            DTypeKind::F32 => f32::from_le_bytes(row[..4].try_into().unwrap()) as f64,
            DTypeKind::F64 => f64::from_le_bytes(row[..8].try_into().unwrap()),
            _ => 0.0,
        }
    }

    // -------------------------------------------------------------- copy/view

    /// A deep copy of the array's current contents, optionally persisted at
    /// `new_root` (spec §4.4 "CArray core" owns `copy()`).
    pub fn copy(&mut self, new_root: Option<PathBuf>) -> Result<CArray, CArrayError> {
        let raw = self.read_slice(0, self.n, 1)?;
        let opts = CArrayOptions {
            chunklen: Some(self.chunklen),
            expectedlen: Some(self.expectedlen),
            params: self.params.clone(),
            dflt: Some(self.dflt.clone()),
            root: new_root,
            mode: Mode::Append,
        };
        CArray::from_data(&raw, self.elem.clone(), opts)
    }

    /// Returns a new CArray sharing this one's Chunk store. The leftover
    /// buffer is copied by value at view-creation time; the block cache is
    /// never shared (spec §3 "Ownership").
    pub fn view(&self) -> CArray {
        CArray {
            elem: self.elem.clone(),
            chunklen: self.chunklen,
            expectedlen: self.expectedlen,
            store: Rc::clone(&self.store),
            leftover_buf: self.leftover_buf.clone(),
            leftover_rows: self.leftover_rows,
            n: self.n,
            params: self.params.clone(),
            ctx: CodecContext::new(),
            dflt: self.dflt.clone(),
            mode: self.mode,
            root: self.root.clone(),
            block_cache: BlockCache::Empty,
            attrs: self.attrs.clone(),
        }
    }

    /// Reshape to `new_shape` (leading dim first, trailing dims after), with
    /// at most one `-1` inferred (spec §4.4 "Reshape"). Returns a copy; for a
    /// persistent array the copy is built in a sibling temp directory and
    /// atomically renamed over the original on success.
    pub fn reshape(&mut self, new_shape: &[i64]) -> Result<CArray, CArrayError> {
        if new_shape.is_empty() {
            return Err(CArrayError::InvalidArgument("reshape target must have at least one dim".into()));
        }
        let scalars_per_row = self.elem.atom_size / self.elem.kind.base_item_size().max(1);
        let total_scalars = self.n as i64 * scalars_per_row as i64;

        let negative_ones = new_shape.iter().filter(|&&d| d == -1).count();
        if negative_ones > 1 {
            return Err(CArrayError::InvalidArgument("at most one -1 is allowed in reshape".into()));
        }
        let known_product: i64 = new_shape.iter().filter(|&&d| d != -1).product();
        let mut resolved: Vec<i64> = new_shape.to_vec();
        if negative_ones == 1 {
            if known_product == 0 || total_scalars % known_product != 0 {
                return Err(CArrayError::InvalidArgument("reshape dims do not evenly divide the total element count".into()));
            }
            let inferred = total_scalars / known_product;
            for d in resolved.iter_mut() {
                if *d == -1 {
                    *d = inferred;
                }
            }
        } else if known_product != total_scalars {
            return Err(CArrayError::InvalidArgument("reshape target does not preserve element count".into()));
        }

        let new_n = resolved[0] as usize;
        let new_trailing: Vec<usize> = resolved[1..].iter().map(|&d| d as usize).collect();
        let new_elem = ElementType::new(self.elem.kind, &new_trailing)?;

        let raw = self.read_slice(0, self.n, 1)?;
        let _ = new_n;

        match &self.root {
            None => {
                let opts = CArrayOptions {
                    chunklen: None,
                    expectedlen: Some(new_n),
                    params: self.params.clone(),
                    dflt: Some(vec![0u8; new_elem.atom_size]),
                    root: None,
                    mode: Mode::Append,
                };
                CArray::from_data(&raw, new_elem, opts)
            }
            Some(root) => {
                let tmp_root = root.with_extension("reshape-tmp");
                if tmp_root.exists() {
                    fs::remove_dir_all(&tmp_root)?;
                }
                let opts = CArrayOptions {
                    chunklen: None,
                    expectedlen: Some(new_n),
                    params: self.params.clone(),
                    dflt: Some(vec![0u8; new_elem.atom_size]),
                    root: Some(tmp_root.clone()),
                    mode: Mode::Write,
                };
                let reshaped = CArray::from_data(&raw, new_elem, opts)?;
                drop(reshaped);
                fs::remove_dir_all(root)?;
                fs::rename(&tmp_root, root)?;
                CArray::open_root(root, self.mode)
            }
        }
    }

    // ---------------------------------------------------------------- iteration

    /// Plain in-order range iteration (spec §4.4 "Plain range").
    pub fn iter(
        &self,
        start: usize,
        stop: usize,
        step: usize,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<RangeIter, CArrayError> {
        RangeIter::new(self, start, stop, step, skip, limit)
    }

    /// Boolean rank-1 index iteration (spec §4.4 "Wheretrue").
    pub fn wheretrue(&self, skip: usize, limit: Option<usize>) -> Result<WhereTrueIter, CArrayError> {
        WhereTrueIter::new(self, skip, limit)
    }

    /// Value iteration selected by a companion mask (spec §4.4 "Where").
    pub fn where_iter(&self, mask: MaskSource, skip: usize, limit: Option<usize>) -> Result<WhereIter, CArrayError> {
        WhereIter::new(self, mask, skip, limit)
    }
}

fn ceil_div(a: usize, b: usize) -> usize {
    if a == 0 {
        0
    } else {
        (a - 1) / b + 1
    }
}

fn default_bytes_from_json(value: &Value, elem: &ElementType) -> Vec<u8> {
    let atomsize = elem.atom_size;
    let mut out = vec![0u8; atomsize];
    match elem.kind {
        DTypeKind::F64 => {
            if let Some(f) = value.as_f64() {
                out[..8].copy_from_slice(&f.to_le_bytes());
            }
        }
        DTypeKind::F32 => {
            if let Some(f) = value.as_f64() {
                out[..4].copy_from_slice(&(f as f32).to_le_bytes());
            }
        }
        DTypeKind::Bool => {
            if let Some(b) = value.as_bool() {
                out[0] = b as u8;
            }
        }
        _ => {
            if let Some(i) = value.as_i64() {
                let bytes = i.to_le_bytes();
                let n = atomsize.min(8);
                out[..n].copy_from_slice(&bytes[..n]);
            }
        }
    }
    out
}
