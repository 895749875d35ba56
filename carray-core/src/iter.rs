//! Iterator/filter engine (spec §4.4 "Iteration", §9 redesign note): three
//! concrete iterator variants instead of a single `__next__` driven by mode
//! flags and sentinel fields. Each owns only the state it needs and reads
//! one chunk-worth of decompressed data at a time.
//!
//! Every iterator is constructed from a *view* of the source array (spec
//! §3 "Ownership": a view shares the chunk store but owns its own iteration
//! state), so iterating never disturbs the source array's block cache.

use crate::carray::CArray;
use crate::chunk::Chunk;
use crate::dtype::DTypeKind;
use crate::error::CArrayError;

/// One logical row-chunk's worth of data, decoded lazily.
enum RowChunk {
    /// All rows equal `value`; never decompressed.
    Constant { value: Vec<u8>, rows: usize },
    Buffer { data: Vec<u8>, rows: usize },
}

fn load_row_chunk(array: &CArray, idx: usize) -> Result<RowChunk, CArrayError> {
    let atomsize = array.elem().atom_size;
    if idx < array.nchunks() {
        let chunk = array.store_get(idx)?;
        match chunk.as_ref() {
            Chunk::Constant { value, rows } => Ok(RowChunk::Constant {
                value: value.clone(),
                rows: *rows,
            }),
            _ => {
                let rows = chunk.nbytes(array.elem()) / atomsize;
                let mut data = vec![0u8; rows * atomsize];
                chunk.get(&mut data, 0, rows, array.elem(), array.ctx())?;
                Ok(RowChunk::Buffer { data, rows })
            }
        }
    } else {
        let (leftover, leftover_rows) = array.leftover();
        Ok(RowChunk::Buffer {
            data: leftover[..leftover_rows * atomsize].to_vec(),
            rows: leftover_rows,
        })
    }
}

/// `value` is falsy if every byte is zero — used for constant-chunk elision
/// in `wheretrue`/`where` (spec §4.4: "skipped without decompression").
fn is_falsy(value: &[u8]) -> bool {
    value.iter().all(|&b| b == 0)
}

/// Total row-chunk count: `nchunks` full chunks plus the (possibly empty)
/// tail, addressed as one extra virtual chunk index.
fn row_chunk_count(array: &CArray) -> usize {
    let (_, leftover_rows) = array.leftover();
    if leftover_rows > 0 {
        array.nchunks() + 1
    } else {
        array.nchunks()
    }
}

fn row_chunk_start(array: &CArray, idx: usize) -> usize {
    idx * array.chunklen()
}

/// Plain in-order range iteration (spec §4.4 "Plain range").
pub struct RangeIter {
    array: CArray,
    stop: usize,
    step: usize,
    skip: usize,
    limit: Option<usize>,
    /// Total matches seen so far, used only to decide whether `skip` has
    /// been satisfied.
    matches_seen: usize,
    /// Count of rows actually yielded, checked against `limit`. Kept
    /// separate from `matches_seen` so `limit` counts post-skip yields,
    /// not total matches (spec §8 scenario 5: `skip=3, limit=5` yields 5
    /// rows, not `limit - skip`).
    yielded: usize,
    next_row: usize,
    exhausted: bool,
}

impl RangeIter {
    pub fn new(
        array: &CArray,
        start: usize,
        stop: usize,
        step: usize,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Self, CArrayError> {
        if step == 0 {
            return Err(CArrayError::NotSupported("step must be positive".into()));
        }
        let n = array.len();
        Ok(RangeIter {
            array: array.view(),
            stop: stop.min(n),
            step,
            skip,
            limit,
            matches_seen: 0,
            yielded: 0,
            next_row: start.min(n),
            exhausted: false,
        })
    }
}

impl Iterator for RangeIter {
    type Item = Result<Vec<u8>, CArrayError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted || self.next_row >= self.stop {
                self.exhausted = true;
                return None;
            }
            if let Some(limit) = self.limit {
                if self.yielded >= limit {
                    self.exhausted = true;
                    return None;
                }
            }

            let row = self.next_row;
            self.next_row += self.step;
            let skip_this = self.matches_seen < self.skip;
            self.matches_seen += 1;
            if skip_this {
                continue;
            }

            self.yielded += 1;
            return Some(self.array.get_scalar(row));
        }
    }
}

/// Boolean rank-1 index iteration: yield row indices where the value is
/// true (spec §4.4 "Wheretrue").
pub struct WhereTrueIter {
    array: CArray,
    skip: usize,
    limit: Option<usize>,
    /// Total matches seen so far, used only to decide whether `skip` has
    /// been satisfied.
    matches_seen: usize,
    /// Count of indices actually yielded, checked against `limit` (spec §8
    /// scenario 5: kept independent of `matches_seen` so `limit` counts
    /// post-skip yields, not total matches).
    yielded: usize,
    chunk_idx: usize,
    row_in_chunk: usize,
    current: Option<RowChunk>,
    exhausted: bool,
}

impl WhereTrueIter {
    pub fn new(array: &CArray, skip: usize, limit: Option<usize>) -> Result<Self, CArrayError> {
        if !matches!(array.elem().kind, DTypeKind::Bool) {
            return Err(CArrayError::InvalidArgument(
                "wheretrue requires a boolean rank-1 array".into(),
            ));
        }
        if !array.elem().trailing_dims.is_empty() {
            return Err(CArrayError::InvalidArgument("wheretrue requires rank 1".into()));
        }
        Ok(WhereTrueIter {
            array: array.view(),
            skip,
            limit,
            matches_seen: 0,
            yielded: 0,
            chunk_idx: 0,
            row_in_chunk: 0,
            current: None,
            exhausted: false,
        })
    }

    fn advance_chunk(&mut self) -> Result<bool, CArrayError> {
        if self.chunk_idx >= row_chunk_count(&self.array) {
            return Ok(false);
        }
        self.current = Some(load_row_chunk(&self.array, self.chunk_idx)?);
        self.row_in_chunk = 0;
        Ok(true)
    }
}

impl Iterator for WhereTrueIter {
    type Item = Result<usize, CArrayError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted {
                return None;
            }
            if let Some(limit) = self.limit {
                if self.yielded >= limit {
                    self.exhausted = true;
                    return None;
                }
            }

            if self.current.is_none() {
                match self.advance_chunk() {
                    Ok(true) => {}
                    Ok(false) => {
                        self.exhausted = true;
                        return None;
                    }
                    Err(e) => {
                        self.exhausted = true;
                        return Some(Err(e));
                    }
                }
            }

            let chunk_start = row_chunk_start(&self.array, self.chunk_idx);
            match self.current.as_ref().unwrap() {
                RowChunk::Constant { value, rows } => {
                    if is_falsy(value) {
                        // Whole chunk is false: skip without scanning it.
                        self.chunk_idx += 1;
                        self.current = None;
                        continue;
                    }
                    if self.row_in_chunk >= *rows {
                        self.chunk_idx += 1;
                        self.current = None;
                        continue;
                    }
                    let row = self.row_in_chunk;
                    self.row_in_chunk += 1;
                    let skip_this = self.matches_seen < self.skip;
                    self.matches_seen += 1;
                    if skip_this {
                        continue;
                    }
                    self.yielded += 1;
                    return Some(Ok(chunk_start + row));
                }
                RowChunk::Buffer { data, rows } => {
                    if self.row_in_chunk >= *rows {
                        self.chunk_idx += 1;
                        self.current = None;
                        continue;
                    }
                    let row = self.row_in_chunk;
                    self.row_in_chunk += 1;
                    if data[row] == 0 {
                        continue;
                    }
                    let skip_this = self.matches_seen < self.skip;
                    self.matches_seen += 1;
                    if skip_this {
                        continue;
                    }
                    self.yielded += 1;
                    return Some(Ok(chunk_start + row));
                }
            }
        }
    }
}

/// Source of the companion mask for `where` iteration: either a boolean
/// CArray (subject to the same constant-chunk elision) or a dense in-memory
/// mask buffer (spec §4.4 "Where": "a CArray or a dense mask buffer").
pub enum MaskSource {
    Array(CArray),
    Dense(Vec<bool>),
}

/// Value iteration selected by a companion boolean mask (spec §4.4 "Where").
pub struct WhereIter {
    array: CArray,
    mask: MaskSource,
    skip: usize,
    limit: Option<usize>,
    /// Total matches seen so far, used only to decide whether `skip` has
    /// been satisfied.
    matches_seen: usize,
    /// Count of rows actually yielded, checked against `limit` (spec §8
    /// scenario 5: kept independent of `matches_seen` so `limit` counts
    /// post-skip yields, not total matches).
    yielded: usize,
    chunk_idx: usize,
    row_in_chunk: usize,
    current_mask_chunk: Option<RowChunk>,
    exhausted: bool,
}

impl WhereIter {
    pub fn new(array: &CArray, mask: MaskSource, skip: usize, limit: Option<usize>) -> Result<Self, CArrayError> {
        let mask_len = match &mask {
            MaskSource::Array(m) => m.len(),
            MaskSource::Dense(d) => d.len(),
        };
        if mask_len != array.len() {
            return Err(CArrayError::InvalidArgument("mask length must equal array length".into()));
        }
        Ok(WhereIter {
            array: array.view(),
            mask,
            skip,
            limit,
            matches_seen: 0,
            yielded: 0,
            chunk_idx: 0,
            row_in_chunk: 0,
            current_mask_chunk: None,
            exhausted: false,
        })
    }

    fn total_chunks(&self) -> usize {
        match &self.mask {
            MaskSource::Array(m) => row_chunk_count(m),
            MaskSource::Dense(_) => 1, // the whole dense buffer is one logical chunk
        }
    }

    fn load_mask_chunk(&mut self) -> Result<bool, CArrayError> {
        if self.chunk_idx >= self.total_chunks() {
            return Ok(false);
        }
        match &self.mask {
            MaskSource::Array(m) => {
                self.current_mask_chunk = Some(load_row_chunk(m, self.chunk_idx)?);
            }
            MaskSource::Dense(d) => {
                self.current_mask_chunk = Some(RowChunk::Buffer {
                    data: d.iter().map(|&b| b as u8).collect(),
                    rows: d.len(),
                });
            }
        }
        self.row_in_chunk = 0;
        Ok(true)
    }

    fn chunk_start(&self) -> usize {
        match &self.mask {
            MaskSource::Array(m) => row_chunk_start(m, self.chunk_idx),
            MaskSource::Dense(_) => 0,
        }
    }
}

impl Iterator for WhereIter {
    type Item = Result<Vec<u8>, CArrayError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted {
                return None;
            }
            if let Some(limit) = self.limit {
                if self.yielded >= limit {
                    self.exhausted = true;
                    return None;
                }
            }

            if self.current_mask_chunk.is_none() {
                match self.load_mask_chunk() {
                    Ok(true) => {}
                    Ok(false) => {
                        self.exhausted = true;
                        return None;
                    }
                    Err(e) => {
                        self.exhausted = true;
                        return Some(Err(e));
                    }
                }
            }

            let chunk_start = self.chunk_start();
            let (is_true, rows) = match self.current_mask_chunk.as_ref().unwrap() {
                RowChunk::Constant { value, rows } => {
                    if is_falsy(value) {
                        self.chunk_idx += 1;
                        self.current_mask_chunk = None;
                        continue;
                    }
                    (true, *rows)
                }
                RowChunk::Buffer { data, rows } => {
                    if self.row_in_chunk >= *rows {
                        self.chunk_idx += 1;
                        self.current_mask_chunk = None;
                        continue;
                    }
                    (data[self.row_in_chunk] != 0, *rows)
                }
            };

            if self.row_in_chunk >= rows {
                self.chunk_idx += 1;
                self.current_mask_chunk = None;
                continue;
            }
            let row = self.row_in_chunk;
            self.row_in_chunk += 1;
            if !is_true {
                continue;
            }
            let skip_this = self.matches_seen < self.skip;
            self.matches_seen += 1;
            if skip_this {
                continue;
            }
            self.yielded += 1;
            return Some(self.array.get_scalar(chunk_start + row));
        }
    }
}
