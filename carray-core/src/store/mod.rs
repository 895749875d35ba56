//! Chunk store: the ordered sequence of Chunks behind a CArray (spec §4.3).
//!
//! Re-architected as a capability-set trait per the source's dynamic-dispatch
//! redesign note, rather than duck-typing between a list-backed and a
//! disk-backed implementation. The CArray holds `Box<dyn ChunkStore>`.

mod disk;
mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use crate::chunk::Chunk;
use crate::error::CArrayError;

pub trait ChunkStore: std::fmt::Debug {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&mut self, i: usize) -> Result<std::rc::Rc<Chunk>, CArrayError>;

    fn append(&mut self, chunk: Chunk) -> Result<(), CArrayError>;

    fn set(&mut self, i: usize, chunk: Chunk) -> Result<(), CArrayError>;

    fn pop(&mut self) -> Result<(), CArrayError>;

    /// Write `chunk` as the tail without incrementing the logical count
    /// (spec §4.3: persisted so a crash leaves the tail recoverable, but
    /// not counted as a committed chunk).
    fn flush_tail(&mut self, chunk: Chunk) -> Result<(), CArrayError>;

    /// Read back a previously flushed tail chunk, if the store is backed
    /// by a file at logical index `self.len()`. Used when reopening a
    /// non-chunk-aligned persistent array.
    fn read_flushed_tail(&mut self) -> Result<Option<Chunk>, CArrayError>;

    fn free_cache(&mut self);

    fn is_read_only(&self) -> bool;
}
