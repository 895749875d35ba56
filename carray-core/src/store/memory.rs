use std::rc::Rc;

use crate::chunk::Chunk;
use crate::error::CArrayError;
use crate::store::ChunkStore;

/// In-memory chunk store: a plain vector (spec §4.3 "in-memory" column).
#[derive(Debug, Default)]
pub struct MemoryStore {
    chunks: Vec<Rc<Chunk>>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new(read_only: bool) -> Self {
        MemoryStore {
            chunks: Vec::new(),
            read_only,
        }
    }
}

impl ChunkStore for MemoryStore {
    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn get(&mut self, i: usize) -> Result<Rc<Chunk>, CArrayError> {
        self.chunks
            .get(i)
            .cloned()
            .ok_or_else(|| CArrayError::OutOfRange(format!("chunk {i} out of range")))
    }

    fn append(&mut self, chunk: Chunk) -> Result<(), CArrayError> {
        if self.read_only {
            return Err(CArrayError::ReadOnly);
        }
        self.chunks.push(Rc::new(chunk));
        Ok(())
    }

    fn set(&mut self, i: usize, chunk: Chunk) -> Result<(), CArrayError> {
        if self.read_only {
            return Err(CArrayError::ReadOnly);
        }
        let slot = self
            .chunks
            .get_mut(i)
            .ok_or_else(|| CArrayError::OutOfRange(format!("chunk {i} out of range")))?;
        *slot = Rc::new(chunk);
        Ok(())
    }

    fn pop(&mut self) -> Result<(), CArrayError> {
        if self.read_only {
            return Err(CArrayError::ReadOnly);
        }
        self.chunks
            .pop()
            .map(|_| ())
            .ok_or_else(|| CArrayError::OutOfRange("pop from empty chunk store".into()))
    }

    fn flush_tail(&mut self, _chunk: Chunk) -> Result<(), CArrayError> {
        // No on-disk tail file to keep in sync with for an in-memory store.
        Ok(())
    }

    fn read_flushed_tail(&mut self) -> Result<Option<Chunk>, CArrayError> {
        Ok(None)
    }

    fn free_cache(&mut self) {}

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
