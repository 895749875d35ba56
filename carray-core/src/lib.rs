//! Columnar, chunked, block-compressed array core.
//!
//! Data flows in through [`carray::CArray::append`]: rows fill a leftover
//! tail buffer; once the tail fills, it is compressed into a [`chunk::Chunk`]
//! and handed to a [`store::ChunkStore`] (in-memory or on-disk). Reads go
//! the other way — a slice read decodes the intersecting chunks directly
//! into a caller-supplied buffer, a scalar read consults a one-block cache,
//! and the [`iter`] module drives range/wheretrue/where traversal with
//! constant-chunk elision.

pub mod carray;
pub mod chunk;
pub mod dtype;
pub mod error;
pub mod iter;
pub mod meta;
pub mod store;

pub use carray::{CArray, CArrayOptions, Mode};
pub use chunk::Chunk;
pub use dtype::{DTypeKind, ElementType};
pub use error::CArrayError;
pub use iter::{MaskSource, RangeIter, WhereIter, WhereTrueIter};
pub use store::{ChunkStore, DiskStore, MemoryStore};
