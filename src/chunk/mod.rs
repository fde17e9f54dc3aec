//! Chunks: identity, status and resolution from a directory probe

pub mod resolver;
pub mod types;

pub use resolver::{select_chunk_dirs, ChunkResolver, DirLevel, DirSelection, ResolvedChunks};
pub use types::{sanitize_path, ChunkRef, ChunkStatus, ROOT_KEY};
