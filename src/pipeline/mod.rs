// Ingestion normalization: quality filter and chunking
// Both stages are pure functions over extracted documents

pub mod chunking;
pub mod filter;

pub use chunking::{Chunk, ChunkingConfig, chunk_documents};
pub use filter::{FilteredDocument, filter_documents, require_content};
