//! Long-term memory over daily notes: a durable chunk store, an embedding
//! pipeline, and progressive-disclosure semantic search.
//!
//! Search is deliberately layered so a caller with a small context budget
//! only pulls what it needs: a compact ranked index first, then the
//! chronological neighbourhood of a hit, then full text for chosen ids.
//!
//! # Main types
//!
//! - [`ChunkStore`] — SQLite-backed store for chunks, embeddings, and the search log.
//! - [`EmbeddingProvider`] — Trait for turning text into vectors.
//! - [`LocalEmbedding`] — Deterministic feature-hashing embeddings.
//! - [`MemorySearch`] — Index, timeline, and detail views over the store.
//! - [`Indexer`] — Splits daily notes into chunks and embeds them.
//! - [`RecollectConfig`] — TOML configuration.

/// Overlapping text windows for long sections.
pub mod chunker;
/// TOML configuration.
pub mod config;
/// Embedding provider trait, local implementation, and backend selection.
pub mod embedding;
/// fastembed (ONNX) embedding backend.
#[cfg(feature = "fastembed")]
pub mod embedding_fastembed;
/// OpenAI-compatible HTTP embedding backend.
#[cfg(feature = "http-embeddings")]
pub mod embedding_http;
/// Daily-note indexing.
pub mod indexer;
/// Chunk, embedding, and search-log records.
pub mod model;
/// Progressive-disclosure search.
pub mod search;
/// SQLite chunk store.
pub mod store;
/// Vector encoding and similarity.
pub mod vector;

pub use chunker::chunk_text;
pub use config::{
    ChunkingConfig, EmbeddingBackend, EmbeddingConfig, RecollectConfig, SearchConfig,
};
pub use embedding::{build_provider, EmbeddingProvider, LocalEmbedding};
#[cfg(feature = "fastembed")]
pub use embedding_fastembed::FastEmbedProvider;
#[cfg(feature = "http-embeddings")]
pub use embedding_http::OpenAiEmbedding;
pub use indexer::{
    discover_notes, extract_sections, note_timestamp, FileReport, IndexReport, Indexer,
    NoteSection, SkipReason,
};
pub use model::{
    DateRange, Embedding, LineRange, MemoryChunk, NewChunk, SearchFilter, SearchLogEntry,
    StoreStats,
};
pub use search::{
    FulltextResult, IndexResult, MemoryDetail, MemorySearch, SearchResults, TimelineEntry,
    DEFAULT_TIMELINE_WINDOW_HOURS,
};
pub use store::ChunkStore;
