use crate::embedding::EmbeddingProvider;
use crate::model::{format_date, format_minute, format_second, SearchFilter};
use crate::store::ChunkStore;
use crate::vector::cosine_similarity;
use recollect_core::{RecollectError, RecollectResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hours on each side of the anchor chunk shown by [`MemorySearch::get_timeline`].
pub const DEFAULT_TIMELINE_WINDOW_HOURS: u32 = 5;

const TITLE_CHARS: usize = 50;
const TIMELINE_PREVIEW_CHARS: usize = 100;
const FULLTEXT_PREVIEW_CHARS: usize = 200;

/// Stage 1 view: just enough to decide what to look at next.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexResult {
    /// Chunk id, for [`MemorySearch::get_timeline`] and [`MemorySearch::get_memories`].
    pub id: i64,
    /// First line of the content, at most 50 characters plus `...`.
    pub title: String,
    /// `YYYY-MM-DD` in UTC.
    pub date: String,
    /// Event type of the chunk, if any.
    pub event_type: Option<String>,
    /// Source file of the chunk.
    pub source: String,
    /// Cosine similarity rounded to 4 decimal places.
    pub relevance: f32,
}

/// Stage 2 view: a chunk in its chronological neighbourhood.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    /// Chunk id.
    pub id: i64,
    /// `YYYY-MM-DD HH:MM` in UTC.
    pub timestamp: String,
    /// Event type of the chunk, if any.
    pub event_type: Option<String>,
    /// Content cut to 100 characters.
    pub preview: String,
}

/// Stage 3 view: the full chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryDetail {
    /// Chunk id.
    pub id: i64,
    /// Source file of the chunk.
    pub source: String,
    /// `start-end`, when the chunk came from known lines.
    pub lines: Option<String>,
    /// Full chunk text.
    pub content: String,
    /// `YYYY-MM-DD HH:MM:SS` in UTC.
    pub timestamp: String,
    /// Event type of the chunk, if any.
    pub event_type: Option<String>,
    /// Metadata stored with the chunk.
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Substring search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FulltextResult {
    /// Chunk id.
    pub id: i64,
    /// Source file of the chunk.
    pub source: String,
    /// Content cut to 200 characters.
    pub preview: String,
    /// `YYYY-MM-DD` in UTC.
    pub date: String,
    /// Event type of the chunk, if any.
    pub event_type: Option<String>,
}

/// Outcome of [`MemorySearch::search`], tagged with the strategy used.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", content = "results", rename_all = "lowercase")]
pub enum SearchResults {
    /// Ranked by similarity to the query.
    Semantic(Vec<IndexResult>),
    /// Substring matches, newest first.
    Fulltext(Vec<FulltextResult>),
}

impl SearchResults {
    /// Number of hits, whichever strategy produced them.
    pub fn len(&self) -> usize {
        match self {
            Self::Semantic(r) => r.len(),
            Self::Fulltext(r) => r.len(),
        }
    }

    /// True when nothing matched.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Progressive-disclosure search over a [`ChunkStore`].
///
/// Callers start with the compact [`search_index`](Self::search_index),
/// widen to a [`get_timeline`](Self::get_timeline) around an interesting hit,
/// and fetch full text with [`get_memories`](Self::get_memories) only for the
/// ids they actually need.
pub struct MemorySearch {
    store: Arc<ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MemorySearch {
    /// Search `store`, embedding queries with `embedder`.
    pub fn new(store: Arc<ChunkStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    /// Semantic search returning compact results, best match first.
    ///
    /// Only embeddings produced by the active provider's model are scored.
    /// Equal rounded scores are ordered newest first, then by id. Stored
    /// vectors containing NaN or infinity are never returned.
    pub async fn search_index(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> RecollectResult<Vec<IndexResult>> {
        if query.trim().is_empty() {
            return Err(RecollectError::Validation(
                "search query must not be empty".to_string(),
            ));
        }

        let query_vec = self.embedder.embed(query).await?;
        let model = self.embedder.model_name();

        let foreign = self.store.foreign_model_embeddings(model)?;
        if foreign > 0 {
            warn!(
                model,
                skipped = foreign,
                "ignoring embeddings produced by other models"
            );
        }

        let candidates = self.store.embedded_candidates(model, filter)?;
        let mut scored = Vec::with_capacity(candidates.len());
        for (chunk, embedding) in candidates {
            if embedding.vector.len() != query_vec.len() {
                return Err(RecollectError::Validation(format!(
                    "embedding for chunk {} has dimension {}, query has {}",
                    chunk.id,
                    embedding.vector.len(),
                    query_vec.len()
                )));
            }
            let score = cosine_similarity(&query_vec, &embedding.vector);
            if !score.is_finite() {
                warn!(chunk_id = chunk.id, "skipping chunk with non-finite embedding");
                continue;
            }
            scored.push((round4(score), chunk));
        }

        scored.sort_by(|(ra, a), (rb, b)| {
            rb.total_cmp(ra)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);

        let results: Vec<IndexResult> = scored
            .into_iter()
            .map(|(relevance, chunk)| IndexResult {
                id: chunk.id,
                title: title_of(&chunk.content),
                date: format_date(chunk.timestamp),
                event_type: chunk.event_type,
                source: chunk.source,
                relevance,
            })
            .collect();

        self.store.log_search(query, results.len())?;
        info!(query, results = results.len(), "semantic search");
        Ok(results)
    }

    /// Chunks within `window_hours` of chunk `id`, oldest first.
    pub fn get_timeline(&self, id: i64, window_hours: u32) -> RecollectResult<Vec<TimelineEntry>> {
        let chunks = self.store.get_timeline(id, window_hours)?;
        debug!(chunk_id = id, window_hours, entries = chunks.len(), "timeline");
        Ok(chunks
            .into_iter()
            .map(|chunk| TimelineEntry {
                id: chunk.id,
                timestamp: format_minute(chunk.timestamp),
                event_type: chunk.event_type,
                preview: preview(&chunk.content, TIMELINE_PREVIEW_CHARS),
            })
            .collect())
    }

    /// Full details for the given ids, ordered by id. Unknown ids are skipped.
    pub fn get_memories(&self, ids: &[i64]) -> RecollectResult<Vec<MemoryDetail>> {
        let chunks = self.store.get_chunks(ids)?;
        Ok(chunks
            .into_iter()
            .map(|chunk| MemoryDetail {
                id: chunk.id,
                source: chunk.source,
                lines: chunk.line_range.map(|range| format!("{range}")),
                content: chunk.content,
                timestamp: format_second(chunk.timestamp),
                event_type: chunk.event_type,
                metadata: chunk.metadata,
            })
            .collect())
    }

    /// Substring search, newest first. Works without any embeddings.
    pub fn search_fulltext(&self, query: &str, limit: usize) -> RecollectResult<Vec<FulltextResult>> {
        self.search_fulltext_filtered(query, limit, &SearchFilter::default())
    }

    /// [`search_fulltext`](Self::search_fulltext) restricted by event type
    /// and date range.
    pub fn search_fulltext_filtered(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> RecollectResult<Vec<FulltextResult>> {
        let chunks = self.store.search_by_text_filtered(query, limit, filter)?;
        Ok(chunks
            .into_iter()
            .map(|chunk| FulltextResult {
                id: chunk.id,
                preview: preview(&chunk.content, FULLTEXT_PREVIEW_CHARS),
                date: format_date(chunk.timestamp),
                event_type: chunk.event_type,
                source: chunk.source,
            })
            .collect())
    }

    /// Semantic search when the active model has embeddings, substring
    /// search otherwise. `filter` applies to both.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> RecollectResult<SearchResults> {
        if self.store.has_embeddings_for(self.embedder.model_name())? {
            let results = self.search_index(query, limit, filter).await?;
            return Ok(SearchResults::Semantic(results));
        }
        info!(
            model = self.embedder.model_name(),
            "no embeddings for active model, falling back to text search"
        );
        Ok(SearchResults::Fulltext(
            self.search_fulltext_filtered(query, limit, filter)?,
        ))
    }
}

fn round4(score: f32) -> f32 {
    (score * 10_000.0).round() / 10_000.0
}

/// First line, cut to [`TITLE_CHARS`] characters.
fn title_of(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or_default();
    preview(first_line, TITLE_CHARS)
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
