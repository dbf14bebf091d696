use chrono::{DateTime, Utc};
use recollect_core::{RecollectError, RecollectResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Inclusive, 1-based line range of a chunk within its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    /// First line.
    pub start: u32,
    /// Last line, not before `start`.
    pub end: u32,
}

impl LineRange {
    /// Range from `start` to `end`, both inclusive.
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A stored excerpt of a daily note. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryChunk {
    /// Monotonically increasing identifier assigned by the store.
    pub id: i64,
    /// Path or name of the file the excerpt came from.
    pub source: String,
    /// Lines of `source` the excerpt spans, when known.
    pub line_range: Option<LineRange>,
    /// Excerpt text, never blank.
    pub content: String,
    /// When the memory happened (seconds since the epoch), not insertion time.
    pub timestamp: i64,
    /// Free-form classification such as "decision" or "completion".
    pub event_type: Option<String>,
    /// Extra JSON attributes, such as `part`/`parts` for split sections.
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Input for [`ChunkStore::add_chunk`](crate::store::ChunkStore::add_chunk).
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    /// See [`MemoryChunk::source`].
    pub source: String,
    /// See [`MemoryChunk::content`].
    pub content: String,
    /// See [`MemoryChunk::timestamp`].
    pub timestamp: i64,
    /// See [`MemoryChunk::line_range`].
    pub line_range: Option<LineRange>,
    /// See [`MemoryChunk::event_type`].
    pub event_type: Option<String>,
    /// See [`MemoryChunk::metadata`].
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl NewChunk {
    /// Chunk with no line range, event type or metadata.
    pub fn new(source: impl Into<String>, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            timestamp,
            line_range: None,
            event_type: None,
            metadata: None,
        }
    }

    /// Set the inclusive line range.
    pub fn with_lines(mut self, start: u32, end: u32) -> Self {
        self.line_range = Some(LineRange::new(start, end));
        self
    }

    /// Set the event type.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Set the metadata map.
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Check the chunk invariants before anything is written.
    pub fn validate(&self) -> RecollectResult<()> {
        if self.content.trim().is_empty() {
            return Err(RecollectError::Validation(
                "chunk content must not be empty".to_string(),
            ));
        }
        if self.source.trim().is_empty() {
            return Err(RecollectError::Validation(
                "chunk source must not be empty".to_string(),
            ));
        }
        if let Some(range) = self.line_range {
            if range.start > range.end {
                return Err(RecollectError::Validation(format!(
                    "line range {range} is inverted"
                )));
            }
        }
        Ok(())
    }
}

/// Vector representation of exactly one chunk.
///
/// Vectors are only comparable when `model` matches; the search engine
/// never scores an embedding against a query from a different model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// The chunk this vector represents.
    pub chunk_id: i64,
    /// The embedding itself.
    pub vector: Vec<f32>,
    /// Name of the model that produced `vector`.
    pub model: String,
    /// Epoch seconds when the vector was stored.
    pub created_at: i64,
}

/// Append-only analytics record of a semantic query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchLogEntry {
    /// Log row id.
    pub id: i64,
    /// Query text as given.
    pub query: String,
    /// Results returned.
    pub result_count: usize,
    /// Epoch seconds when the search ran.
    pub timestamp: i64,
}

/// Aggregate counts over the chunk store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Stored chunks.
    pub total_chunks: usize,
    /// Distinct source files.
    pub total_sources: usize,
    /// Oldest chunk timestamp, `None` when empty.
    pub earliest_timestamp: Option<i64>,
    /// Newest chunk timestamp, `None` when empty.
    pub latest_timestamp: Option<i64>,
    /// Chunks with an embedding from any model.
    pub embedded_chunks: usize,
}

impl StoreStats {
    /// Fraction of chunks that have an embedding, in `[0, 1]`.
    pub fn coverage(&self) -> f64 {
        self.embedded_chunks as f64 / self.total_chunks.max(1) as f64
    }
}

/// Optional filters applied to search candidates, semantic or substring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Inclusive timestamp bounds.
    pub date_range: Option<DateRange>,
    /// Exact event type match.
    pub event_type: Option<String>,
}

impl SearchFilter {
    /// Keep timestamps in `[start, end]`.
    pub fn with_date_range(mut self, start: i64, end: i64) -> Self {
        self.date_range = Some(DateRange { start, end });
        self
    }

    /// Keep one event type.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }
}

/// Inclusive `[start, end]` range of epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    /// Earliest timestamp kept.
    pub start: i64,
    /// Latest timestamp kept.
    pub end: i64,
}

pub(crate) fn now_epoch_secs() -> i64 {
    Utc::now().timestamp()
}

fn to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
}

/// `YYYY-MM-DD` in UTC.
pub fn format_date(timestamp: i64) -> String {
    to_datetime(timestamp).format("%Y-%m-%d").to_string()
}

/// `YYYY-MM-DD HH:MM` in UTC.
pub fn format_minute(timestamp: i64) -> String {
    to_datetime(timestamp).format("%Y-%m-%d %H:%M").to_string()
}

/// `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn format_second(timestamp: i64) -> String {
    to_datetime(timestamp).format("%Y-%m-%d %H:%M:%S").to_string()
}
