use crate::model::{
    now_epoch_secs, Embedding, LineRange, MemoryChunk, NewChunk, SearchFilter, SearchLogEntry,
    StoreStats,
};
use crate::vector::{decode, encode};
use parking_lot::Mutex;
use recollect_core::{RecollectError, RecollectResult};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS memory_chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_file TEXT NOT NULL,
        line_start INTEGER,
        line_end INTEGER,
        content TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        event_type TEXT,
        metadata TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_timestamp ON memory_chunks(timestamp);
    CREATE INDEX IF NOT EXISTS idx_chunks_source ON memory_chunks(source_file);
    CREATE INDEX IF NOT EXISTS idx_chunks_type ON memory_chunks(event_type);

    CREATE TABLE IF NOT EXISTS embeddings (
        chunk_id INTEGER PRIMARY KEY REFERENCES memory_chunks(id),
        vector BLOB NOT NULL,
        model TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS search_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        query TEXT NOT NULL,
        result_count INTEGER NOT NULL,
        timestamp INTEGER NOT NULL
    );
";

/// Chunk columns, in the order [`row_to_chunk`] reads them. Always alias the
/// chunk table as `c`.
const CHUNK_COLUMNS: &str =
    "c.id, c.source_file, c.line_start, c.line_end, c.content, c.timestamp, c.event_type, c.metadata";

/// Durable SQLite store for memory chunks, their embeddings, and the search log.
///
/// One connection guarded by a mutex: a single writer whose writes are
/// committed before each call returns. Concurrent writers in other processes
/// are not coordinated.
pub struct ChunkStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ChunkStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> RecollectResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        let store = Self::init(conn, Some(path.to_path_buf()))?;
        info!(path = %path.display(), "chunk store opened");
        Ok(store)
    }

    /// Private in-memory database, gone when the store is dropped.
    pub fn open_in_memory() -> RecollectResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> RecollectResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(storage_err)?;
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Location of the database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ---- chunks ----

    /// Persist a new chunk and return its id.
    pub fn add_chunk(&self, chunk: &NewChunk) -> RecollectResult<i64> {
        chunk.validate()?;
        let metadata = chunk
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO memory_chunks
                (source_file, content, timestamp, line_start, line_end, event_type, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chunk.source,
                chunk.content,
                chunk.timestamp,
                chunk.line_range.map(|r| r.start),
                chunk.line_range.map(|r| r.end),
                chunk.event_type,
                metadata,
            ],
        )
        .map_err(storage_err)?;
        let id = conn.last_insert_rowid();
        debug!(chunk_id = id, source = %chunk.source, "stored chunk");
        Ok(id)
    }

    /// Persist several chunks in one transaction and return their ids in
    /// input order. Nothing is written unless every insert succeeds.
    pub fn add_chunks(&self, chunks: &[NewChunk]) -> RecollectResult<Vec<i64>> {
        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            chunk.validate()?;
            let metadata = chunk
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            rows.push((chunk, metadata));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(storage_err)?;
        let mut ids = Vec::with_capacity(rows.len());
        for (chunk, metadata) in &rows {
            tx.execute(
                "INSERT INTO memory_chunks
                    (source_file, content, timestamp, line_start, line_end, event_type, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    chunk.source,
                    chunk.content,
                    chunk.timestamp,
                    chunk.line_range.map(|r| r.start),
                    chunk.line_range.map(|r| r.end),
                    chunk.event_type,
                    metadata,
                ],
            )
            .map_err(storage_err)?;
            ids.push(tx.last_insert_rowid());
        }
        tx.commit().map_err(storage_err)?;
        debug!(count = ids.len(), "stored chunk batch");
        Ok(ids)
    }

    /// Fetch one chunk by id.
    pub fn get_chunk(&self, id: i64) -> RecollectResult<Option<MemoryChunk>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {CHUNK_COLUMNS} FROM memory_chunks c WHERE c.id = ?1"),
            params![id],
            row_to_chunk,
        )
        .optional()
        .map_err(storage_err)
    }

    /// Batch fetch, ordered by id. Unknown ids are skipped.
    pub fn get_chunks(&self, ids: &[i64]) -> RecollectResult<Vec<MemoryChunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM memory_chunks c WHERE c.id IN ({placeholders}) ORDER BY c.id"
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), row_to_chunk)
            .map_err(storage_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
    }

    /// Chunks that have no embedding yet, ordered by id.
    pub fn get_unembedded_chunks(&self) -> RecollectResult<Vec<MemoryChunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM memory_chunks c
                 LEFT JOIN embeddings e ON c.id = e.chunk_id
                 WHERE e.chunk_id IS NULL
                 ORDER BY c.id"
            ))
            .map_err(storage_err)?;
        let rows = stmt.query_map([], row_to_chunk).map_err(storage_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
    }

    /// Chunks with no embedding produced by `model`, ordered by id. Chunks
    /// embedded only by other models are included so they can be re-embedded.
    pub fn get_chunks_missing_model(&self, model: &str) -> RecollectResult<Vec<MemoryChunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM memory_chunks c
                 LEFT JOIN embeddings e ON c.id = e.chunk_id AND e.model = ?1
                 WHERE e.chunk_id IS NULL
                 ORDER BY c.id"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![model], row_to_chunk)
            .map_err(storage_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
    }

    /// Substring match on content (ASCII case-insensitive), newest first.
    pub fn search_by_text(&self, substring: &str, limit: usize) -> RecollectResult<Vec<MemoryChunk>> {
        self.search_by_text_filtered(substring, limit, &SearchFilter::default())
    }

    /// [`search_by_text`](Self::search_by_text) restricted by event type and
    /// inclusive date range.
    pub fn search_by_text_filtered(
        &self,
        substring: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> RecollectResult<Vec<MemoryChunk>> {
        let pattern = format!("%{}%", escape_like(substring));
        let (since, until) = date_bounds(filter);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM memory_chunks c
                 WHERE c.content LIKE ?1 ESCAPE '\\'
                   AND (?3 IS NULL OR c.event_type = ?3)
                   AND (?4 IS NULL OR c.timestamp >= ?4)
                   AND (?5 IS NULL OR c.timestamp <= ?5)
                 ORDER BY c.timestamp DESC, c.id DESC
                 LIMIT ?2"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(
                params![pattern, clamp_limit(limit), filter.event_type, since, until],
                row_to_chunk,
            )
            .map_err(storage_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
    }

    /// Chunks within `window_hours` of the anchor chunk (inclusive on both
    /// sides), ascending by timestamp. Empty when the anchor does not exist.
    pub fn get_timeline(&self, id: i64, window_hours: u32) -> RecollectResult<Vec<MemoryChunk>> {
        let conn = self.conn.lock();
        let anchor: Option<i64> = conn
            .query_row(
                "SELECT timestamp FROM memory_chunks WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        let Some(anchor) = anchor else {
            return Ok(Vec::new());
        };

        let window = i64::from(window_hours) * 3600;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM memory_chunks c
                 WHERE c.timestamp BETWEEN ?1 AND ?2
                 ORDER BY c.timestamp ASC, c.id ASC"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(
                params![anchor.saturating_sub(window), anchor.saturating_add(window)],
                row_to_chunk,
            )
            .map_err(storage_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
    }

    /// Whether any chunk was already indexed from `source`.
    pub fn has_source(&self, source: &str) -> RecollectResult<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM memory_chunks WHERE source_file = ?1)",
            params![source],
            |row| row.get(0),
        )
        .map_err(storage_err)
    }

    /// Counts over the whole store.
    pub fn get_stats(&self) -> RecollectResult<StoreStats> {
        let conn = self.conn.lock();
        let (total_chunks, total_sources, earliest_timestamp, latest_timestamp) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT source_file), MIN(timestamp), MAX(timestamp)
                 FROM memory_chunks",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                },
            )
            .map_err(storage_err)?;
        let embedded_chunks: i64 = conn
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))
            .map_err(storage_err)?;

        Ok(StoreStats {
            total_chunks: total_chunks as usize,
            total_sources: total_sources as usize,
            earliest_timestamp,
            latest_timestamp,
            embedded_chunks: embedded_chunks as usize,
        })
    }

    // ---- embeddings ----

    /// Store the embedding for `chunk_id`, replacing any previous one.
    pub fn add_embedding(&self, chunk_id: i64, vector: &[f32], model: &str) -> RecollectResult<()> {
        if vector.is_empty() {
            return Err(RecollectError::Validation(
                "embedding vector must not be empty".to_string(),
            ));
        }
        if model.trim().is_empty() {
            return Err(RecollectError::Validation(
                "embedding model name must not be empty".to_string(),
            ));
        }

        let conn = self.conn.lock();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM memory_chunks WHERE id = ?1)",
                params![chunk_id],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        if !exists {
            return Err(RecollectError::NotFound(format!("chunk {chunk_id}")));
        }

        conn.execute(
            "INSERT OR REPLACE INTO embeddings (chunk_id, vector, model, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![chunk_id, encode(vector), model, now_epoch_secs()],
        )
        .map_err(storage_err)?;
        debug!(chunk_id, model, dimension = vector.len(), "stored embedding");
        Ok(())
    }

    /// The stored embedding of `chunk_id`, decoded.
    pub fn get_embedding(&self, chunk_id: i64) -> RecollectResult<Option<Embedding>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT vector, model, created_at FROM embeddings WHERE chunk_id = ?1",
                params![chunk_id],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(storage_err)?;

        row.map(|(blob, model, created_at)| {
            Ok(Embedding {
                chunk_id,
                vector: decode(&blob)?,
                model,
                created_at,
            })
        })
        .transpose()
    }

    /// Whether at least one embedding produced by `model` exists.
    pub fn has_embeddings_for(&self, model: &str) -> RecollectResult<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM embeddings WHERE model = ?1)",
            params![model],
            |row| row.get(0),
        )
        .map_err(storage_err)
    }

    /// Number of embeddings produced by any model other than `model`.
    pub fn foreign_model_embeddings(&self, model: &str) -> RecollectResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM embeddings WHERE model != ?1",
                params![model],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        Ok(count as usize)
    }

    /// Embedded chunks for `model` that pass `filter`, in id order.
    ///
    /// Embeddings from other models are never returned, so callers can score
    /// every candidate against a query vector from `model`.
    pub fn embedded_candidates(
        &self,
        model: &str,
        filter: &SearchFilter,
    ) -> RecollectResult<Vec<(MemoryChunk, Embedding)>> {
        let (since, until) = date_bounds(filter);

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS}, e.vector, e.model, e.created_at
                 FROM memory_chunks c
                 JOIN embeddings e ON c.id = e.chunk_id
                 WHERE e.model = ?1
                   AND (?2 IS NULL OR c.event_type = ?2)
                   AND (?3 IS NULL OR c.timestamp >= ?3)
                   AND (?4 IS NULL OR c.timestamp <= ?4)
                 ORDER BY c.id"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![model, filter.event_type, since, until], |row| {
                Ok((
                    row_to_chunk(row)?,
                    row.get::<_, Vec<u8>>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, i64>(10)?,
                ))
            })
            .map_err(storage_err)?;

        let mut candidates = Vec::new();
        for row in rows {
            let (chunk, blob, model, created_at) = row.map_err(storage_err)?;
            let embedding = Embedding {
                chunk_id: chunk.id,
                vector: decode(&blob)?,
                model,
                created_at,
            };
            candidates.push((chunk, embedding));
        }
        Ok(candidates)
    }

    // ---- search log ----

    /// Append one search-log entry.
    pub fn log_search(&self, query: &str, result_count: usize) -> RecollectResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO search_log (query, result_count, timestamp) VALUES (?1, ?2, ?3)",
            params![query, result_count as i64, now_epoch_secs()],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent search log entries, newest first.
    pub fn recent_searches(&self, limit: usize) -> RecollectResult<Vec<SearchLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, query, result_count, timestamp FROM search_log
                 ORDER BY id DESC LIMIT ?1",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![clamp_limit(limit)], |row| {
                Ok(SearchLogEntry {
                    id: row.get(0)?,
                    query: row.get(1)?,
                    result_count: row.get::<_, i64>(2)? as usize,
                    timestamp: row.get(3)?,
                })
            })
            .map_err(storage_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
    }
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<MemoryChunk> {
    let line_start: Option<u32> = row.get(2)?;
    let line_end: Option<u32> = row.get(3)?;
    let metadata: Option<String> = row.get(7)?;
    let metadata = metadata
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))
        })
        .transpose()?;

    Ok(MemoryChunk {
        id: row.get(0)?,
        source: row.get(1)?,
        line_range: match (line_start, line_end) {
            (Some(start), Some(end)) => Some(LineRange { start, end }),
            _ => None,
        },
        content: row.get(4)?,
        timestamp: row.get(5)?,
        event_type: row.get(6)?,
        metadata,
    })
}

fn date_bounds(filter: &SearchFilter) -> (Option<i64>, Option<i64>) {
    match filter.date_range {
        Some(range) => (Some(range.start), Some(range.end)),
        None => (None, None),
    }
}

fn storage_err(e: rusqlite::Error) -> RecollectError {
    RecollectError::Storage(e.to_string())
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Escape `LIKE` wildcards so the needle matches literally.
fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
