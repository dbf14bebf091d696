use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::model::NewChunk;
use crate::store::ChunkStore;
use chrono::NaiveDate;
use recollect_core::{RecollectError, RecollectResult};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sections this short (in characters, heading included) carry no memory.
const MIN_SECTION_CHARS: usize = 50;

/// Event type of the text before the first heading.
const PREAMBLE_EVENT_TYPE: &str = "section";

/// A `##`-headed section of a daily note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteSection {
    /// Section text, heading line included.
    pub content: String,
    /// Lowercased heading without `#`s, or `section` for the preamble.
    pub event_type: String,
    /// First line, 1-based.
    pub line_start: u32,
    /// Last line, inclusive.
    pub line_end: u32,
}

/// Split a note at every line starting with `##`.
///
/// Each section keeps its heading line. Text before the first heading forms a
/// section of its own. Sections of [`MIN_SECTION_CHARS`] characters or fewer
/// are dropped.
pub fn extract_sections(text: &str) -> Vec<NoteSection> {
    let mut sections = Vec::new();
    let mut current_type: Option<String> = None;
    let mut start = 1u32;
    let mut lines: Vec<&str> = Vec::new();
    let mut line_no = 0u32;

    for line in text.split('\n') {
        line_no += 1;
        let stripped = line.trim();
        if stripped.starts_with("##") {
            push_section(&mut sections, &lines, current_type.take(), start, line_no - 1);
            current_type = Some(stripped.replace('#', "").trim().to_lowercase());
            start = line_no;
            lines = vec![line];
        } else {
            lines.push(line);
        }
    }
    push_section(&mut sections, &lines, current_type, start, line_no);
    sections
}

fn push_section(
    sections: &mut Vec<NoteSection>,
    lines: &[&str],
    event_type: Option<String>,
    line_start: u32,
    line_end: u32,
) {
    if lines.is_empty() {
        return;
    }
    let content = lines.join("\n");
    if content.chars().count() <= MIN_SECTION_CHARS || content.trim().is_empty() {
        return;
    }
    sections.push(NoteSection {
        content,
        event_type: event_type.unwrap_or_else(|| PREAMBLE_EVENT_TYPE.to_string()),
        line_start,
        line_end: line_end.max(line_start),
    });
}

/// Midnight UTC of the `YYYY-MM-DD` file stem, if it is one.
pub fn note_timestamp(path: &Path) -> Option<i64> {
    let stem = path.file_stem()?.to_str()?;
    let date = NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
}

/// Why a file produced no chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The file name is not a `YYYY-MM-DD` date.
    NotADailyNote,
    /// Chunks from this file are already stored.
    AlreadyIndexed,
    /// The file could not be read as UTF-8 text.
    Unreadable,
}

/// Outcome of indexing one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileReport {
    /// Path as given, also used as the chunks' source.
    pub path: String,
    /// Why the file produced no chunks, if it was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    /// Read error behind [`SkipReason::Unreadable`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sections long enough to keep.
    pub sections: usize,
    /// Chunks stored (or that would be, on a dry run).
    pub chunks: usize,
    /// Chunks embedded in this run.
    pub embedded: usize,
    /// Set when the embedding backend failed; the chunks stay unembedded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_error: Option<String>,
}

/// Outcome of indexing many files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Set for a dry run, which writes nothing.
    pub dry_run: bool,
    /// One report per input path, in input order.
    pub files: Vec<FileReport>,
    /// Sum of the per-file chunk counts.
    pub total_chunks: usize,
    /// Sum of the per-file embedded counts.
    pub total_embedded: usize,
}

/// Turns daily notes into stored, embedded chunks.
pub struct Indexer {
    store: Arc<ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
}

impl Indexer {
    /// Index into `store`, embedding with `embedder`.
    pub fn new(
        store: Arc<ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
        }
    }

    /// Index one daily note. Files already present in the store are skipped,
    /// so running twice adds nothing. A file that cannot be read is reported
    /// as [`SkipReason::Unreadable`]. The chunks of one file are stored
    /// together or not at all.
    pub async fn index_file(&self, path: &Path, dry_run: bool) -> RecollectResult<FileReport> {
        let source = path.display().to_string();
        let mut report = FileReport {
            path: source.clone(),
            ..FileReport::default()
        };

        let Some(timestamp) = note_timestamp(path) else {
            warn!(path = %source, "skipping file without a YYYY-MM-DD name");
            report.skipped = Some(SkipReason::NotADailyNote);
            return Ok(report);
        };
        if self.store.has_source(&source)? {
            debug!(path = %source, "already indexed");
            report.skipped = Some(SkipReason::AlreadyIndexed);
            return Ok(report);
        }

        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %source, error = %e, "skipping unreadable file");
                report.skipped = Some(SkipReason::Unreadable);
                report.error = Some(e.to_string());
                return Ok(report);
            }
        };
        let sections = extract_sections(&text);
        report.sections = sections.len();

        let chunks = self.build_chunks(&source, timestamp, &sections)?;
        report.chunks = chunks.len();
        if dry_run || chunks.is_empty() {
            return Ok(report);
        }

        let ids = self.store.add_chunks(&chunks)?;

        let texts: Vec<String> = chunks.into_iter().map(|c| c.content).collect();
        match self.embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                let model = self.embedder.model_name();
                for (id, vector) in ids.iter().zip(&vectors) {
                    self.store.add_embedding(*id, vector, model)?;
                }
                report.embedded = vectors.len().min(ids.len());
            }
            Err(e) => {
                warn!(path = %source, error = %e, "embedding failed, chunks left unembedded");
                report.embed_error = Some(e.to_string());
            }
        }

        info!(
            path = %source,
            chunks = report.chunks,
            embedded = report.embedded,
            "indexed note"
        );
        Ok(report)
    }

    fn build_chunks(
        &self,
        source: &str,
        timestamp: i64,
        sections: &[NoteSection],
    ) -> RecollectResult<Vec<NewChunk>> {
        let mut chunks = Vec::new();
        for section in sections {
            let base = NewChunk::new(source, String::new(), timestamp)
                .with_lines(section.line_start, section.line_end)
                .with_event_type(section.event_type.clone());

            if section.content.chars().count() <= self.chunking.max_chars {
                chunks.push(NewChunk {
                    content: section.content.clone(),
                    ..base
                });
                continue;
            }

            let parts = self.chunking.split(&section.content)?;
            let total = parts.len();
            for (i, part) in parts.into_iter().enumerate() {
                let mut metadata = HashMap::new();
                metadata.insert("part".to_string(), serde_json::json!(i + 1));
                metadata.insert("parts".to_string(), serde_json::json!(total));
                chunks.push(
                    NewChunk {
                        content: part,
                        ..base.clone()
                    }
                    .with_metadata(metadata),
                );
            }
        }
        Ok(chunks)
    }

    /// Index every path in order. Unreadable files are reported and skipped;
    /// store errors stop the run.
    pub async fn index_paths(&self, paths: &[PathBuf], dry_run: bool) -> RecollectResult<IndexReport> {
        let mut report = IndexReport {
            dry_run,
            ..IndexReport::default()
        };
        for path in paths {
            let file = self.index_file(path, dry_run).await?;
            report.total_chunks += file.chunks;
            report.total_embedded += file.embedded;
            report.files.push(file);
        }
        Ok(report)
    }

    /// Embed every chunk that has no embedding from the active model,
    /// `batch_size` at a time. Vectors left by another model are replaced.
    ///
    /// Returns how many chunks were embedded. A backend error stops the run;
    /// batches written before it are kept.
    pub async fn embed_pending(&self, batch_size: usize) -> RecollectResult<usize> {
        if batch_size == 0 {
            return Err(RecollectError::Validation(
                "batch size must be greater than zero".to_string(),
            ));
        }

        let model = self.embedder.model_name();
        let pending = self.store.get_chunks_missing_model(model)?;
        let mut embedded = 0;
        for batch in pending.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            for (chunk, vector) in batch.iter().zip(&vectors) {
                self.store.add_embedding(chunk.id, vector, model)?;
            }
            embedded += batch.len().min(vectors.len());
            debug!(embedded, remaining = pending.len() - embedded, "embedded batch");
        }
        info!(embedded, model, "embedded pending chunks");
        Ok(embedded)
    }
}

/// Daily notes (`YYYY-MM-DD.md`) directly inside `dir`, sorted by path.
pub async fn discover_notes(dir: &Path) -> RecollectResult<Vec<PathBuf>> {
    let mut notes = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_markdown = path.extension().is_some_and(|ext| ext == "md");
        if is_markdown && note_timestamp(&path).is_some() && entry.file_type().await?.is_file() {
            notes.push(path);
        }
    }
    notes.sort();
    Ok(notes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::embedding::LocalEmbedding;
    use async_trait::async_trait;

    const NOTE: &str = "\
# Monday

## Decisions
We decided to move the nightly build to the new runner pool.

## Log
ok

## Learnings
The flaky integration test was caused by a shared temp directory.
";

    struct FailingEmbedding;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedding {
        async fn embed(&self, _text: &str) -> RecollectResult<Vec<f32>> {
            Err(RecollectError::Backend("service unavailable".to_string()))
        }

        fn dimension(&self) -> usize {
            8
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn indexer(store: Arc<ChunkStore>) -> Indexer {
        Indexer::new(
            store,
            Arc::new(LocalEmbedding::new(64)),
            ChunkingConfig::default(),
        )
    }

    #[test]
    fn test_extract_sections() {
        let sections = extract_sections(NOTE);
        assert_eq!(sections.len(), 2);

        assert_eq!(sections[0].event_type, "decisions");
        assert!(sections[0].content.starts_with("## Decisions\n"));
        assert_eq!(sections[0].line_start, 3);
        assert_eq!(sections[0].line_end, 5);

        assert_eq!(sections[1].event_type, "learnings");
        assert_eq!(sections[1].line_start, 9);
    }

    #[test]
    fn test_preamble_is_a_section() {
        let text = format!("{}\n## Next\nshort", "intro ".repeat(20));
        let sections = extract_sections(&text);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].event_type, "section");
        assert_eq!(sections[0].line_start, 1);
        assert_eq!(sections[0].line_end, 1);
    }

    #[test]
    fn test_note_timestamp() {
        assert_eq!(
            note_timestamp(Path::new("memory/2026-01-05.md")),
            Some(1_767_571_200)
        );
        assert_eq!(note_timestamp(Path::new("memory/notes.md")), None);
        assert_eq!(note_timestamp(Path::new("2026-13-40.md")), None);
    }

    #[tokio::test]
    async fn test_index_file_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("2026-01-05.md");
        std::fs::write(&path, NOTE).unwrap();

        let store = Arc::new(ChunkStore::open_in_memory().unwrap());
        let indexer = indexer(store.clone());

        let first = indexer.index_file(&path, false).await.unwrap();
        assert_eq!(first.chunks, 2);
        assert_eq!(first.embedded, 2);
        assert!(first.skipped.is_none());

        let second = indexer.index_file(&path, false).await.unwrap();
        assert_eq!(second.skipped, Some(SkipReason::AlreadyIndexed));
        assert_eq!(second.chunks, 0);
        assert_eq!(store.get_stats().unwrap().total_chunks, 2);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("2026-01-05.md");
        std::fs::write(&path, NOTE).unwrap();

        let store = Arc::new(ChunkStore::open_in_memory().unwrap());
        let report = indexer(store.clone()).index_file(&path, true).await.unwrap();
        assert_eq!(report.chunks, 2);
        assert_eq!(report.embedded, 0);
        assert_eq!(store.get_stats().unwrap().total_chunks, 0);
    }

    #[tokio::test]
    async fn test_non_date_file_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("README.md");
        std::fs::write(&path, NOTE).unwrap();

        let store = Arc::new(ChunkStore::open_in_memory().unwrap());
        let report = indexer(store).index_file(&path, false).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::NotADailyNote));
    }

    #[tokio::test]
    async fn test_long_sections_are_split_into_parts() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("2026-01-06.md");
        let body = "The migration touched every service. ".repeat(40);
        std::fs::write(&path, format!("## Migration\n{body}")).unwrap();

        let store = Arc::new(ChunkStore::open_in_memory().unwrap());
        let report = indexer(store.clone()).index_file(&path, false).await.unwrap();
        assert!(report.chunks > 1);

        let chunks = store.search_by_text("migration", 100).unwrap();
        assert_eq!(chunks.len(), report.chunks);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 500);
            let meta = chunk.metadata.as_ref().unwrap();
            assert_eq!(meta["parts"], serde_json::json!(report.chunks));
        }
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("2026-01-05.md");
        std::fs::write(&path, NOTE).unwrap();

        let store = Arc::new(ChunkStore::open_in_memory().unwrap());
        let indexer = Indexer::new(
            store.clone(),
            Arc::new(FailingEmbedding),
            ChunkingConfig::default(),
        );
        let report = indexer.index_file(&path, false).await.unwrap();
        assert_eq!(report.chunks, 2);
        assert_eq!(report.embedded, 0);
        assert!(report.embed_error.is_some());
        assert_eq!(store.get_unembedded_chunks().unwrap().len(), 2);

        assert!(indexer.embed_pending(10).await.is_err());
    }

    #[tokio::test]
    async fn test_embed_pending_in_batches() {
        let store = Arc::new(ChunkStore::open_in_memory().unwrap());
        for i in 0..5 {
            store
                .add_chunk(&NewChunk::new("2026-01-05.md", format!("pending chunk {i}"), 0))
                .unwrap();
        }
        let indexer = indexer(store.clone());

        assert_eq!(indexer.embed_pending(2).await.unwrap(), 5);
        assert!(store.get_unembedded_chunks().unwrap().is_empty());
        assert_eq!(indexer.embed_pending(2).await.unwrap(), 0);
        assert!(matches!(
            indexer.embed_pending(0).await,
            Err(RecollectError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_file_does_not_stop_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("2026-01-04.md");
        let binary = tmp.path().join("2026-01-05.md");
        let good = tmp.path().join("2026-01-06.md");
        std::fs::write(&binary, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        std::fs::write(&good, NOTE).unwrap();

        let store = Arc::new(ChunkStore::open_in_memory().unwrap());
        let report = indexer(store.clone())
            .index_paths(&[missing, binary, good.clone()], false)
            .await
            .unwrap();

        assert_eq!(report.files.len(), 3);
        for file in &report.files[..2] {
            assert_eq!(file.skipped, Some(SkipReason::Unreadable));
            assert!(file.error.is_some());
            assert_eq!(file.chunks, 0);
        }
        assert!(report.files[2].skipped.is_none());
        assert_eq!(report.total_chunks, 2);
        assert!(store.has_source(&good.display().to_string()).unwrap());

        let json = serde_json::to_value(&report.files[0]).unwrap();
        assert_eq!(json["skipped"], "unreadable");
    }

    #[tokio::test]
    async fn test_embed_pending_reembeds_after_model_change() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("2026-01-05.md");
        std::fs::write(&path, NOTE).unwrap();

        let store = Arc::new(ChunkStore::open_in_memory().unwrap());
        indexer(store.clone()).index_file(&path, false).await.unwrap();

        let wider: Arc<dyn EmbeddingProvider> = Arc::new(LocalEmbedding::new(128));
        let reindexer = Indexer::new(store.clone(), wider.clone(), ChunkingConfig::default());
        assert_eq!(reindexer.embed_pending(8).await.unwrap(), 2);
        assert_eq!(reindexer.embed_pending(8).await.unwrap(), 0);
        assert!(store.has_embeddings_for(wider.model_name()).unwrap());
        assert_eq!(store.foreign_model_embeddings(wider.model_name()).unwrap(), 0);

        let search = crate::search::MemorySearch::new(store, wider);
        let results = search
            .search("flaky integration test", 5, &crate::model::SearchFilter::default())
            .await
            .unwrap();
        assert!(matches!(results, crate::search::SearchResults::Semantic(ref r) if r.len() == 2));
    }

    #[tokio::test]
    async fn test_discover_notes() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["2026-01-06.md", "2026-01-05.md", "todo.md", "2026-01-07.txt"] {
            std::fs::write(tmp.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(tmp.path().join("2026-01-08.md")).unwrap();

        let notes = discover_notes(tmp.path()).await.unwrap();
        let names: Vec<String> = notes
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["2026-01-05.md", "2026-01-06.md"]);
    }
}
