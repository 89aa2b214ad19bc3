//! Core data models for the indexing and retrieval pipeline.

use serde::Serialize;
use std::path::PathBuf;

/// One indexed source file, as stored in SQLite.
///
/// The absolute path is the unique key: re-indexing the same path updates
/// `last_indexed` instead of creating a second row. Deleting a document
/// cascades to its fragments and vectors.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub path: String,
    pub filename: String,
    pub file_type: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
    /// Null until the first successful pipeline run for this path.
    pub last_indexed: Option<i64>,
    pub metadata: serde_json::Value,
}

/// One chunk of a document's extracted text, the unit of embedding and
/// retrieval. Immutable once persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Fragment {
    pub document_id: i64,
    /// Zero-based position within the document; contiguous `0..n-1`.
    pub chunk_index: i64,
    pub content: String,
    /// SHA-256 hex fingerprint of the exact fragment text.
    pub content_hash: String,
    pub start_offset: Option<i64>,
    pub end_offset: Option<i64>,
    /// Word count, sentence count, chunker variant, and strategy name.
    pub metadata: serde_json::Value,
}

/// A nearest-neighbor match returned from the repository.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub fragment_id: i64,
    pub content: String,
    pub chunk_index: i64,
    pub document_path: String,
    pub filename: String,
    /// `1 − cosine distance`; callers rank by descending similarity.
    pub similarity: f64,
}

/// Aggregate statistics over a chunked document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    pub avg_chunk_size: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub total_words: usize,
    pub avg_words_per_chunk: usize,
}

/// Terminal state of one file's trip through the indexer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexStatus {
    Skipped { reason: String },
    Success { fragments: usize },
    Error { message: String },
}

/// Per-file outcome record collected during a directory sweep.
#[derive(Debug, Clone, Serialize)]
pub struct IndexOutcome {
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: IndexStatus,
}

/// Persisted scheduling descriptor. No scheduler consumes these; the
/// repository only stores the fields.
#[derive(Debug, Clone, Serialize)]
pub struct IndexingJob {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub schedule: String,
    pub last_run: Option<i64>,
    pub next_run: Option<i64>,
    pub status: String,
    pub config: Option<serde_json::Value>,
    pub created_at: i64,
}
