//! SQLite-backed repository for documents, fragments, and vectors.
//!
//! The store is an explicit value handed to callers; there is no global
//! connection. Vectors are persisted as little-endian f32 blobs and
//! similarity is computed in-process over the full vector set, which is the
//! right trade for a personal corpus of thousands of fragments.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::error::{Error, Result};
use crate::models::{Document, Fragment, IndexingJob, SearchHit};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    path          TEXT NOT NULL UNIQUE,
    filename      TEXT NOT NULL,
    file_type     TEXT NOT NULL,
    size_bytes    INTEGER NOT NULL,
    content_hash  TEXT NOT NULL,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL,
    last_indexed  INTEGER,
    metadata      TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS fragments (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id   INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    chunk_index   INTEGER NOT NULL,
    content       TEXT NOT NULL,
    content_hash  TEXT NOT NULL,
    start_offset  INTEGER,
    end_offset    INTEGER,
    metadata      TEXT NOT NULL DEFAULT '{}',
    created_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS vectors (
    fragment_id   INTEGER PRIMARY KEY REFERENCES fragments(id) ON DELETE CASCADE,
    embedding     BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS indexing_jobs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL UNIQUE,
    path          TEXT NOT NULL,
    schedule      TEXT NOT NULL,
    last_run      INTEGER,
    next_run      INTEGER,
    status        TEXT NOT NULL DEFAULT 'active',
    config        TEXT,
    created_at    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fragments_document ON fragments(document_id);
CREATE INDEX IF NOT EXISTS idx_fragments_hash ON fragments(content_hash);
CREATE INDEX IF NOT EXISTS idx_documents_path ON documents(path);
CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(content_hash);
"#;

/// Repository handle. Cheap to clone; all methods borrow immutably.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `path` and apply the
    /// schema. WAL mode for concurrent reads, foreign keys on so cascading
    /// deletes fire.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(Error::StorageFailure)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database for tests. Single connection, otherwise each
    /// checkout would see a different empty database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(Error::StorageFailure)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn document_by_path(&self, path: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    pub async fn document_by_id(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    /// Insert a document row, or refresh the existing row for the same
    /// path. Returns the definitive row id either way; a concurrent insert
    /// for the same path cannot produce a duplicate.
    ///
    /// The conflict branch nulls `last_indexed`: once a re-index starts the
    /// prior index state is invalid, and the stamp comes back only after
    /// fragments and vectors are fully persisted. A run interrupted in
    /// between is retried, never skipped.
    pub async fn insert_document(
        &self,
        path: &str,
        filename: &str,
        file_type: &str,
        size_bytes: i64,
        content_hash: &str,
        metadata: &serde_json::Value,
    ) -> Result<i64> {
        let now = now_epoch();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (path, filename, file_type, size_bytes, content_hash,
                                   created_at, updated_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                filename = excluded.filename,
                file_type = excluded.file_type,
                size_bytes = excluded.size_bytes,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at,
                metadata = excluded.metadata,
                last_indexed = NULL
            RETURNING id
            "#,
        )
        .bind(path)
        .bind(filename)
        .bind(file_type)
        .bind(size_bytes)
        .bind(content_hash)
        .bind(now)
        .bind(now)
        .bind(metadata.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Stamp a successful pipeline completion on the document.
    pub async fn touch_last_indexed(&self, document_id: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET last_indexed = ?, updated_at = ? WHERE id = ?")
            .bind(now_epoch())
            .bind(now_epoch())
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_fragment(&self, fragment: &Fragment) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO fragments (document_id, chunk_index, content, content_hash,
                                   start_offset, end_offset, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(fragment.document_id)
        .bind(fragment.chunk_index)
        .bind(&fragment.content)
        .bind(&fragment.content_hash)
        .bind(fragment.start_offset)
        .bind(fragment.end_offset)
        .bind(fragment.metadata.to_string())
        .bind(now_epoch())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn insert_vector(&self, fragment_id: i64, embedding: &[f32]) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO vectors (fragment_id, embedding) VALUES (?, ?)")
            .bind(fragment_id)
            .bind(vec_to_blob(embedding))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop all fragments (and, via cascade, vectors) for a document.
    /// Used by forced re-indexing before fresh fragments are written.
    pub async fn delete_fragments(&self, document_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM fragments WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Nearest fragments to `query` by cosine similarity, best first.
    /// `k = 0` and an empty index both yield an empty result.
    pub async fn similarity_search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT v.fragment_id, v.embedding, f.content, f.chunk_index,
                   d.path AS document_path, d.filename
            FROM vectors v
            JOIN fragments f ON f.id = v.fragment_id
            JOIN documents d ON d.id = f.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let embedding = blob_to_vec(&blob);
            let similarity = cosine_similarity(query, &embedding);
            hits.push(SearchHit {
                fragment_id: row.try_get("fragment_id")?,
                content: row.try_get("content")?,
                chunk_index: row.try_get("chunk_index")?,
                document_path: row.try_get("document_path")?,
                filename: row.try_get("filename")?,
                similarity,
            });
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Documents newest-first.
    pub async fn list_documents(&self, limit: i64, offset: i64) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY id DESC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    /// Delete a document and, via cascade, its fragments and vectors.
    /// Returns false when no row matched.
    pub async fn delete_document(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All stored document paths, for pattern-based removal.
    pub async fn document_paths(&self) -> Result<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM documents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }

    pub async fn document_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn fragment_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn fragment_count_for(&self, document_id: i64) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Create or update a named scheduling descriptor.
    pub async fn upsert_job(
        &self,
        name: &str,
        path: &str,
        schedule: &str,
        config: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO indexing_jobs (name, path, schedule, config, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                path = excluded.path,
                schedule = excluded.schedule,
                config = excluded.config
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(path)
        .bind(schedule)
        .bind(config.map(|c| c.to_string()))
        .bind(now_epoch())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn list_jobs(&self) -> Result<Vec<IndexingJob>> {
        let rows = sqlx::query("SELECT * FROM indexing_jobs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let metadata_text: String = row.try_get("metadata")?;
    Ok(Document {
        id: row.try_get("id")?,
        path: row.try_get("path")?,
        filename: row.try_get("filename")?,
        file_type: row.try_get("file_type")?,
        size_bytes: row.try_get("size_bytes")?,
        content_hash: row.try_get("content_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_indexed: row.try_get("last_indexed")?,
        metadata: serde_json::from_str(&metadata_text).unwrap_or(serde_json::Value::Null),
    })
}

fn job_from_row(row: &SqliteRow) -> Result<IndexingJob> {
    let config_text: Option<String> = row.try_get("config")?;
    Ok(IndexingJob {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        schedule: row.try_get("schedule")?,
        last_run: row.try_get("last_run")?,
        next_run: row.try_get("next_run")?,
        status: row.try_get("status")?,
        config: config_text.and_then(|c| serde_json::from_str(&c).ok()),
        created_at: row.try_get("created_at")?,
    })
}

/// Little-endian f32 encoding for the embedding blob.
pub fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(v.len() * 4);
    for x in v {
        blob.extend_from_slice(&x.to_le_bytes());
    }
    blob
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in [-1, 1]; zero vectors and length mismatches
/// score 0.0 so they sort last.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += *x as f64 * *x as f64;
        norm_b += *y as f64 * *y as f64;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(document_id: i64, chunk_index: i64, content: &str) -> Fragment {
        Fragment {
            document_id,
            chunk_index,
            content: content.to_string(),
            content_hash: crate::extract::sha256_hex(content),
            start_offset: Some(0),
            end_offset: Some(content.len() as i64),
            metadata: serde_json::json!({}),
        }
    }

    async fn insert_doc(store: &Store, path: &str) -> i64 {
        store
            .insert_document(path, "f.txt", ".txt", 10, "hash", &serde_json::json!({}))
            .await
            .unwrap()
    }

    #[test]
    fn blob_roundtrip_preserves_values() {
        let v = vec![0.5f32, -1.25, 3.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_handles_zero_and_mismatched_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn same_path_upserts_to_one_row() {
        let store = Store::open_in_memory().await.unwrap();
        let first = insert_doc(&store, "/docs/a.txt").await;
        let second = insert_doc(&store, "/docs/a.txt").await;
        assert_eq!(first, second);
        assert_eq!(store.document_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleting_document_cascades_to_fragments_and_vectors() {
        let store = Store::open_in_memory().await.unwrap();
        let doc_id = insert_doc(&store, "/docs/a.txt").await;
        let frag_id = store.insert_fragment(&fragment(doc_id, 0, "body")).await.unwrap();
        store.insert_vector(frag_id, &[1.0, 0.0]).await.unwrap();

        assert!(store.delete_document("/docs/a.txt").await.unwrap());
        assert_eq!(store.fragment_count().await.unwrap(), 0);
        assert!(store.similarity_search(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_of_unknown_path_reports_false() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(!store.delete_document("/nope.txt").await.unwrap());
    }

    #[tokio::test]
    async fn search_orders_by_similarity_descending() {
        let store = Store::open_in_memory().await.unwrap();
        let doc_id = insert_doc(&store, "/docs/a.txt").await;
        let near = store.insert_fragment(&fragment(doc_id, 0, "near")).await.unwrap();
        let far = store.insert_fragment(&fragment(doc_id, 1, "far")).await.unwrap();
        let mid = store.insert_fragment(&fragment(doc_id, 2, "mid")).await.unwrap();
        store.insert_vector(near, &[1.0, 0.0]).await.unwrap();
        store.insert_vector(far, &[0.0, 1.0]).await.unwrap();
        store.insert_vector(mid, &[1.0, 1.0]).await.unwrap();

        let hits = store.similarity_search(&[1.0, 0.0], 3).await.unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.fragment_id).collect();
        assert_eq!(ids, vec![near, mid, far]);
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn search_truncates_to_k_and_zero_k_is_empty() {
        let store = Store::open_in_memory().await.unwrap();
        let doc_id = insert_doc(&store, "/docs/a.txt").await;
        for i in 0..5 {
            let id = store
                .insert_fragment(&fragment(doc_id, i, &format!("frag {}", i)))
                .await
                .unwrap();
            store.insert_vector(id, &[1.0, i as f32]).await.unwrap();
        }
        assert_eq!(store.similarity_search(&[1.0, 0.0], 2).await.unwrap().len(), 2);
        assert!(store.similarity_search(&[1.0, 0.0], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_fragments_clears_prior_index_state() {
        let store = Store::open_in_memory().await.unwrap();
        let doc_id = insert_doc(&store, "/docs/a.txt").await;
        for i in 0..3 {
            store.insert_fragment(&fragment(doc_id, i, "x")).await.unwrap();
        }
        assert_eq!(store.delete_fragments(doc_id).await.unwrap(), 3);
        assert_eq!(store.fragment_count_for(doc_id).await.unwrap(), 0);
        // the document row survives
        assert!(store.document_by_id(doc_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn touch_last_indexed_sets_timestamp() {
        let store = Store::open_in_memory().await.unwrap();
        let doc_id = insert_doc(&store, "/docs/a.txt").await;
        assert!(store
            .document_by_id(doc_id)
            .await
            .unwrap()
            .unwrap()
            .last_indexed
            .is_none());
        store.touch_last_indexed(doc_id).await.unwrap();
        assert!(store
            .document_by_id(doc_id)
            .await
            .unwrap()
            .unwrap()
            .last_indexed
            .is_some());
    }

    #[tokio::test]
    async fn upsert_invalidates_prior_index_stamp() {
        let store = Store::open_in_memory().await.unwrap();
        let doc_id = insert_doc(&store, "/docs/a.txt").await;
        store.touch_last_indexed(doc_id).await.unwrap();

        // a re-index begins with the same upsert; until it completes the
        // row must not look indexed
        let same = insert_doc(&store, "/docs/a.txt").await;
        assert_eq!(same, doc_id);
        let doc = store.document_by_id(doc_id).await.unwrap().unwrap();
        assert!(doc.last_indexed.is_none());
    }

    #[tokio::test]
    async fn list_documents_is_newest_first() {
        let store = Store::open_in_memory().await.unwrap();
        insert_doc(&store, "/docs/a.txt").await;
        insert_doc(&store, "/docs/b.txt").await;
        let docs = store.list_documents(10, 0).await.unwrap();
        assert_eq!(docs[0].path, "/docs/b.txt");
        assert_eq!(docs[1].path, "/docs/a.txt");
    }

    #[tokio::test]
    async fn jobs_upsert_by_name_and_roundtrip() {
        let store = Store::open_in_memory().await.unwrap();
        let first = store.upsert_job("nightly", "/docs", "0 2 * * *", None).await.unwrap();
        let config = serde_json::json!({"force": true});
        let second = store
            .upsert_job("nightly", "/papers", "0 3 * * *", Some(&config))
            .await
            .unwrap();
        assert_eq!(first, second);

        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].path, "/papers");
        assert_eq!(jobs[0].status, "active");
        assert_eq!(jobs[0].config, Some(config));
    }
}
