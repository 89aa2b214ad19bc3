//! The indexing pipeline: extract, chunk, embed, persist.
//!
//! Each file runs through an independent state machine and yields exactly
//! one [`IndexOutcome`]; a failure is confined to its file and never aborts
//! a directory sweep.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::chunker::Chunker;
use crate::config::Config;
use crate::embedder::OllamaClient;
use crate::error::{Error, Result};
use crate::extract;
use crate::models::{IndexOutcome, IndexStatus};
use crate::store::Store;

pub struct Indexer {
    config: Config,
    store: Store,
    chunker: Chunker,
    embedder: OllamaClient,
}

impl Indexer {
    pub fn new(config: Config, store: Store, embedder: OllamaClient) -> Self {
        let chunker = Chunker::new(config.chunking.clone());
        Self {
            config,
            store,
            chunker,
            embedder,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Verify the embedding service is reachable and the model is pulled,
    /// pulling it if necessary. Run once before any batch of work.
    pub async fn preflight(&self) -> Result<()> {
        if !self.embedder.check_connection().await {
            return Err(Error::ServiceUnavailable(format!(
                "no Ollama service at {}",
                self.embedder.host()
            )));
        }
        if !self.embedder.model_available().await? {
            tracing::info!("embedding model not present, pulling it now");
            self.embedder.pull_model().await?;
        }
        Ok(())
    }

    /// Index one file, reporting the terminal state instead of failing.
    pub async fn index_file(&self, path: &Path, force: bool) -> IndexOutcome {
        match self.index_file_inner(path, force).await {
            Ok(status) => IndexOutcome {
                path: path.to_path_buf(),
                status,
            },
            Err(e) => IndexOutcome {
                path: path.to_path_buf(),
                status: IndexStatus::Error {
                    message: e.to_string(),
                },
            },
        }
    }

    async fn index_file_inner(&self, path: &Path, force: bool) -> Result<IndexStatus> {
        let path = path.canonicalize().map_err(|_| {
            Error::NotFound(format!("file not found: {}", path.display()))
        })?;
        let path_key = path.to_string_lossy().to_string();

        // A path that already completed the pipeline is skipped unless the
        // caller forces a rebuild. A null last_indexed marks a run that
        // never finished, so those rows are retried.
        if !force {
            if let Some(existing) = self.store.document_by_path(&path_key).await? {
                if existing.last_indexed.is_some() {
                    return Ok(IndexStatus::Skipped {
                        reason: "already indexed; pass force to re-index".to_string(),
                    });
                }
            }
        }

        let info = extract::file_info(&path)?;
        let extracted = extract::extract(&path, &self.config.processing)?;

        let document_id = self
            .store
            .insert_document(
                &path_key,
                &info.filename,
                &info.file_type,
                info.size_bytes as i64,
                &extracted.content_hash,
                &extracted.metadata,
            )
            .await?;

        // Stale fragments from a prior run are removed before the fresh
        // set is written; the vector rows go with them via cascade.
        self.store.delete_fragments(document_id).await?;

        let fragments = self.chunker.chunk(&extracted.content, document_id)?;
        if fragments.is_empty() {
            return Ok(IndexStatus::Skipped {
                reason: "no extractable text".to_string(),
            });
        }

        let stats = crate::chunker::chunk_stats(&fragments);
        tracing::debug!(
            "{}: {} fragments, {} words, avg {} chars",
            path.display(),
            stats.total_chunks,
            stats.total_words,
            stats.avg_chunk_size
        );

        let texts: Vec<String> = fragments.iter().map(|f| f.content.clone()).collect();
        let vectors = self.embedder.embed_with_retry(&texts).await?;

        for (fragment, vector) in fragments.iter().zip(vectors.iter()) {
            let fragment_id = self.store.insert_fragment(fragment).await?;
            self.store.insert_vector(fragment_id, vector).await?;
        }

        self.store.touch_last_indexed(document_id).await?;
        tracing::debug!(
            "indexed {} into {} fragments",
            path.display(),
            fragments.len()
        );

        Ok(IndexStatus::Success {
            fragments: fragments.len(),
        })
    }

    /// Index every candidate file under `dir`, one outcome per file.
    /// An empty directory is a successful no-op; the service preflight
    /// only runs when there is work to do.
    pub async fn index_directory(
        &self,
        dir: &Path,
        recursive: bool,
        force: bool,
    ) -> Result<Vec<IndexOutcome>> {
        let files = collect_files(dir, recursive, &self.config.processing.extensions, &self.config.processing.exclude)?;
        if files.is_empty() {
            tracing::info!("no candidate files under {}", dir.display());
            return Ok(Vec::new());
        }

        self.preflight().await?;

        let mut outcomes = Vec::with_capacity(files.len());
        for file in &files {
            tracing::info!("indexing {}", file.display());
            outcomes.push(self.index_file(file, force).await);
        }
        Ok(outcomes)
    }
}

/// Enumerate candidate files under `dir`, grouped by extension in the
/// configured order and in walk order within each extension.
pub fn collect_files(
    dir: &Path,
    recursive: bool,
    extensions: &[String],
    exclude: &[String],
) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::NotFound(format!(
            "directory not found: {}",
            dir.display()
        )));
    }

    let excludes = build_globset(exclude)?;

    let mut walker = WalkDir::new(dir);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut found: Vec<PathBuf> = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            Error::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "walk error")
            }))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if excludes.is_match(&path) {
            continue;
        }
        found.push(path);
    }

    let mut files = Vec::new();
    for ext in extensions {
        files.extend(
            found
                .iter()
                .filter(|p| extract::file_type(p) == *ext)
                .cloned(),
        );
    }
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::InvalidConfiguration(format!("bad exclude pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::InvalidConfiguration(e.to_string()))
}
