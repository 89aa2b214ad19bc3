//! Query-time retrieval: embed the query, rank stored vectors by cosine
//! similarity, and apply the optional score floor.

use crate::embedder::OllamaClient;
use crate::error::{Error, Result};
use crate::models::SearchHit;
use crate::store::Store;

/// Top-`limit` fragments for `query`, best first. `threshold` drops hits
/// scoring below it after ranking, so results can come back shorter than
/// `limit` (or empty) without being an error.
pub async fn search_index(
    store: &Store,
    embedder: &OllamaClient,
    query: &str,
    limit: usize,
    threshold: Option<f64>,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() {
        return Err(Error::InvalidInput("query must not be empty".to_string()));
    }

    let query_vector = embedder.embed_one(query).await?;
    let mut hits = store.similarity_search(&query_vector, limit).await?;

    if let Some(floor) = threshold {
        hits.retain(|h| h.similarity >= floor);
    }

    tracing::debug!("query matched {} fragments", hits.len());
    Ok(hits)
}
