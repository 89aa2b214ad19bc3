//! docdex: index local documents into SQLite and retrieve them by
//! semantic similarity.
//!
//! The pipeline extracts text from PDF, plain-text, and markdown files,
//! splits it into overlapping fragments, embeds each fragment through a
//! local Ollama instance, and persists everything in a single SQLite
//! database. Retrieval embeds the query the same way and ranks stored
//! vectors by cosine similarity.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod models;
pub mod search;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use indexer::Indexer;
pub use store::Store;
