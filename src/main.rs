use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use docdex::config::{self, Config};
use docdex::embedder::OllamaClient;
use docdex::indexer::Indexer;
use docdex::models::{IndexOutcome, IndexStatus};
use docdex::search::search_index;
use docdex::store::Store;

#[derive(Parser)]
#[command(name = "docdex", version, about = "Index local documents and search them semantically")]
struct Cli {
    /// Configuration file (defaults to ~/.config/docdex/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the configured location
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the default configuration file and an empty database
    Init,
    /// Index a file or directory
    Add {
        /// File or directory to index
        path: PathBuf,
        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
        /// Re-index even if content is unchanged
        #[arg(short, long)]
        force: bool,
        /// Chunking strategy override (fixed or semantic)
        #[arg(long)]
        strategy: Option<String>,
        /// Fragment size override, in words
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Fragment overlap override, in words
        #[arg(long = "chunk-overlap")]
        chunk_overlap: Option<usize>,
    },
    /// Search indexed documents
    Search {
        /// Query text
        query: String,
        /// Maximum number of results
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
        /// Minimum similarity score, 0.0 to 1.0
        #[arg(short, long)]
        threshold: Option<f64>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// List indexed documents
    ListDocs {
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Remove documents and their fragments from the index
    Remove {
        /// Path of the indexed document
        path: Option<PathBuf>,
        /// Remove every document whose stored path matches this glob
        #[arg(long, conflicts_with = "path")]
        pattern: Option<String>,
    },
    /// Show version information
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let mut config = config::load_config(&config_path)?;
    if let Some(db_path) = &cli.db_path {
        config.database.path = db_path.clone();
    }

    match cli.command {
        Commands::Init => init(&config, &config_path).await,
        Commands::Add {
            path,
            recursive,
            force,
            strategy,
            chunk_size,
            chunk_overlap,
        } => {
            if let Some(strategy) = strategy {
                config.chunking.strategy = strategy;
            }
            if let Some(size) = chunk_size {
                config.chunking.size = size;
            }
            if let Some(overlap) = chunk_overlap {
                config.chunking.overlap = overlap;
            }
            config.validate()?;
            add(config, &path, recursive, force).await
        }
        Commands::Search {
            query,
            limit,
            threshold,
            format,
        } => search(&config, &query, limit, threshold, format).await,
        Commands::ListDocs {
            limit,
            offset,
            format,
        } => list_docs(&config, limit, offset, format).await,
        Commands::Remove { path, pattern } => remove(&config, path.as_deref(), pattern.as_deref()).await,
        Commands::Version => {
            println!("docdex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn init(config: &Config, config_path: &std::path::Path) -> Result<()> {
    config::write_default_config(config_path)?;
    Store::open(&config.database.path).await?;
    println!("Configuration: {}", config_path.display());
    println!("Database:      {}", config.database.path.display());
    Ok(())
}

async fn add(config: Config, path: &std::path::Path, recursive: bool, force: bool) -> Result<()> {
    let store = Store::open(&config.database.path).await?;
    let embedder = OllamaClient::new(&config.ollama)?;
    let indexer = Indexer::new(config, store, embedder);

    let outcomes = if path.is_dir() {
        indexer.index_directory(path, recursive, force).await?
    } else {
        indexer.preflight().await?;
        vec![indexer.index_file(path, force).await]
    };

    report_outcomes(&outcomes);
    Ok(())
}

fn report_outcomes(outcomes: &[IndexOutcome]) {
    let mut indexed = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    for outcome in outcomes {
        match &outcome.status {
            IndexStatus::Success { fragments } => {
                indexed += 1;
                println!("  indexed {} ({} fragments)", outcome.path.display(), fragments);
            }
            IndexStatus::Skipped { reason } => {
                skipped += 1;
                println!("  skipped {} ({})", outcome.path.display(), reason);
            }
            IndexStatus::Error { message } => {
                failed += 1;
                println!("  failed  {} ({})", outcome.path.display(), message);
            }
        }
    }
    println!("{} indexed, {} skipped, {} failed", indexed, skipped, failed);
}

async fn search(
    config: &Config,
    query: &str,
    limit: usize,
    threshold: Option<f64>,
    format: OutputFormat,
) -> Result<()> {
    let store = Store::open(&config.database.path).await?;
    let embedder = OllamaClient::new(&config.ollama)?;
    let hits = search_index(&store, &embedder, query, limit, threshold).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&hits)?),
        OutputFormat::Table => {
            if hits.is_empty() {
                println!("No matches.");
                return Ok(());
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} (fragment {})",
                    i + 1,
                    hit.similarity,
                    hit.filename,
                    hit.chunk_index
                );
                println!("   {}", preview(&hit.content, 200));
            }
        }
    }
    Ok(())
}

async fn list_docs(config: &Config, limit: i64, offset: i64, format: OutputFormat) -> Result<()> {
    let store = Store::open(&config.database.path).await?;
    let docs = store.list_documents(limit, offset).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&docs)?),
        OutputFormat::Table => {
            if docs.is_empty() {
                println!("No documents indexed.");
                return Ok(());
            }
            for doc in &docs {
                let indexed = match doc.last_indexed {
                    Some(ts) => chrono::DateTime::from_timestamp(ts, 0)
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    None => "never".to_string(),
                };
                println!(
                    "{:>5}  {:<10} {:>10}  {:<17} {}",
                    doc.id, doc.file_type, doc.size_bytes, indexed, doc.path
                );
            }
            println!("{} document(s)", docs.len());
        }
    }
    Ok(())
}

async fn remove(
    config: &Config,
    path: Option<&std::path::Path>,
    pattern: Option<&str>,
) -> Result<()> {
    let store = Store::open(&config.database.path).await?;

    if let Some(pattern) = pattern {
        let matcher = globset::Glob::new(pattern)?.compile_matcher();
        let mut removed = 0usize;
        for stored in store.document_paths().await? {
            if matcher.is_match(&stored) && store.delete_document(&stored).await? {
                println!("Removed {}", stored);
                removed += 1;
            }
        }
        println!("{} document(s) removed", removed);
        return Ok(());
    }

    let path = path.ok_or_else(|| anyhow::anyhow!("provide a path or --pattern"))?;

    // canonicalize fails for files deleted from disk, so fall back to a
    // lexically absolute path to match what was stored
    let key = match path.canonicalize() {
        Ok(p) => p,
        Err(_) => std::path::absolute(path)?,
    };

    if store.delete_document(&key.to_string_lossy()).await? {
        println!("Removed {}", key.display());
    } else {
        println!("Not indexed: {}", key.display());
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        flattened
    } else {
        let cut: String = flattened.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}
