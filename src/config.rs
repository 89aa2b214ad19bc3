use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Fully-populated application configuration, assembled once before any
/// component is constructed. CLI overrides are applied to this struct and
/// re-validated; they are never threaded through call sites.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ollama: OllamaConfig,
    pub chunking: ChunkingConfig,
    pub processing: ProcessingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: config_dir().join("index.db"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Embedding dimensionality for the configured model.
    pub dims: usize,
    /// Texts per concurrently-issued batch group.
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            timeout_secs: 30,
            dims: 768,
            batch_size: 10,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// `fixed` (token windows) or `semantic` (sentence grouping).
    pub strategy: String,
    /// Target fragment size in whitespace tokens.
    pub size: usize,
    /// Tokens carried between consecutive fragments. Must be < size.
    pub overlap: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: "semantic".to_string(),
            size: 512,
            overlap: 50,
            min_chunk_size: 100,
            max_chunk_size: 2048,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Candidate file extensions, matched in order during enumeration.
    pub extensions: Vec<String>,
    /// Glob patterns for paths to skip during directory sweeps.
    pub exclude: Vec<String>,
    pub max_file_size_bytes: u64,
    /// Source text encoding: `utf-8` (with Latin-1 fallback) or `latin-1`.
    pub encoding: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            extensions: vec![".pdf".to_string(), ".txt".to_string(), ".md".to_string()],
            exclude: Vec::new(),
            max_file_size_bytes: 50 * 1024 * 1024,
            encoding: "utf-8".to_string(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        match self.chunking.strategy.as_str() {
            "fixed" | "semantic" => {}
            other => {
                return Err(Error::InvalidConfiguration(format!(
                    "unsupported chunking strategy: '{}'. Must be fixed or semantic.",
                    other
                )))
            }
        }
        if self.chunking.size == 0 {
            return Err(Error::InvalidConfiguration(
                "chunking.size must be > 0".to_string(),
            ));
        }
        if self.chunking.overlap >= self.chunking.size {
            return Err(Error::InvalidConfiguration(format!(
                "chunking.overlap ({}) must be smaller than chunking.size ({})",
                self.chunking.overlap, self.chunking.size
            )));
        }
        if self.chunking.min_chunk_size > self.chunking.max_chunk_size {
            return Err(Error::InvalidConfiguration(
                "chunking.min_chunk_size must be <= chunking.max_chunk_size".to_string(),
            ));
        }
        if self.ollama.dims == 0 {
            return Err(Error::InvalidConfiguration(
                "ollama.dims must be > 0".to_string(),
            ));
        }
        if self.ollama.batch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "ollama.batch_size must be > 0".to_string(),
            ));
        }
        if self.processing.extensions.is_empty() {
            return Err(Error::InvalidConfiguration(
                "processing.extensions must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration directory following XDG conventions.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("docdex");
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join("docdex")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load configuration from a TOML file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content).map_err(|e| {
        Error::InvalidConfiguration(format!("failed to parse {}: {}", path.display(), e))
    })?;
    config.validate()?;
    Ok(config)
}

/// Write a default configuration file if none exists yet.
pub fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(&Config::default())
        .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn unknown_strategy_rejected() {
        let mut config = Config::default();
        config.chunking.strategy = "paragraph".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert!(err.to_string().contains("paragraph"));
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let mut config = Config::default();
        config.chunking.size = 50;
        config.chunking.overlap = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            strategy = "fixed"
            size = 128
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.strategy, "fixed");
        assert_eq!(config.chunking.size, 128);
        assert_eq!(config.ollama.model, "nomic-embed-text");
        assert_eq!(config.ollama.dims, 768);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/docdex-config.toml")).unwrap();
        assert_eq!(config.chunking.strategy, "semantic");
    }

    #[test]
    fn default_config_roundtrips_through_toml() {
        let rendered = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.processing.extensions.len(), 3);
    }
}
