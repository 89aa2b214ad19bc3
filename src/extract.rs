//! Text extraction for source documents (PDF, plain text, markdown).
//!
//! Returns UTF-8 text plus a metadata mapping and a SHA-256 content
//! fingerprint. Extraction failures are file-scoped: the pipeline reports
//! the file and moves on.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::config::ProcessingConfig;
use crate::error::{Error, Result};

/// Extracted text with its metadata mapping and content fingerprint.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub content: String,
    pub metadata: serde_json::Value,
    pub content_hash: String,
}

/// File-level facts recorded on the document row.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    pub filename: String,
    pub file_type: String,
    pub size_bytes: u64,
}

/// SHA-256 hex fingerprint of a text. Deterministic; fixed 64-char output.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// File type tag: the lowercased extension including the dot (".pdf").
pub fn file_type(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

pub fn file_info(path: &Path) -> Result<FileInfo> {
    let meta = std::fs::metadata(path)?;
    Ok(FileInfo {
        path: path.to_path_buf(),
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        file_type: file_type(path),
        size_bytes: meta.len(),
    })
}

/// Extract text, metadata, and fingerprint from a file.
pub fn extract(path: &Path, processing: &ProcessingConfig) -> Result<Extracted> {
    if !path.exists() {
        return Err(Error::NotFound(format!("file not found: {}", path.display())));
    }

    let size = std::fs::metadata(path)?.len();
    if size > processing.max_file_size_bytes {
        return Err(Error::ExtractionFailure(format!(
            "{} is {} bytes, exceeding the {}-byte limit",
            path.display(),
            size,
            processing.max_file_size_bytes
        )));
    }

    match file_type(path).as_str() {
        ".pdf" => extract_pdf(path),
        ".txt" | ".md" => extract_text_file(path, processing),
        other => Err(Error::InvalidConfiguration(format!(
            "unsupported file type: '{}'",
            other
        ))),
    }
}

fn extract_pdf(path: &Path) -> Result<Extracted> {
    let content = pdf_extract::extract_text(path)
        .map_err(|e| Error::ExtractionFailure(format!("{}: {}", path.display(), e)))?;

    let metadata = serde_json::json!({
        "file_type": "pdf",
        "character_count": content.len(),
        "word_count": content.split_whitespace().count(),
    });

    let content_hash = sha256_hex(&content);
    Ok(Extracted {
        content,
        metadata,
        content_hash,
    })
}

fn extract_text_file(path: &Path, processing: &ProcessingConfig) -> Result<Extracted> {
    let bytes = std::fs::read(path)?;

    let content = match processing.encoding.as_str() {
        "latin-1" => latin1_to_string(&bytes),
        // utf-8 with Latin-1 fallback for legacy files
        _ => match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => latin1_to_string(e.as_bytes()),
        },
    };

    let metadata = serde_json::json!({
        "file_type": if file_type(path) == ".md" { "markdown" } else { "text" },
        "line_count": content.lines().count(),
        "word_count": content.split_whitespace().count(),
        "character_count": content.len(),
    });

    let content_hash = sha256_hex(&content);
    Ok(Extracted {
        content,
        metadata,
        content_hash,
    })
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingConfig;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn fingerprint_is_deterministic_and_fixed_length() {
        let a = sha256_hex("hello");
        let b = sha256_hex("hello");
        let c = sha256_hex("goodbye");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn file_type_lowercases_extension() {
        assert_eq!(file_type(Path::new("/tmp/Report.PDF")), ".pdf");
        assert_eq!(file_type(Path::new("notes.md")), ".md");
        assert_eq!(file_type(Path::new("LICENSE")), "");
    }

    #[test]
    fn extracts_markdown_with_metadata() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_file(&dir, "notes.md", b"# Title\n\nOne two three.");
        let extracted = extract(&path, &ProcessingConfig::default()).unwrap();
        assert_eq!(extracted.content, "# Title\n\nOne two three.");
        assert_eq!(extracted.metadata["file_type"], "markdown");
        assert_eq!(extracted.metadata["line_count"], 3);
        assert_eq!(extracted.content_hash, sha256_hex(&extracted.content));
    }

    #[test]
    fn falls_back_to_latin1_for_invalid_utf8() {
        let dir = tempfile::TempDir::new().unwrap();
        // 0xE9 is 'é' in Latin-1 but invalid as a standalone UTF-8 byte
        let path = write_file(&dir, "legacy.txt", b"caf\xe9");
        let extracted = extract(&path, &ProcessingConfig::default()).unwrap();
        assert_eq!(extracted.content, "café");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = extract(Path::new("/nonexistent/x.txt"), &ProcessingConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn unsupported_extension_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_file(&dir, "image.png", b"\x89PNG");
        let err = extract(&path, &ProcessingConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn oversized_file_fails_extraction() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_file(&dir, "big.txt", b"0123456789");
        let processing = ProcessingConfig {
            max_file_size_bytes: 5,
            ..ProcessingConfig::default()
        };
        let err = extract(&path, &processing).unwrap_err();
        assert!(matches!(err, Error::ExtractionFailure(_)));
    }

    #[test]
    fn invalid_pdf_reports_extraction_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_file(&dir, "broken.pdf", b"not a pdf");
        let err = extract(&path, &ProcessingConfig::default()).unwrap_err();
        assert!(matches!(err, Error::ExtractionFailure(_)));
    }
}
