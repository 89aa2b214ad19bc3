//! Text chunking: splits extracted document text into ordered fragments.
//!
//! Two interchangeable strategies, selected by configuration:
//! - **fixed** — sliding token window of `size` whitespace tokens with
//!   `overlap` tokens shared between consecutive windows.
//! - **semantic** — sentence grouping: consecutive sentences accumulate
//!   until the next one would push the group past `size` tokens; trailing
//!   sentences worth up to `overlap` tokens seed the next group.
//!
//! Fragments carry byte offsets into the original text, a SHA-256
//! fingerprint of their exact content, and a small metadata mapping.

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::extract::sha256_hex;
use crate::models::{ChunkStats, Fragment};

pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Split `text` into ordered fragments for `document_id`.
    ///
    /// Empty or whitespace-only input yields zero fragments. An unknown
    /// strategy name fails before any fragment is produced.
    pub fn chunk(&self, text: &str, document_id: i64) -> Result<Vec<Fragment>> {
        match self.config.strategy.as_str() {
            "fixed" => Ok(self.chunk_fixed(text, document_id)),
            "semantic" => Ok(self.chunk_semantic(text, document_id)),
            other => Err(Error::InvalidConfiguration(format!(
                "unsupported chunking strategy: '{}'",
                other
            ))),
        }
    }

    fn chunk_fixed(&self, text: &str, document_id: i64) -> Vec<Fragment> {
        let spans = word_spans(text);
        if spans.is_empty() {
            return Vec::new();
        }

        let size = self.config.size;
        let overlap = self.config.overlap;
        let mut fragments = Vec::new();
        let mut start = 0usize;
        let mut index = 0i64;

        loop {
            let end = (start + size).min(spans.len());
            let s_byte = spans[start].0;
            let e_byte = spans[end - 1].1;
            fragments.push(self.make_fragment(
                document_id,
                index,
                &text[s_byte..e_byte],
                s_byte,
                e_byte,
                "token",
            ));
            index += 1;
            if end == spans.len() {
                break;
            }
            // overlap < size is validated, so start always advances
            start = end - overlap;
        }

        fragments
    }

    fn chunk_semantic(&self, text: &str, document_id: i64) -> Vec<Fragment> {
        let sentences = sentence_spans(text);
        if sentences.is_empty() {
            return Vec::new();
        }

        let word_counts: Vec<usize> = sentences
            .iter()
            .map(|&(s, e)| text[s..e].split_whitespace().count())
            .collect();

        let size = self.config.size;
        let overlap = self.config.overlap;
        let mut fragments = Vec::new();
        let mut group: Vec<usize> = Vec::new();
        let mut group_words = 0usize;
        let mut index = 0i64;

        let flush =
            |group: &[usize], index: &mut i64, fragments: &mut Vec<Fragment>| {
                let s_byte = sentences[group[0]].0;
                let e_byte = sentences[*group.last().unwrap_or(&group[0])].1;
                fragments.push(self.make_fragment(
                    document_id,
                    *index,
                    &text[s_byte..e_byte],
                    s_byte,
                    e_byte,
                    "sentence",
                ));
                *index += 1;
            };

        for i in 0..sentences.len() {
            if !group.is_empty() && group_words + word_counts[i] > size {
                flush(&group, &mut index, &mut fragments);

                // Carry trailing sentences worth up to `overlap` tokens
                let mut carried: Vec<usize> = Vec::new();
                let mut carried_words = 0usize;
                for &j in group.iter().rev() {
                    if carried_words + word_counts[j] > overlap {
                        break;
                    }
                    carried_words += word_counts[j];
                    carried.push(j);
                }
                carried.reverse();
                group = carried;
                group_words = carried_words;
            }
            group.push(i);
            group_words += word_counts[i];
        }

        if !group.is_empty() {
            flush(&group, &mut index, &mut fragments);
        }

        fragments
    }

    fn make_fragment(
        &self,
        document_id: i64,
        chunk_index: i64,
        content: &str,
        start_offset: usize,
        end_offset: usize,
        chunker: &str,
    ) -> Fragment {
        let word_count = content.split_whitespace().count();
        let sentence_count = content
            .split('.')
            .filter(|s| !s.trim().is_empty())
            .count();

        Fragment {
            document_id,
            chunk_index,
            content: content.to_string(),
            content_hash: sha256_hex(content),
            start_offset: Some(start_offset as i64),
            end_offset: Some(end_offset as i64),
            metadata: serde_json::json!({
                "word_count": word_count,
                "sentence_count": sentence_count,
                "chunker": chunker,
                "strategy": self.config.strategy,
            }),
        }
    }
}

/// Aggregate statistics for a chunked document. All-zero for no fragments.
pub fn chunk_stats(fragments: &[Fragment]) -> ChunkStats {
    if fragments.is_empty() {
        return ChunkStats::default();
    }

    let sizes: Vec<usize> = fragments.iter().map(|f| f.content.len()).collect();
    let word_counts: Vec<usize> = fragments
        .iter()
        .map(|f| {
            f.metadata
                .get("word_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize
        })
        .collect();

    let total_words: usize = word_counts.iter().sum();
    ChunkStats {
        total_chunks: fragments.len(),
        avg_chunk_size: sizes.iter().sum::<usize>() / sizes.len(),
        min_chunk_size: *sizes.iter().min().unwrap_or(&0),
        max_chunk_size: *sizes.iter().max().unwrap_or(&0),
        total_words,
        avg_words_per_chunk: total_words / word_counts.len(),
    }
}

/// Byte spans of whitespace-delimited tokens.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Byte spans of sentences, split after terminal punctuation followed by
/// whitespace or end of input. A trailing run without terminal punctuation
/// counts as a final sentence.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut iter = text.char_indices().peekable();

    while let Some((i, ch)) = iter.next() {
        if start.is_none() && !ch.is_whitespace() {
            start = Some(i);
        }
        if matches!(ch, '.' | '!' | '?') {
            let boundary = iter
                .peek()
                .map(|&(_, next)| next.is_whitespace())
                .unwrap_or(true);
            if boundary {
                if let Some(s) = start.take() {
                    spans.push((s, i + ch.len_utf8()));
                }
            }
        }
    }

    if let Some(s) = start {
        let tail = text[s..].trim_end();
        if !tail.is_empty() {
            spans.push((s, s + tail.len()));
        }
    }

    spans
}
