//! Recursive overlap-aware text chunker.
//!
//! Splits page text into [`ChunkRecord`]s of at most `chunk_size`
//! characters. The splitter tries separators in order of semantic weight
//! (paragraph, line, sentence, word) and falls back to single characters,
//! so a hard cut only happens when a run of text has no better boundary.
//!
//! Pieces smaller than the limit are merged greedily. When a chunk is
//! emitted, pieces are dropped from its front until at most
//! `chunk_overlap` characters remain; those carry over into the next chunk.
//!
//! All lengths and offsets count characters (Unicode scalar values), not
//! bytes. Chunking is deterministic.

use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::models::{ChunkRecord, PageRecord};

/// Separators in order of preference. The empty separator splits into
/// single characters.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }

    /// Chunk every page, preserving page order and page metadata.
    pub fn chunk_pages(&self, pages: &[PageRecord]) -> Vec<ChunkRecord> {
        let chunks: Vec<ChunkRecord> = pages
            .iter()
            .flat_map(|page| {
                let metadata = page.metadata();
                self.split_with_offsets(&page.text)
                    .into_iter()
                    .map(move |(start_offset, text)| ChunkRecord {
                        text,
                        start_offset,
                        metadata: metadata.clone(),
                    })
            })
            .collect();

        tracing::info!(
            pages = pages.len(),
            chunks = chunks.len(),
            "split pages into chunks"
        );
        chunks
    }

    /// Split `text` and locate each chunk's character offset within it.
    pub fn split_with_offsets(&self, text: &str) -> Vec<(usize, String)> {
        let mut out = Vec::new();
        let mut prev: Option<(usize, usize)> = None;

        for chunk in self.split_text(text) {
            let search_from = match prev {
                None => 0,
                Some((start, len)) => (start + len)
                    .saturating_sub(self.chunk_overlap)
                    .max(start + 1),
            };
            let start = find_char_offset(text, &chunk, search_from)
                .or_else(|| find_char_offset(text, &chunk, 0))
                .unwrap_or(search_from);
            prev = Some((start, char_len(&chunk)));
            out.push((start, chunk));
        }
        out
    }

    /// Split `text` into trimmed, non-empty chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.chunk_size {
            return vec![text.trim().to_string()];
        }
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let idx = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(idx).copied().unwrap_or("");
        let finer = separators.get(idx + 1..).unwrap_or(&[]);

        let mut out = Vec::new();
        let mut small: Vec<(&str, usize)> = Vec::new();

        for piece in split_keep_separator(text, separator) {
            let len = char_len(piece);
            if len < self.chunk_size {
                small.push((piece, len));
                continue;
            }
            if !small.is_empty() {
                out.extend(self.merge(&small));
                small.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            } else {
                out.extend(self.split_recursive(piece, finer));
            }
        }

        if !small.is_empty() {
            out.extend(self.merge(&small));
        }
        out
    }

    /// Greedily merge contiguous pieces into chunks, carrying up to
    /// `chunk_overlap` characters from the end of each chunk into the next.
    fn merge(&self, pieces: &[(&str, usize)]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &(piece, len) in pieces {
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&window, &mut out);
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size)
                {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }

        push_joined(&window, &mut out);
        out
    }
}

fn push_joined(window: &VecDeque<(&str, usize)>, out: &mut Vec<String>) {
    let joined: String = window.iter().map(|(p, _)| *p).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Split on `separator`, keeping it attached to the end of each piece so
/// pieces concatenate back to the original text.
fn split_keep_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    text.split_inclusive(separator)
        .filter(|p| !p.is_empty())
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Find `needle` in `haystack` at or after character offset `from`,
/// returning the character offset of the match.
fn find_char_offset(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let from_byte = haystack
        .char_indices()
        .nth(from)
        .map(|(b, _)| b)
        .unwrap_or(haystack.len());
    let found = haystack[from_byte..].find(needle)?;
    Some(from + char_len(&haystack[from_byte..from_byte + found]))
}
