
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::extract::Metadata;
use crate::pipeline::filter::FilteredDocument;

/// Separators tried in order: paragraph, line, sentence, word, character
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// A piece of a document ready for embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Inherited unchanged from the source document
    pub metadata: Metadata,
    /// Position of this chunk within its source document
    pub sequence_index: usize,
    /// Position of the source document within the ingestion batch
    pub document_index: usize,
}

/// Configuration for content chunking, measured in characters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper bound on the length of every chunk
    pub max_chunk_size: usize,
    /// Upper bound on text shared by consecutive chunks
    pub chunk_overlap: usize,
    /// Documents shorter than this after trimming are never chunked
    pub min_content_length: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_chunk_size: 3000,
            chunk_overlap: 300,
            min_content_length: 200,
        }
    }
}

/// Split every document into overlapping chunks.
///
/// Deterministic: the same documents and configuration always produce the
/// same chunks in the same order.
#[inline]
pub fn chunk_documents(documents: &[FilteredDocument], config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (document_index, document) in documents.iter().enumerate() {
        let pieces = split_text(document.content(), config);
        chunks.extend(pieces.into_iter().enumerate().map(|(sequence_index, text)| Chunk {
            text,
            metadata: document.metadata().clone(),
            sequence_index,
            document_index,
        }));
    }

    debug!(
        "Chunked {} documents into {} chunks",
        documents.len(),
        chunks.len()
    );
    chunks
}

/// Split a single text into trimmed chunks of at most `max_chunk_size` characters
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let max = config.max_chunk_size.max(1);
    let overlap = config.chunk_overlap.min(max.saturating_sub(1));
    split_recursive(text, SEPARATORS, max, overlap)
}

fn split_recursive(text: &str, separators: &[&str], max: usize, overlap: usize) -> Vec<String> {
    let position = separators
        .iter()
        .position(|separator| separator.is_empty() || text.contains(separator))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or_default();
    let finer = separators.get(position + 1..).unwrap_or_default();

    let mut output = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) <= max {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            output.extend(merge_pieces(&fitting, max, overlap));
            fitting.clear();
        }

        if finer.is_empty() {
            output.extend(hard_split(piece, max));
        } else {
            output.extend(split_recursive(piece, finer, max, overlap));
        }
    }

    if !fitting.is_empty() {
        output.extend(merge_pieces(&fitting, max, overlap));
    }

    output
}

/// Split after every occurrence of `separator`; concatenating the pieces
/// reproduces `text`
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        text.split_inclusive(|_: char| true).collect()
    } else {
        text.split_inclusive(separator).collect()
    }
}

/// Greedily join pieces up to `max` characters, carrying at most `overlap`
/// trailing characters into the next chunk
fn merge_pieces(pieces: &[&str], max: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0;

    for &piece in pieces {
        let length = char_len(piece);

        if total + length > max && !window.is_empty() {
            push_chunk(&mut chunks, &window);

            while total > overlap || (total + length > max && total > 0) {
                match window.pop_front() {
                    Some((_, removed)) => total -= removed,
                    None => break,
                }
            }
        }

        window.push_back((piece, length));
        total += length;
    }

    push_chunk(&mut chunks, &window);
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

// Only reachable when no separator applies, which the empty separator rules out
fn hard_split(text: &str, max: usize) -> Vec<String> {
    let characters: Vec<char> = text.chars().collect();
    characters
        .chunks(max)
        .map(|window| window.iter().collect::<String>())
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

#[inline]
fn char_len(text: &str) -> usize {
    text.chars().count()
}
