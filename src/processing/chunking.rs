//! Chunk splitting with a fixed budget and sliding overlap.
//!
//! - Budget: `TEXT_SPLITTER_CHUNK_SIZE` units per chunk, measured either in characters (default)
//!   or in `tiktoken` tokens for the embedding model (`TEXT_SPLITTER_UNIT=tokens`).
//! - Boundaries: `semchunk-rs` splits on the most meaningful separators that keep each piece
//!   within budget (paragraphs, then sentences, then words).
//! - Overlap: the tail of the previous chunk (`TEXT_SPLITTER_CHUNK_OVERLAP` units) is prepended
//!   to each following chunk, then the result is trimmed back into budget.
//! - Preparation: blank chunks and exact duplicates within the document are dropped; survivors
//!   keep their original order and carry a SHA-256 hash.

use crate::config::ChunkUnit;
use crate::qdrant::compute_chunk_hash;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::collections::HashSet;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

use super::types::ChunkingError;

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Chunk text ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedChunk {
    /// Position among the kept chunks.
    pub index: usize,
    /// Chunk text content.
    pub text: String,
    /// Stable digest of the text.
    pub chunk_hash: String,
}

/// Splitter settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct ChunkSettings {
    /// Maximum units per chunk.
    pub chunk_size: usize,
    /// Units carried over from the previous chunk.
    pub overlap: usize,
    /// How units are counted.
    pub unit: ChunkUnit,
    /// Model used to pick a tokenizer in token mode.
    pub model: String,
}

/// Split `text` into overlapping chunks and drop blanks and duplicates.
///
/// Returns an empty vector when the input is all whitespace.
pub fn split_document(
    text: &str,
    settings: &ChunkSettings,
) -> Result<Vec<PreparedChunk>, ChunkingError> {
    let chunks = chunk_text(
        text,
        settings.chunk_size,
        settings.overlap,
        settings.unit,
        &settings.model,
    )?;
    let (prepared, skipped) = dedupe_chunks(chunks);
    if skipped > 0 {
        tracing::debug!(skipped, "Dropped duplicate chunks");
    }
    Ok(prepared)
}

/// Chunk text into bounded segments using the configured counter.
pub(crate) fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    unit: ChunkUnit,
    model: &str,
) -> Result<Vec<String>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let counter = build_counter(unit, model)?;
    Ok(chunk_text_with_counter(text, chunk_size, overlap, counter))
}

/// Build a counter for the given unit.
///
/// Token mode prefers the model's `tiktoken` encoding, then a named encoding, then
/// `cl100k_base`; when no encoding loads it falls back to whitespace counting.
pub(crate) fn build_counter(unit: ChunkUnit, model: &str) -> Result<TokenCounter, ChunkingError> {
    match unit {
        ChunkUnit::Characters => Ok(character_counter()),
        ChunkUnit::Tokens => match build_tiktoken_counter(model) {
            Ok(counter) => Ok(counter),
            Err(error) => {
                tracing::warn!(
                    model,
                    error = %error,
                    "Tokenizer unavailable; falling back to whitespace counter"
                );
                Ok(whitespace_counter())
            }
        },
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            encoding_from_name(model).unwrap_or_else(cl100k_base)
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

fn character_counter() -> TokenCounter {
    Arc::new(|segment: &str| segment.chars().count())
}

fn whitespace_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    counter: TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks = chunker.chunk(text);
    apply_overlap(base_chunks, chunk_size, overlap, &counter)
}

/// Remove blank chunks and duplicates, keeping the first occurrence.
fn dedupe_chunks(chunks: Vec<String>) -> (Vec<PreparedChunk>, usize) {
    let mut seen = HashSet::new();
    let mut prepared = Vec::new();
    let mut skipped = 0;

    for text in chunks {
        if text.trim().is_empty() {
            continue;
        }
        let hash = compute_chunk_hash(&text);
        if seen.insert(hash.clone()) {
            prepared.push(PreparedChunk {
                index: prepared.len(),
                text,
                chunk_hash: hash,
            });
        } else {
            skipped += 1;
        }
    }

    (prepared, skipped)
}

fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    counter: &TokenCounter,
) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if chunks.len() < 2 || effective_overlap == 0 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;

    for current in chunks {
        let next = match &previous {
            Some(prev) => {
                build_overlapped_chunk(prev, &current, effective_overlap, chunk_size, counter)
            }
            None => current.clone(),
        };
        overlapped.push(next);
        previous = Some(current);
    }

    overlapped
}

fn build_overlapped_chunk(
    previous: &str,
    current: &str,
    overlap: usize,
    chunk_size: usize,
    counter: &TokenCounter,
) -> String {
    let tail = tail_with_limit(previous, overlap, counter);
    let mut combined = String::with_capacity(tail.len() + current.len() + 1);

    if !tail.is_empty() {
        combined.push_str(tail);
        if !ends_with_whitespace(tail) && !starts_with_whitespace(current) {
            combined.push(' ');
        }
    }

    combined.push_str(current);
    trim_to_budget(&combined, chunk_size, counter)
}

/// Longest suffix of `text` within `limit`, snapped forward to a word start.
fn tail_with_limit<'a>(text: &'a str, limit: usize, counter: &TokenCounter) -> &'a str {
    if limit == 0 {
        return "";
    }

    let trimmed = text.trim_start();
    if counter.as_ref()(trimmed) <= limit {
        return trimmed;
    }

    let mut best = "";
    for (start, _) in text.char_indices().rev() {
        let candidate = text[start..].trim_start();
        if counter.as_ref()(candidate) > limit {
            break;
        }
        best = candidate;
    }

    let best_start = text.len() - best.len();
    if best_start > 0 && !ends_with_whitespace(&text[..best_start]) {
        return best
            .find(char::is_whitespace)
            .map(|position| best[position..].trim_start())
            .unwrap_or("");
    }
    best
}

fn trim_to_budget(text: &str, budget: usize, counter: &TokenCounter) -> String {
    if counter.as_ref()(text) <= budget {
        return text.to_string();
    }

    // Prefer dropping whole leading words before cutting inside one.
    for (start, _) in text.match_indices(char::is_whitespace) {
        let candidate = text[start..].trim_start();
        if counter.as_ref()(candidate) <= budget {
            return candidate.to_string();
        }
    }

    for (start, _) in text.char_indices().skip(1) {
        let candidate = text[start..].trim_start();
        if counter.as_ref()(candidate) <= budget {
            return candidate.to_string();
        }
    }

    String::new()
}

fn starts_with_whitespace(text: &str) -> bool {
    text.chars()
        .next()
        .map(|c| c.is_whitespace())
        .unwrap_or(false)
}

fn ends_with_whitespace(text: &str) -> bool {
    text.chars()
        .next_back()
        .map(|c| c.is_whitespace())
        .unwrap_or(false)
}
