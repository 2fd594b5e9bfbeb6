//! Text splitting capability and the token-budgeted semantic splitter.
//!
//! Readers hand whole document bodies to a [`Splitter`] and get back spans that remember where
//! they started in the source. The shipped implementation, [`SemanticSplitter`], works like this:
//!
//! - Semantic boundaries come from `semchunk-rs`; every span respects a hard token budget.
//! - Overlap is taken from the source text preceding each span (not re-synthesized), so a span's
//!   start offset always indexes the exact characters it contains.
//! - Token counting prefers `tiktoken-rs` encodings and falls back to a whitespace counter when
//!   no tokenizer can be resolved for the configured model.

use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

/// Shared token counting function used to enforce chunk budgets.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Errors emitted while splitting text.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunk size must be strictly positive.
    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer could not be initialized for the requested model.
    #[error("Failed to initialize tokenizer for model {model}")]
    Tokenizer {
        /// Model or encoding name that failed.
        model: String,
        /// Underlying tokenizer error.
        #[source]
        source: TokenizerError,
    },
}

/// A piece of split text and the character offset where it begins in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    /// Span text, an exact slice of the source when `start` is known.
    pub text: String,
    /// Character (not byte) offset of the span within the source text.
    pub start: Option<usize>,
}

/// Capability that splits a document body into retrieval-sized spans.
pub trait Splitter: Send + Sync {
    /// Split `text`, returning spans in document order. Blank input yields no spans.
    fn split(&self, text: &str) -> Result<Vec<TextSpan>, ChunkingError>;
}

/// Convert an overlap expressed as a percentage of the chunk size into tokens.
pub fn overlap_tokens(chunk_size: usize, overlap_percent: usize) -> usize {
    chunk_size.saturating_mul(overlap_percent) / 100
}

/// Semantic splitter with a token budget and a source-anchored sliding overlap.
#[derive(Clone)]
pub struct SemanticSplitter {
    chunk_size: usize,
    overlap: usize,
    counter: TokenCounter,
}

impl std::fmt::Debug for SemanticSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("overlap", &self.overlap)
            .finish_non_exhaustive()
    }
}

impl SemanticSplitter {
    /// Build a splitter from an explicit token counter.
    pub fn new(
        chunk_size: usize,
        overlap: usize,
        counter: TokenCounter,
    ) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            chunk_size,
            overlap: overlap.min(chunk_size.saturating_sub(1)),
            counter,
        })
    }

    /// Build a splitter that counts tokens with the tokenizer matching `model`.
    ///
    /// Unknown models fall back to `cl100k_base`, and a tokenizer that cannot be loaded at all
    /// falls back to whitespace counting.
    pub fn for_model(
        model: &str,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Self, ChunkingError> {
        Self::new(chunk_size, overlap, build_token_counter(model))
    }

    /// Build a splitter that counts whitespace-separated words as tokens.
    pub fn whitespace(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        Self::new(chunk_size, overlap, default_token_counter())
    }

    /// Maximum tokens per span.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Effective overlap in tokens.
    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl Splitter for SemanticSplitter {
    fn split(&self, text: &str) -> Result<Vec<TextSpan>, ChunkingError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let counter_for_chunker = self.counter.clone();
        let chunker = Chunker::new(
            self.chunk_size,
            Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
        );
        let located = locate_chunks(text, chunker.chunk(text));
        let spans = apply_overlap(
            text,
            located,
            self.chunk_size,
            self.overlap,
            &self.counter,
        );

        tracing::trace!(
            spans = spans.len(),
            chunk_size = self.chunk_size,
            overlap = self.overlap,
            "Split text"
        );
        Ok(spans)
    }
}

/// A semchunk output anchored (when possible) to its byte range and char start in the source.
struct Located {
    text: String,
    anchor: Option<Anchor>,
}

#[derive(Clone, Copy)]
struct Anchor {
    start_byte: usize,
    end_byte: usize,
    start_char: usize,
}

fn locate_chunks(source: &str, chunks: Vec<String>) -> Vec<Located> {
    let mut cursor_byte = 0;
    let mut cursor_char = 0;

    chunks
        .into_iter()
        .map(|chunk| {
            let Some(relative) = source[cursor_byte..].find(chunk.as_str()) else {
                tracing::debug!("Chunk not found verbatim in source; start offset unknown");
                return Located {
                    text: chunk,
                    anchor: None,
                };
            };
            let start_byte = cursor_byte + relative;
            let start_char = cursor_char + source[cursor_byte..start_byte].chars().count();
            let end_byte = start_byte + chunk.len();
            cursor_char = start_char + chunk.chars().count();
            cursor_byte = end_byte;
            Located {
                text: chunk,
                anchor: Some(Anchor {
                    start_byte,
                    end_byte,
                    start_char,
                }),
            }
        })
        .collect()
}

/// Extend each span backwards into the preceding source text by at most `overlap` tokens,
/// never exceeding `chunk_size` tokens in total.
fn apply_overlap(
    source: &str,
    located: Vec<Located>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<TextSpan> {
    let mut spans = Vec::with_capacity(located.len());
    let mut previous: Option<Anchor> = None;

    for chunk in located {
        let span = match (previous, chunk.anchor) {
            (Some(prev), Some(current)) if overlap > 0 => {
                overlapped_span(source, prev, current, chunk_size, overlap, token_counter)
                    .unwrap_or_else(|| TextSpan {
                        text: chunk.text,
                        start: Some(current.start_char),
                    })
            }
            (_, anchor) => TextSpan {
                text: chunk.text,
                start: anchor.map(|anchor| anchor.start_char),
            },
        };
        previous = chunk.anchor;
        spans.push(span);
    }

    spans
}

fn overlapped_span(
    source: &str,
    previous: Anchor,
    current: Anchor,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Option<TextSpan> {
    let lead_in = &source[previous.start_byte..current.start_byte];
    let tail = tail_with_token_limit(lead_in, overlap, token_counter);
    if tail.is_empty() {
        return None;
    }

    let combined = &source[current.start_byte - tail.len()..current.end_byte];
    let trimmed = trim_to_token_budget(combined, chunk_size, token_counter);
    let extension = trimmed.len().checked_sub(current.end_byte - current.start_byte)?;
    if extension == 0 {
        return None;
    }

    let extension_chars = source[current.start_byte - extension..current.start_byte]
        .chars()
        .count();
    Some(TextSpan {
        text: trimmed.to_string(),
        start: Some(current.start_char - extension_chars),
    })
}

/// Longest whitespace-trimmed suffix of `text` within `token_limit` tokens.
fn tail_with_token_limit<'a>(
    text: &'a str,
    token_limit: usize,
    token_counter: &TokenCounter,
) -> &'a str {
    if token_limit == 0 {
        return "";
    }

    let trimmed_text = text.trim_start();
    if token_counter.as_ref()(trimmed_text) <= token_limit {
        return trimmed_text;
    }

    shortest_prefix_cut(text, |candidate| {
        token_counter.as_ref()(candidate) <= token_limit
    })
}

/// Longest whitespace-trimmed suffix of `text` within `token_budget` tokens.
fn trim_to_token_budget<'a>(
    text: &'a str,
    token_budget: usize,
    token_counter: &TokenCounter,
) -> &'a str {
    if token_budget == 0 {
        return "";
    }

    if token_counter.as_ref()(text) <= token_budget {
        return text;
    }

    shortest_prefix_cut(text, |candidate| {
        token_counter.as_ref()(candidate) <= token_budget
    })
}

/// Drop leading characters one at a time until the trimmed remainder satisfies `fits`.
fn shortest_prefix_cut<'a>(text: &'a str, fits: impl Fn(&str) -> bool) -> &'a str {
    for (offset, _) in text.char_indices().skip(1) {
        let trimmed = text[offset..].trim_start();
        if fits(trimmed) {
            return trimmed;
        }
    }
    ""
}

/// Build a token counter for `model`, falling back to whitespace counting when no tokenizer is
/// available.
pub fn build_token_counter(model: &str) -> TokenCounter {
    match build_tiktoken_counter(model) {
        Ok(counter) => counter,
        Err(error) => {
            tracing::warn!(
                model,
                error = %error,
                "Tokenizer unavailable for model; falling back to whitespace counter"
            );
            default_token_counter()
        }
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
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::debug!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token counting"
                );
                cl100k_base()
            }
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

/// Whitespace word counter; non-empty text without words still counts as one token.
pub fn default_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}
