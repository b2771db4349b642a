//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`TokenizerChunker`] - token windows cut by a HuggingFace tokenizer's
//!   truncation-with-overflow, so window boundaries follow the embedding
//!   model's own segmentation
//! - [`WordWindowChunker`] - the same windowing rule over whitespace-separated
//!   words, for setups without a tokenizer file
//!
//! Both join the document's pages with a single space, cover the whole text
//! with windows of at most `max` units where consecutive windows share
//! `stride` units, and number the resulting chunks from 0 in document order.

use std::path::Path;

use tokenizers::{Encoding, PostProcessor, Tokenizer, TruncationParams};

use crate::config::RetrievalConfig;
use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document text is empty or whitespace.
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>>;
}

/// Start/end offsets of windows of `window` units over `len` units, with
/// consecutive windows overlapping by `stride` units.
///
/// The last window always ends at `len`; no window starts after it.
fn window_ranges(len: usize, window: usize, stride: usize) -> Vec<(usize, usize)> {
    let step = window.saturating_sub(stride).max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + window).min(len);
        ranges.push((start, end));
        if end == len {
            break;
        }
        start += step;
    }
    ranges
}

fn into_chunks(document: &Document, texts: impl IntoIterator<Item = String>) -> Vec<Chunk> {
    texts
        .into_iter()
        .filter(|text| !text.trim().is_empty())
        .enumerate()
        .map(|(sequence_id, text)| Chunk {
            text,
            sequence_id,
            document_name: document.name.clone(),
        })
        .collect()
}

/// Splits documents into token windows using a HuggingFace tokenizer.
///
/// The tokenizer is configured to truncate at `max_tokens` (start/end special
/// tokens included) and to return the remainder as overflowing windows, each
/// starting `stride` tokens before the end of the previous one. Each window is
/// decoded back to text after dropping its leading and trailing special
/// tokens.
///
/// # Example
///
/// ```rust,ignore
/// use ragchat_retrieval::TokenizerChunker;
///
/// let chunker = TokenizerChunker::from_file("model/tokenizer.json", 512, 0)?;
/// let chunks = chunker.chunk(&document)?;
/// ```
pub struct TokenizerChunker {
    tokenizer: Tokenizer,
    max_tokens: usize,
    stride: usize,
}

impl TokenizerChunker {
    /// Wrap `tokenizer`, replacing its truncation and padding settings.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ChunkingError`] if `stride` leaves no room for
    /// progress once the tokenizer's special tokens are accounted for.
    pub fn new(mut tokenizer: Tokenizer, max_tokens: usize, stride: usize) -> Result<Self> {
        let special = tokenizer.get_post_processor().map_or(0, |p| p.added_tokens(false));
        if max_tokens <= special || stride >= max_tokens - special {
            return Err(RagError::ChunkingError(format!(
                "stride ({stride}) must be less than max_tokens ({max_tokens}) \
                 minus {special} special tokens"
            )));
        }

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                stride,
                ..Default::default()
            }))
            .map_err(|e| RagError::ChunkingError(format!("invalid truncation settings: {e}")))?;
        tokenizer.with_padding(None);

        Ok(Self { tokenizer, max_tokens, stride })
    }

    /// Build a chunker using the window settings of `config`.
    pub fn with_config(tokenizer: Tokenizer, config: &RetrievalConfig) -> Result<Self> {
        Self::new(tokenizer, config.max_window_tokens, config.window_stride)
    }

    /// Load the tokenizer from a `tokenizer.json` file.
    pub fn from_file(path: impl AsRef<Path>, max_tokens: usize, stride: usize) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            RagError::ChunkingError(format!("failed to load tokenizer {}: {e}", path.display()))
        })?;
        Self::new(tokenizer, max_tokens, stride)
    }

    /// Load the tokenizer from the bytes of a `tokenizer.json` file.
    pub fn from_bytes(bytes: impl AsRef<[u8]>, max_tokens: usize, stride: usize) -> Result<Self> {
        let tokenizer = Tokenizer::from_bytes(bytes)
            .map_err(|e| RagError::ChunkingError(format!("failed to parse tokenizer: {e}")))?;
        Self::new(tokenizer, max_tokens, stride)
    }

    /// Maximum window length in tokens.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Overlap between consecutive windows in tokens.
    pub fn stride(&self) -> usize {
        self.stride
    }

    fn decode_window(&self, window: &Encoding) -> Result<String> {
        let ids = window.get_ids();
        let special = window.get_special_tokens_mask();
        let start = special.iter().position(|&m| m == 0).unwrap_or(ids.len());
        let end = special.iter().rposition(|&m| m == 0).map_or(start, |last| last + 1);
        self.tokenizer
            .decode(&ids[start..end], false)
            .map_err(|e| RagError::ChunkingError(format!("failed to decode window: {e}")))
    }
}

impl Chunker for TokenizerChunker {
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        let text = document.text();
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut encoding = self.tokenizer.encode(text.as_str(), true).map_err(|e| {
            RagError::ChunkingError(format!("failed to tokenize '{}': {e}", document.name))
        })?;
        let overflowing = encoding.take_overflowing();

        let texts = std::iter::once(encoding)
            .chain(overflowing)
            .map(|window| self.decode_window(&window))
            .collect::<Result<Vec<String>>>()?;

        Ok(into_chunks(document, texts))
    }
}

/// Splits documents into windows of whitespace-separated words.
///
/// Applies the same windowing rule as [`TokenizerChunker`] with words standing
/// in for tokens, so it needs no model files. Words inside a window are
/// re-joined with single spaces.
///
/// # Example
///
/// ```rust,ignore
/// use ragchat_retrieval::WordWindowChunker;
///
/// let chunker = WordWindowChunker::new(200, 20);
/// let chunks = chunker.chunk(&document)?;
/// ```
#[derive(Debug, Clone)]
pub struct WordWindowChunker {
    max_words: usize,
    stride: usize,
}

impl WordWindowChunker {
    /// Create a new `WordWindowChunker`.
    ///
    /// # Arguments
    ///
    /// * `max_words` - maximum number of words per chunk (minimum 1)
    /// * `stride` - number of words shared by consecutive chunks, capped at `max_words - 1`
    pub fn new(max_words: usize, stride: usize) -> Self {
        let max_words = max_words.max(1);
        Self { max_words, stride: stride.min(max_words - 1) }
    }

    /// Build a chunker whose windows hold as many words as `config` allows
    /// content tokens (the window minus the start/end tokens).
    pub fn with_config(config: &RetrievalConfig) -> Self {
        Self::new(config.max_window_tokens.saturating_sub(2), config.window_stride)
    }
}

impl Chunker for WordWindowChunker {
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        let text = document.text();
        let words: Vec<&str> = text.split_whitespace().collect();

        let texts = window_ranges(words.len(), self.max_words, self.stride)
            .into_iter()
            .map(|(start, end)| words[start..end].join(" "));

        Ok(into_chunks(document, texts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pages: &[&str]) -> Document {
        Document::new("doc.txt", pages.iter().map(|p| p.to_string()).collect())
    }

    #[test]
    fn window_ranges_without_stride() {
        assert_eq!(window_ranges(10, 4, 0), vec![(0, 4), (4, 8), (8, 10)]);
        assert_eq!(window_ranges(8, 4, 0), vec![(0, 4), (4, 8)]);
        assert_eq!(window_ranges(3, 4, 0), vec![(0, 3)]);
        assert!(window_ranges(0, 4, 0).is_empty());
    }

    #[test]
    fn window_ranges_with_stride() {
        assert_eq!(window_ranges(10, 4, 1), vec![(0, 4), (3, 7), (6, 10)]);
        assert_eq!(window_ranges(1200, 510, 10), vec![(0, 510), (500, 1010), (1000, 1200)]);
    }

    #[test]
    fn word_windows_cover_document_in_order() {
        let chunker = WordWindowChunker::new(3, 0);
        let chunks = chunker.chunk(&doc(&["a b c d", "e f g"])).unwrap();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c", "d e f", "g"]);
        let ids: Vec<usize> = chunks.iter().map(|c| c.sequence_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(chunks.iter().all(|c| c.document_name == "doc.txt"));
    }

    #[test]
    fn word_windows_overlap_by_stride() {
        let chunker = WordWindowChunker::new(4, 2);
        let chunks = chunker.chunk(&doc(&["1 2 3 4 5 6"])).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["1 2 3 4", "3 4 5 6"]);
    }

    #[test]
    fn empty_document_has_no_chunks() {
        let chunker = WordWindowChunker::new(4, 0);
        assert!(chunker.chunk(&doc(&[])).unwrap().is_empty());
        assert!(chunker.chunk(&doc(&["   ", "\n"])).unwrap().is_empty());
    }

    #[test]
    fn stride_is_capped() {
        let chunker = WordWindowChunker::new(2, 5);
        let chunks = chunker.chunk(&doc(&["a b c"])).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a b", "b c"]);
    }

    /// A BERT-style word-level tokenizer whose vocabulary is `words`.
    fn word_level_tokenizer(words: &[String]) -> Vec<u8> {
        let mut vocab = serde_json::Map::new();
        for (id, token) in ["[UNK]", "[CLS]", "[SEP]"].iter().enumerate() {
            vocab.insert(token.to_string(), serde_json::json!(id));
        }
        for (offset, word) in words.iter().enumerate() {
            vocab.insert(word.clone(), serde_json::json!(offset + 3));
        }
        let special = |id: u32, content: &str| {
            serde_json::json!({
                "id": id,
                "content": content,
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            })
        };
        serde_json::to_vec(&serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [special(0, "[UNK]"), special(1, "[CLS]"), special(2, "[SEP]")],
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": {
                "type": "BertProcessing",
                "sep": ["[SEP]", 2],
                "cls": ["[CLS]", 1]
            },
            "decoder": null,
            "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]" }
        }))
        .unwrap()
    }

    fn numbered_words(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("w{i}")).collect()
    }

    #[test]
    fn tokenizer_windows_exclude_special_tokens() {
        let words = numbered_words(1200);
        let chunker = TokenizerChunker::from_bytes(word_level_tokenizer(&words), 512, 0).unwrap();
        let chunks = chunker.chunk(&doc(&[&words.join(" ")])).unwrap();

        assert_eq!(chunks.len(), 3);
        let lengths: Vec<usize> =
            chunks.iter().map(|c| c.text.split_whitespace().count()).collect();
        assert_eq!(lengths, vec![510, 510, 180]);
        assert_eq!(chunks[0].text, words[..510].join(" "));
        assert!(chunks[1].text.starts_with("w510 "));
        assert!(chunks[2].text.ends_with(" w1199"));
        assert!(chunks.iter().all(|c| !c.text.contains("[CLS]") && !c.text.contains("[SEP]")));
    }

    #[test]
    fn tokenizer_windows_overlap_by_stride() {
        let words = numbered_words(1200);
        let chunker = TokenizerChunker::from_bytes(word_level_tokenizer(&words), 512, 10).unwrap();
        let chunks = chunker.chunk(&doc(&[&words.join(" ")])).unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(chunks[1].text.starts_with("w500 "));
        assert!(chunks[2].text.starts_with("w1000 "));
    }

    #[test]
    fn tokenizer_and_word_chunkers_agree_on_in_vocabulary_text() {
        let words = numbered_words(700);
        let document = doc(&[&words[..300].join(" "), &words[300..].join(" ")]);
        let tokenized = TokenizerChunker::from_bytes(word_level_tokenizer(&words), 64, 4)
            .unwrap()
            .chunk(&document)
            .unwrap();
        let worded = WordWindowChunker::new(62, 4).chunk(&document).unwrap();
        assert_eq!(tokenized, worded);
    }

    #[test]
    fn tokenizer_short_and_empty_documents() {
        let words = numbered_words(10);
        let chunker = TokenizerChunker::from_bytes(word_level_tokenizer(&words), 512, 0).unwrap();
        let chunks = chunker.chunk(&doc(&["w1 w2", "w3"])).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "w1 w2 w3");
        assert!(chunker.chunk(&doc(&["  "])).unwrap().is_empty());
    }

    #[test]
    fn tokenizer_rejects_stride_without_progress() {
        let words = numbered_words(10);
        let err = TokenizerChunker::from_bytes(word_level_tokenizer(&words), 8, 6).err();
        assert!(matches!(err, Some(RagError::ChunkingError(_))));
    }

    #[test]
    fn word_chunker_from_config_leaves_room_for_special_tokens() {
        let config = RetrievalConfig::default();
        let chunker = WordWindowChunker::with_config(&config);
        let text = (0..1020).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunker.chunk(&doc(&[&text])).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("w510 "));
    }
}
