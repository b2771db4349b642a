//! # ragchat-retrieval
//!
//! Document retrieval engine for retrieval-augmented chat.
//!
//! ## Overview
//!
//! Uploaded files are decoded into page text, split into token-bounded
//! chunks, embedded, and indexed in an exact L2 nearest-neighbor index. The
//! engine answers three kinds of question:
//!
//! - [`RetrievalEngine::search`] - the text of the chunks most relevant to a
//!   prompt, ready to paste into an LLM context
//! - [`RetrievalEngine::list_documents_with_fragment`] - which documents seem
//!   to contain a given passage
//! - [`RetrievalEngine::get_document_text`] - the full text of a document
//!
//! ## Components
//!
//! - [`DocumentDecoder`] / [`StandardDecoder`] - bytes to [`Document`] (PDF or UTF-8 text)
//! - [`Chunker`] - [`TokenizerChunker`] (HuggingFace tokenizer windows) or [`WordWindowChunker`]
//! - [`EmbeddingProvider`] - [`HashEmbeddingProvider`], [`CachedEmbeddingProvider`],
//!   `OpenAIEmbeddingProvider` (feature `openai`), `BertEmbeddingProvider` (feature `candle`)
//! - [`FlatL2Index`] - exhaustive squared-L2 search
//! - [`DocumentStore`] / [`ChunkStore`] - in-memory stores kept aligned with the index
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ragchat_retrieval::{
//!     HashEmbeddingProvider, RetrievalConfig, RetrievalEngine, WordWindowChunker,
//! };
//!
//! let engine = RetrievalEngine::builder()
//!     .config(RetrievalConfig::default())
//!     .embedding_provider(Arc::new(HashEmbeddingProvider::default()))
//!     .chunker(Arc::new(WordWindowChunker::new(200, 0)))
//!     .build()?;
//!
//! engine.add_document("handbook.pdf", std::fs::read("handbook.pdf")?).await?;
//! let context = engine.search("How many days of leave do I get?", 3).await?;
//! ```
//!
//! ## Features
//!
//! | Feature | Enables |
//! |---------|---------|
//! | `pdf` (default) | PDF decoding via `pdf-extract` |
//! | `openai` | [`openai::OpenAIEmbeddingProvider`] |
//! | `candle` | [`bert::BertEmbeddingProvider`] |

pub mod cache;
pub mod chunking;
pub mod config;
pub mod decode;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod store;

#[cfg(feature = "candle")]
pub mod bert;
#[cfg(feature = "openai")]
pub mod openai;

pub use cache::CachedEmbeddingProvider;
pub use chunking::{Chunker, TokenizerChunker, WordWindowChunker};
pub use config::{IndexMaintenance, RetrievalConfig, RetrievalConfigBuilder};
pub use decode::{DocumentDecoder, StandardDecoder};
pub use document::{AddOutcome, Chunk, Document, EngineStats, SearchHit};
pub use embedding::{EmbeddingProvider, HashEmbeddingProvider, l2_normalize};
pub use engine::{RetrievalEngine, RetrievalEngineBuilder};
pub use error::{RagError, Result};
pub use index::{FlatL2Index, Neighbor};
pub use store::{ChunkStore, DocumentStore};

#[cfg(feature = "candle")]
pub use bert::BertEmbeddingProvider;
#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;
