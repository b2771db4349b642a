//! Retrieval engine orchestrator.
//!
//! The [`RetrievalEngine`] owns the document store, the chunk store and the
//! vector index, and coordinates the ingest workflow (decode → chunk → embed →
//! index) and the three query paths: prompt search, fragment search and
//! document lookup.
//!
//! All state sits behind a single [`RwLock`]. Additions and resets hold the
//! write lock while they commit, so a query never sees a chunk store and an
//! index that disagree.
//!
//! # Example
//!
//! ```rust,ignore
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
//! engine.add_document("notes.txt", bytes).await?;
//! let context = engine.search("what did the notes say?", 3).await?;
//! let sources = engine.list_documents_with_fragment("a quoted sentence").await?;
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::chunking::Chunker;
use crate::config::{IndexMaintenance, RetrievalConfig};
use crate::decode::{DocumentDecoder, StandardDecoder};
use crate::document::{AddOutcome, Chunk, Document, EngineStats, SearchHit};
use crate::embedding::{EmbeddingProvider, l2_normalize};
use crate::error::{RagError, Result};
use crate::index::{FlatL2Index, Neighbor};
use crate::store::{ChunkStore, DocumentStore};

struct EngineState {
    documents: DocumentStore,
    chunks: ChunkStore,
    index: FlatL2Index,
}

impl EngineState {
    fn new(dimension: usize) -> Self {
        Self {
            documents: DocumentStore::new(),
            chunks: ChunkStore::new(),
            index: FlatL2Index::new(dimension),
        }
    }

    fn check_consistency(&self) -> Result<()> {
        let (chunks, rows) = (self.chunks.len(), self.index.len());
        if chunks != rows {
            error!(chunks, rows, "chunk store and vector index are out of step");
            return Err(RagError::IndexInconsistency { chunks, rows });
        }
        Ok(())
    }

    fn resolve(&self, neighbor: Neighbor) -> Result<SearchHit> {
        let chunk = self.chunks.get(neighbor.row).ok_or(RagError::IndexInconsistency {
            chunks: self.chunks.len(),
            rows: self.index.len(),
        })?;
        Ok(SearchHit { chunk: chunk.clone(), distance: neighbor.distance })
    }
}

/// The retrieval engine.
///
/// Construct one via [`RetrievalEngine::builder()`]. The engine is `Send +
/// Sync`; share it behind an [`Arc`] between request handlers.
pub struct RetrievalEngine {
    config: RetrievalConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    decoder: Arc<dyn DocumentDecoder>,
    state: RwLock<EngineState>,
}

impl RetrievalEngine {
    /// Create a new [`RetrievalEngineBuilder`].
    pub fn builder() -> RetrievalEngineBuilder {
        RetrievalEngineBuilder::default()
    }

    /// Return a reference to the engine configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Decode, chunk, embed and index an uploaded file.
    ///
    /// If a document called `name` is already stored the call returns
    /// [`AddOutcome::Duplicate`] without looking at `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DecodeError`] for undecodable payloads, and any
    /// chunking or embedding error. On error the engine state is unchanged.
    pub async fn add_document(&self, name: &str, bytes: Vec<u8>) -> Result<AddOutcome> {
        if let Some(duplicate) = self.duplicate_of(name).await {
            return Ok(duplicate);
        }

        let document = self.decoder.decode(name, bytes).await.inspect_err(|e| {
            warn!(document.name = %name, error = %e, "failed to decode upload");
        })?;
        self.add_decoded(document).await
    }

    /// Chunk, embed and index an already-decoded document.
    ///
    /// Behaves like [`add_document`](RetrievalEngine::add_document) after the
    /// decode step.
    pub async fn add_decoded(&self, document: Document) -> Result<AddOutcome> {
        if let Some(duplicate) = self.duplicate_of(&document.name).await {
            return Ok(duplicate);
        }

        let (document, chunks) = self.chunk(document).await?;

        let mut state = self.state.write().await;
        if state.documents.contains(&document.name) {
            warn!(document.name = %document.name, "document added concurrently, skipping");
            return Ok(AddOutcome::Duplicate { name: document.name });
        }

        let staged = self.staged_index(&state, &chunks).await.inspect_err(|e| {
            error!(document.name = %document.name, error = %e, "indexing failed, not added");
        })?;

        let name = document.name.clone();
        let chunk_count = chunks.len();
        state.documents.add(document);
        state.chunks.append(chunks);
        if let Some(index) = staged {
            state.index = index;
        }

        info!(
            document.name = %name,
            chunk_count,
            total_chunks = state.chunks.len(),
            index_rows = state.index.len(),
            "added document"
        );
        Ok(AddOutcome::Added { name, chunk_count })
    }

    /// The texts of the `top_k` chunks nearest to `prompt`, concatenated
    /// nearest first with no separator.
    ///
    /// Returns an empty string when nothing is indexed.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `top_k` is zero.
    pub async fn search(&self, prompt: &str, top_k: usize) -> Result<String> {
        let hits = self.search_hits(prompt, top_k).await?;
        Ok(hits.iter().map(|hit| hit.chunk.text.as_str()).collect())
    }

    /// The `top_k` chunks nearest to `prompt`, by ascending distance.
    pub async fn search_hits(&self, prompt: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument("top_k must be at least 1".to_string()));
        }

        let state = self.state.read().await;
        state.check_consistency()?;
        if state.chunks.is_empty() {
            debug!("search on empty index");
            return Ok(Vec::new());
        }

        let query = self.embed_query(prompt).await?;
        let hits = state
            .index
            .search(&query, top_k)?
            .into_iter()
            .map(|neighbor| state.resolve(neighbor))
            .collect::<Result<Vec<_>>>()?;

        info!(top_k, result_count = hits.len(), "search completed");
        Ok(hits)
    }

    /// Names of the documents that appear to contain `fragment`.
    ///
    /// The nearest `floor(chunks × fragment_candidate_fraction)` chunks (at
    /// least one) are candidates; those within `fragment_distance_threshold`
    /// contribute their document's name.
    pub async fn list_documents_with_fragment(&self, fragment: &str) -> Result<BTreeSet<String>> {
        let state = self.state.read().await;
        state.check_consistency()?;
        let chunk_count = state.chunks.len();
        if chunk_count == 0 {
            return Ok(BTreeSet::new());
        }

        let k = candidate_count(chunk_count, self.config.fragment_candidate_fraction);
        let threshold = self.config.fragment_distance_threshold;
        let query = self.embed_query(fragment).await?;

        let mut names = BTreeSet::new();
        for neighbor in state.index.search(&query, k)? {
            if neighbor.distance <= threshold {
                names.insert(state.resolve(neighbor)?.chunk.document_name);
            }
        }

        info!(candidates = k, match_count = names.len(), "fragment search completed");
        Ok(names)
    }

    /// The full text of the named document, pages joined by single spaces.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DocumentNotFound`] if no document has that exact name.
    pub async fn get_document_text(&self, name: &str) -> Result<String> {
        self.state
            .read()
            .await
            .documents
            .get(name)
            .ok_or_else(|| RagError::DocumentNotFound(name.to_string()))
    }

    /// Drop every document, chunk and index row.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        let documents = state.documents.len();
        state.documents.clear();
        state.chunks.clear();
        state.index.reset();
        info!(documents, "engine reset");
    }

    /// Current sizes of the stores and the index.
    pub async fn stats(&self) -> EngineStats {
        let state = self.state.read().await;
        EngineStats {
            documents: state.documents.len(),
            chunks: state.chunks.len(),
            index_rows: state.index.len(),
            dimension: state.index.dimension(),
        }
    }

    /// Names of the stored documents in insertion order.
    pub async fn document_names(&self) -> Vec<String> {
        self.state.read().await.documents.names()
    }

    async fn duplicate_of(&self, name: &str) -> Option<AddOutcome> {
        if self.state.read().await.documents.contains(name) {
            warn!(document.name = %name, "document already present, skipping");
            Some(AddOutcome::Duplicate { name: name.to_string() })
        } else {
            None
        }
    }

    async fn chunk(&self, document: Document) -> Result<(Document, Vec<Chunk>)> {
        let chunker = Arc::clone(&self.chunker);
        let name = document.name.clone();
        tokio::task::spawn_blocking(move || {
            let chunks = chunker.chunk(&document)?;
            Ok((document, chunks))
        })
        .await
        .map_err(|e| RagError::ChunkingError(format!("chunking task for '{name}' failed: {e}")))?
    }

    /// Build the index that will replace the current one once `new_chunks`
    /// are committed. `None` means the current index stays as it is.
    async fn staged_index(
        &self,
        state: &EngineState,
        new_chunks: &[Chunk],
    ) -> Result<Option<FlatL2Index>> {
        let consistent = state.index.len() == state.chunks.len();
        if new_chunks.is_empty() && consistent {
            return Ok(None);
        }

        let (mut index, texts): (FlatL2Index, Vec<&str>) = match self.config.index_maintenance {
            IndexMaintenance::FullRebuild => (
                FlatL2Index::new(state.index.dimension()),
                state.chunks.iter().chain(new_chunks).map(|c| c.text.as_str()).collect(),
            ),
            IndexMaintenance::Append => {
                state.check_consistency()?;
                (state.index.clone(), new_chunks.iter().map(|c| c.text.as_str()).collect())
            }
        };

        debug!(
            policy = ?self.config.index_maintenance,
            texts = texts.len(),
            "embedding chunks for index"
        );
        let embeddings = self.embed_texts(&texts).await?;
        index.add(&embeddings)?;
        Ok(Some(index))
    }

    async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embed_batch_size) {
            let embedded = self.with_timeout(self.embedding_provider.embed_batch(batch)).await?;
            if embedded.len() != batch.len() {
                return Err(RagError::EmbeddingError {
                    provider: self.embedding_provider.name().to_string(),
                    message: format!(
                        "provider returned {} embeddings for {} inputs",
                        embedded.len(),
                        batch.len()
                    ),
                });
            }
            for vector in embedded {
                vectors.push(self.normalized(vector)?);
            }
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.with_timeout(self.embedding_provider.embed(text)).await.inspect_err(
            |e| error!(error = %e, "embedding failed during query"),
        )?;
        self.normalized(vector)
    }

    fn normalized(&self, mut vector: Vec<f32>) -> Result<Vec<f32>> {
        let expected = self.embedding_provider.dimensions();
        if vector.len() != expected {
            return Err(RagError::DimensionMismatch { expected, actual: vector.len() });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(RagError::EmbeddingError {
                provider: self.embedding_provider.name().to_string(),
                message: "embedding contains a non-finite component".to_string(),
            });
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }

    async fn with_timeout<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.embed_timeout;
        tokio::time::timeout(timeout, call).await.map_err(|_| {
            let provider = self.embedding_provider.name().to_string();
            warn!(provider = %provider, ?timeout, "embedding call timed out");
            RagError::EmbeddingTimeout { provider, timeout }
        })?
    }
}

/// Number of fragment-search candidates among `chunk_count` chunks.
fn candidate_count(chunk_count: usize, fraction: f32) -> usize {
    let k = (chunk_count as f64 * f64::from(fraction)).floor() as usize;
    k.clamp(1, chunk_count.max(1))
}

/// Builder for constructing a [`RetrievalEngine`].
///
/// `config`, `embedding_provider` and `chunker` are required. The decoder
/// defaults to [`StandardDecoder`].
///
/// # Example
///
/// ```rust,ignore
/// let engine = RetrievalEngine::builder()
///     .config(RetrievalConfig::default())
///     .embedding_provider(Arc::new(embedder))
///     .chunker(Arc::new(chunker))
///     .decoder(Arc::new(decoder))  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct RetrievalEngineBuilder {
    config: Option<RetrievalConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    chunker: Option<Arc<dyn Chunker>>,
    decoder: Option<Arc<dyn DocumentDecoder>>,
}

impl RetrievalEngineBuilder {
    /// Set the engine configuration.
    pub fn config(mut self, config: RetrievalConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Replace the default [`StandardDecoder`].
    pub fn decoder(mut self, decoder: Arc<dyn DocumentDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Build the [`RetrievalEngine`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if any required field is missing, the
    /// configuration is invalid, or the provider reports zero dimensions.
    pub fn build(self) -> Result<RetrievalEngine> {
        let config =
            self.config.ok_or_else(|| RagError::ConfigError("config is required".to_string()))?;
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let chunker =
            self.chunker.ok_or_else(|| RagError::ConfigError("chunker is required".to_string()))?;
        let decoder = self.decoder.unwrap_or_else(|| Arc::new(StandardDecoder::new()));

        let dimension = embedding_provider.dimensions();
        if dimension == 0 {
            return Err(RagError::ConfigError(format!(
                "embedding provider '{}' reports zero dimensions",
                embedding_provider.name()
            )));
        }

        Ok(RetrievalEngine {
            config,
            embedding_provider,
            chunker,
            decoder,
            state: RwLock::new(EngineState::new(dimension)),
        })
    }
}
