//! Embedding cache keyed by exact chunk text.
//!
//! Under [`IndexMaintenance::FullRebuild`](crate::IndexMaintenance::FullRebuild)
//! every addition re-embeds every stored chunk. Wrapping the provider in a
//! [`CachedEmbeddingProvider`] turns the repeated work into lookups, since the
//! embedding of a byte-identical text never changes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl CacheState {
    fn insert(&mut self, text: String, embedding: Vec<f32>, capacity: usize) {
        if self.entries.contains_key(&text) {
            return;
        }
        while self.entries.len() >= capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(text.clone());
        self.entries.insert(text, embedding);
    }

    /// One slot per input (`None` for a miss) and the distinct missing texts.
    fn lookup<'a>(&self, texts: &[&'a str]) -> (Vec<Option<Vec<f32>>>, Vec<&'a str>) {
        let mut results = Vec::with_capacity(texts.len());
        let mut misses: Vec<&'a str> = Vec::new();
        for text in texts {
            let hit = self.entries.get(*text).cloned();
            if hit.is_none() && !misses.contains(text) {
                misses.push(*text);
            }
            results.push(hit);
        }
        (results, misses)
    }
}

/// An [`EmbeddingProvider`] wrapper that memoizes embeddings by text.
///
/// Holds at most `capacity` entries and evicts the oldest insertion first.
/// Batch calls forward only the cache misses, as a single inner batch.
pub struct CachedEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl CachedEmbeddingProvider {
    /// Wrap `inner` with a cache of at most `capacity` entries (minimum 1).
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        Self { inner, capacity: capacity.max(1), state: Mutex::new(CacheState::default()) }
    }

    /// Number of cached embeddings.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every cached embedding.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.order.clear();
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.state.lock().await.entries.get(text) {
            return Ok(hit.clone());
        }
        let embedding = self.inner.embed(text).await?;
        self.state.lock().await.insert(text.to_string(), embedding.clone(), self.capacity);
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let (mut results, misses) = self.state.lock().await.lookup(texts);

        debug!(
            provider = self.inner.name(),
            hits = results.iter().filter(|slot| slot.is_some()).count(),
            misses = misses.len(),
            "embedding cache lookup"
        );

        if !misses.is_empty() {
            let fresh = self.inner.embed_batch(&misses).await?;
            if fresh.len() != misses.len() {
                return Err(RagError::EmbeddingError {
                    provider: self.inner.name().to_string(),
                    message: format!(
                        "provider returned {} embeddings for {} inputs",
                        fresh.len(),
                        misses.len()
                    ),
                });
            }
            let computed: HashMap<&str, Vec<f32>> = misses.iter().copied().zip(fresh).collect();

            let mut state = self.state.lock().await;
            for (text, slot) in texts.iter().zip(results.iter_mut()) {
                if slot.is_none() {
                    *slot = computed.get(*text).cloned();
                }
            }
            for (text, embedding) in computed {
                state.insert(text.to_string(), embedding, self.capacity);
            }
        }

        results
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| RagError::EmbeddingError {
                    provider: self.inner.name().to_string(),
                    message: "missing embedding after cache fill".to_string(),
                })
            })
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::embedding::HashEmbeddingProvider;

    struct CountingProvider {
        inner: HashEmbeddingProvider,
        texts_embedded: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.texts_embedded.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            self.inner.embed_batch(texts).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn counting() -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            inner: HashEmbeddingProvider::new(16),
            texts_embedded: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn batch_only_embeds_misses() {
        let inner = counting();
        let cache = CachedEmbeddingProvider::new(inner.clone(), 100);

        let first = cache.embed_batch(&["a", "b"]).await.unwrap();
        assert_eq!(inner.texts_embedded.load(Ordering::SeqCst), 2);

        let second = cache.embed_batch(&["a", "b", "c", "c"]).await.unwrap();
        assert_eq!(inner.texts_embedded.load(Ordering::SeqCst), 3);
        assert_eq!(second.len(), 4);
        assert_eq!(second[0], first[0]);
        assert_eq!(second[1], first[1]);
        assert_eq!(second[2], second[3]);
        assert_eq!(cache.len().await, 3);
    }

    #[test]
    fn repeated_misses_are_not_hits() {
        let mut state = CacheState::default();
        state.insert("a".to_string(), vec![1.0], 10);

        let (results, misses) = state.lookup(&["c", "c"]);
        assert!(results.iter().all(Option::is_none));
        assert_eq!(misses, vec!["c"]);

        let (results, misses) = state.lookup(&["a", "c", "a"]);
        assert_eq!(results.iter().filter(|slot| slot.is_some()).count(), 2);
        assert_eq!(misses, vec!["c"]);
    }

    #[tokio::test]
    async fn single_embed_uses_cache() {
        let inner = counting();
        let cache = CachedEmbeddingProvider::new(inner.clone(), 100);
        let a = cache.embed("same").await.unwrap();
        let b = cache.embed("same").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(inner.texts_embedded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn evicts_oldest_when_full() {
        let inner = counting();
        let cache = CachedEmbeddingProvider::new(inner.clone(), 2);
        cache.embed_batch(&["one", "two", "three"]).await.unwrap();
        assert_eq!(cache.len().await, 2);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
