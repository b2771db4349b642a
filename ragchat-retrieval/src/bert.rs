//! Local BERT-family sentence encoder built on candle.
//!
//! This module is only available when the `candle` feature is enabled. The
//! reference model is `sentence-transformers/all-MiniLM-L6-v2`; any BERT
//! checkpoint shipped as `config.json`, `tokenizer.json` and
//! `model.safetensors` works.
//!
//! Each text is encoded, the hidden state at the first position (the `[CLS]`
//! token) is taken as the sentence vector, and the vector is L2-normalized.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::embedding::{EmbeddingProvider, l2_normalize};
use crate::error::{RagError, Result};

const PROVIDER: &str = "bert";

/// The sentence encoder the service was designed around.
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

const MAX_SEQUENCE_TOKENS: usize = 512;

fn failure(message: impl Into<String>) -> RagError {
    RagError::EmbeddingError { provider: PROVIDER.into(), message: message.into() }
}

struct Encoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl Encoder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| failure(format!("tokenization failed: {e}")))?;

        let rows = |select: fn(&tokenizers::Encoding) -> &[u32]| -> Result<Tensor> {
            let rows = encodings
                .iter()
                .map(|encoding| Tensor::new(select(encoding), &self.device))
                .collect::<candle_core::Result<Vec<_>>>()
                .map_err(|e| failure(e.to_string()))?;
            Tensor::stack(&rows, 0).map_err(|e| failure(e.to_string()))
        };
        let token_ids = rows(tokenizers::Encoding::get_ids)?;
        let attention_mask = rows(tokenizers::Encoding::get_attention_mask)?;
        let token_type_ids = token_ids.zeros_like().map_err(|e| failure(e.to_string()))?;

        let hidden = self
            .model
            .forward(&token_ids, &token_type_ids, Some(&attention_mask))
            .map_err(|e| failure(format!("forward pass failed: {e}")))?;
        let cls = hidden.i((.., 0)).map_err(|e| failure(e.to_string()))?;

        let mut vectors = cls.to_vec2::<f32>().map_err(|e| failure(e.to_string()))?;
        vectors.iter_mut().for_each(|v| l2_normalize(v));
        Ok(vectors)
    }
}

/// An [`EmbeddingProvider`] running a BERT encoder on the CPU.
///
/// Forward passes run on the blocking thread pool. A pass that has already
/// started cannot be interrupted: when the caller stops waiting (for example
/// after the engine's embedding timeout) the pass still runs to completion
/// and its result is discarded. Batches that had not started by then are
/// skipped.
///
/// # Example
///
/// ```rust,ignore
/// use ragchat_retrieval::bert::BertEmbeddingProvider;
///
/// let provider = BertEmbeddingProvider::from_hub(DEFAULT_MODEL_ID, "main")?;
/// assert_eq!(provider.dimensions(), 384);
/// ```
pub struct BertEmbeddingProvider {
    encoder: Arc<Encoder>,
    dimensions: usize,
}

impl BertEmbeddingProvider {
    /// Load the model from a directory holding `config.json`,
    /// `tokenizer.json` and `model.safetensors`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Self::from_files(
            dir.join("config.json"),
            dir.join("tokenizer.json"),
            dir.join("model.safetensors"),
        )
    }

    /// Download (or reuse the cached copy of) a model from the HuggingFace hub.
    pub fn from_hub(model_id: &str, revision: &str) -> Result<Self> {
        let api = Api::new().map_err(|e| failure(format!("hub client unavailable: {e}")))?;
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));
        let fetch = |file: &str| {
            repo.get(file).map_err(|e| failure(format!("failed to fetch {model_id}/{file}: {e}")))
        };
        info!(model = model_id, revision, "fetching embedding model");
        Self::from_files(
            fetch("config.json")?,
            fetch("tokenizer.json")?,
            fetch("model.safetensors")?,
        )
    }

    /// Load the model from explicit file paths.
    pub fn from_files(config: PathBuf, tokenizer: PathBuf, weights: PathBuf) -> Result<Self> {
        let config_json = std::fs::read_to_string(&config)
            .map_err(|e| failure(format!("failed to read {}: {e}", config.display())))?;
        let dimensions = hidden_size(&config_json)?;
        let bert_config: Config = serde_json::from_str(&config_json)
            .map_err(|e| failure(format!("invalid model config: {e}")))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer)
            .map_err(|e| failure(format!("failed to load {}: {e}", tokenizer.display())))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| failure(format!("invalid truncation settings: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        let device = Device::Cpu;
        let weights_bytes = std::fs::read(&weights)
            .map_err(|e| failure(format!("failed to read {}: {e}", weights.display())))?;
        let vb = VarBuilder::from_buffered_safetensors(weights_bytes, DTYPE, &device)
            .map_err(|e| failure(format!("invalid weights: {e}")))?;
        let model = BertModel::load(vb, &bert_config)
            .map_err(|e| failure(format!("failed to build model: {e}")))?;

        info!(dimensions, "loaded BERT embedding model");
        Ok(Self { encoder: Arc::new(Encoder { model, tokenizer, device }), dimensions })
    }
}

/// Marks the pending blocking work as abandoned when the awaiting future is dropped.
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

fn unless_abandoned<T>(abandoned: &AtomicBool, work: impl FnOnce() -> Result<T>) -> Result<T> {
    if abandoned.load(Ordering::Acquire) {
        return Err(failure("embedding request was abandoned before it started"));
    }
    work()
}

fn hidden_size(config_json: &str) -> Result<usize> {
    let value: serde_json::Value = serde_json::from_str(config_json)
        .map_err(|e| failure(format!("invalid model config: {e}")))?;
    value
        .get("hidden_size")
        .and_then(serde_json::Value::as_u64)
        .map(|n| n as usize)
        .ok_or_else(|| failure("model config has no hidden_size"))
}

#[async_trait]
impl EmbeddingProvider for BertEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| failure("encoder returned no vector"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, batch_size = texts.len(), "embedding batch");

        let encoder = Arc::clone(&self.encoder);
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let abandoned = Arc::new(AtomicBool::new(false));
        let _guard = AbandonOnDrop(Arc::clone(&abandoned));
        tokio::task::spawn_blocking(move || {
            unless_abandoned(&abandoned, || encoder.encode(&owned))
        })
        .await
        .map_err(|e| failure(format!("encoder task failed: {e}")))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_size_is_read_from_config() {
        assert_eq!(hidden_size(r#"{"hidden_size": 384, "num_hidden_layers": 6}"#).unwrap(), 384);
        assert!(hidden_size(r#"{"num_hidden_layers": 6}"#).is_err());
    }

    #[test]
    fn abandoned_work_is_skipped() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = AbandonOnDrop(Arc::clone(&flag));
        assert_eq!(unless_abandoned(&flag, || Ok(1)).unwrap(), 1);

        drop(guard);
        let mut ran = false;
        let result = unless_abandoned(&flag, || {
            ran = true;
            Ok(2)
        });
        assert!(result.is_err());
        assert!(!ran);
    }

    #[tokio::test]
    #[ignore = "downloads all-MiniLM-L6-v2 from the HuggingFace hub"]
    async fn minilm_vectors_are_normalized_and_semantic() {
        let provider = BertEmbeddingProvider::from_hub(DEFAULT_MODEL_ID, "main").unwrap();
        assert_eq!(provider.dimensions(), 384);

        let vectors = provider
            .embed_batch(&[
                "The cat sat on the mat.",
                "A cat is sitting on a rug.",
                "Tax returns are due in April.",
            ])
            .await
            .unwrap();
        let distance =
            |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum() };
        for v in &vectors {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
        assert!(distance(&vectors[0], &vectors[1]) < distance(&vectors[0], &vectors[2]));
    }
}
