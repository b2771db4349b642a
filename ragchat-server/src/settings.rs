//! Command-line and environment settings.
//!
//! Every flag can also be given through the environment variable named in
//! its help text, so the service can be configured entirely from a container
//! environment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use ragchat_retrieval::{
    CachedEmbeddingProvider, Chunker, EmbeddingProvider, HashEmbeddingProvider, IndexMaintenance,
    RetrievalConfig, RetrievalEngine, TokenizerChunker, WordWindowChunker,
};
use tracing::{info, warn};

use crate::server::ServerConfig;
use crate::telemetry::LogFormat;

/// Which embedding backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Deterministic feature hashing; needs no model files.
    Hash,
    /// An OpenAI-compatible `/v1/embeddings` endpoint.
    Openai,
    /// A local BERT encoder run with candle.
    Bert,
}

/// Index maintenance policy, as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MaintenanceArg {
    FullRebuild,
    Append,
}

impl From<MaintenanceArg> for IndexMaintenance {
    fn from(arg: MaintenanceArg) -> Self {
        match arg {
            MaintenanceArg::FullRebuild => IndexMaintenance::FullRebuild,
            MaintenanceArg::Append => IndexMaintenance::Append,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "ragchat-server", version, about = "Document retrieval service for RagChat")]
pub struct Settings {
    /// Address to bind
    #[arg(long, env = "RAGCHAT_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "RAGCHAT_PORT", default_value_t = 8002)]
    pub port: u16,

    /// Largest accepted request body, in MiB
    #[arg(long, env = "RAGCHAT_BODY_LIMIT_MB", default_value_t = 64)]
    pub body_limit_mb: usize,

    /// Log output format
    #[arg(long, env = "RAGCHAT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Embedding backend
    #[arg(long, env = "RAGCHAT_EMBEDDER", value_enum, default_value_t = EmbedderKind::Hash)]
    pub embedder: EmbedderKind,

    /// Vector length for the hash embedder, and for the OpenAI embedder's model
    #[arg(long, env = "RAGCHAT_EMBEDDING_DIMENSIONS", default_value_t = 384)]
    pub embedding_dimensions: usize,

    /// Number of embeddings to memoize by chunk text (0 disables the cache)
    #[arg(long, env = "RAGCHAT_EMBEDDING_CACHE", default_value_t = 10_000)]
    pub embedding_cache: usize,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "RAGCHAT_OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    /// Embedding model requested from the OpenAI-compatible API
    #[arg(long, env = "RAGCHAT_OPENAI_MODEL", default_value = "text-embedding-3-small")]
    pub openai_model: String,

    /// Bearer token for the OpenAI-compatible API
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// HuggingFace model id for the BERT embedder
    #[arg(
        long,
        env = "RAGCHAT_BERT_MODEL",
        default_value = "sentence-transformers/all-MiniLM-L6-v2"
    )]
    pub bert_model: String,

    /// Model revision for the BERT embedder
    #[arg(long, env = "RAGCHAT_BERT_REVISION", default_value = "main")]
    pub bert_revision: String,

    /// Local directory with config.json, tokenizer.json and model.safetensors
    /// (takes precedence over --bert-model)
    #[arg(long, env = "RAGCHAT_BERT_DIR")]
    pub bert_dir: Option<PathBuf>,

    /// tokenizer.json used to cut chunks; without it chunks are word windows
    #[arg(long, env = "RAGCHAT_TOKENIZER")]
    pub tokenizer: Option<PathBuf>,

    /// Maximum chunk length in tokens, special tokens included
    #[arg(long, env = "RAGCHAT_WINDOW_TOKENS", default_value_t = 512)]
    pub window_tokens: usize,

    /// Tokens shared by consecutive chunks
    #[arg(long, env = "RAGCHAT_WINDOW_STRIDE", default_value_t = 0)]
    pub window_stride: usize,

    /// Largest squared L2 distance accepted by fragment search
    #[arg(long, env = "RAGCHAT_FRAGMENT_THRESHOLD", default_value_t = 0.5)]
    pub fragment_threshold: f32,

    /// Share of all chunks considered by fragment search
    #[arg(long, env = "RAGCHAT_FRAGMENT_FRACTION", default_value_t = 0.5)]
    pub fragment_fraction: f32,

    /// How the index is updated when a document is added
    #[arg(
        long,
        env = "RAGCHAT_INDEX_MAINTENANCE",
        value_enum,
        default_value_t = MaintenanceArg::FullRebuild
    )]
    pub index_maintenance: MaintenanceArg,

    /// Texts per embedding request
    #[arg(long, env = "RAGCHAT_EMBED_BATCH_SIZE", default_value_t = 32)]
    pub embed_batch_size: usize,

    /// Seconds to wait for one embedding request
    #[arg(long, env = "RAGCHAT_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    pub embed_timeout_secs: u64,
}

impl Settings {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            body_limit: self.body_limit_mb.saturating_mul(1024 * 1024),
        }
    }

    pub fn retrieval_config(&self) -> anyhow::Result<RetrievalConfig> {
        RetrievalConfig::builder()
            .max_window_tokens(self.window_tokens)
            .window_stride(self.window_stride)
            .fragment_distance_threshold(self.fragment_threshold)
            .fragment_candidate_fraction(self.fragment_fraction)
            .index_maintenance(self.index_maintenance.into())
            .embed_batch_size(self.embed_batch_size)
            .embed_timeout(Duration::from_secs(self.embed_timeout_secs))
            .build()
            .context("invalid retrieval settings")
    }

    /// Assemble the engine. Loading a BERT model may block on downloads.
    pub fn build_engine(&self) -> anyhow::Result<RetrievalEngine> {
        let config = self.retrieval_config()?;
        let chunker = self.chunker(&config)?;
        let mut provider = self.embedding_provider()?;
        if self.embedding_cache > 0 {
            provider = Arc::new(CachedEmbeddingProvider::new(provider, self.embedding_cache));
        }

        info!(
            embedder = provider.name(),
            dimensions = provider.dimensions(),
            maintenance = ?config.index_maintenance,
            "retrieval engine configured"
        );

        RetrievalEngine::builder()
            .config(config)
            .embedding_provider(provider)
            .chunker(chunker)
            .build()
            .context("failed to build retrieval engine")
    }

    fn chunker(&self, config: &RetrievalConfig) -> anyhow::Result<Arc<dyn Chunker>> {
        match &self.tokenizer {
            Some(path) => {
                let chunker = TokenizerChunker::from_file(
                    path,
                    config.max_window_tokens,
                    config.window_stride,
                )
                .with_context(|| format!("failed to load tokenizer {}", path.display()))?;
                Ok(Arc::new(chunker))
            }
            None => {
                warn!("no tokenizer configured, chunking by whitespace-separated words");
                Ok(Arc::new(WordWindowChunker::with_config(config)))
            }
        }
    }

    fn embedding_provider(&self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        match self.embedder {
            EmbedderKind::Hash => {
                Ok(Arc::new(HashEmbeddingProvider::new(self.embedding_dimensions)))
            }
            EmbedderKind::Openai => self.openai_provider(),
            EmbedderKind::Bert => self.bert_provider(),
        }
    }

    #[cfg(feature = "openai")]
    fn openai_provider(&self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        use ragchat_retrieval::OpenAIEmbeddingProvider;

        let mut provider = OpenAIEmbeddingProvider::new(&self.openai_base_url)
            .with_model(&self.openai_model)
            .with_dimensions(self.embedding_dimensions);
        if let Some(key) = &self.openai_api_key {
            provider = provider.with_api_key(key).context("invalid OpenAI API key")?;
        }
        Ok(Arc::new(provider))
    }

    #[cfg(not(feature = "openai"))]
    fn openai_provider(&self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        anyhow::bail!("the openai embedder requires building with the `openai` feature")
    }

    #[cfg(feature = "candle")]
    fn bert_provider(&self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        use ragchat_retrieval::BertEmbeddingProvider;

        let provider = match &self.bert_dir {
            Some(dir) => BertEmbeddingProvider::from_dir(dir)
                .with_context(|| format!("failed to load BERT model from {}", dir.display()))?,
            None => BertEmbeddingProvider::from_hub(&self.bert_model, &self.bert_revision)
                .with_context(|| format!("failed to load BERT model {}", self.bert_model))?,
        };
        Ok(Arc::new(provider))
    }

    #[cfg(not(feature = "candle"))]
    fn bert_provider(&self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        anyhow::bail!("the bert embedder requires building with the `candle` feature")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Settings {
        Settings::try_parse_from(std::iter::once("ragchat-server").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_match_reference_service() {
        let settings = parse(&[]);
        assert_eq!(settings.port, 8002);
        assert_eq!(settings.embedder, EmbedderKind::Hash);

        let config = settings.retrieval_config().unwrap();
        assert_eq!(config, RetrievalConfig::default());
        assert_eq!(settings.server_config().body_limit, 64 * 1024 * 1024);
    }

    #[test]
    fn flags_reach_the_retrieval_config() {
        let settings = parse(&[
            "--window-tokens",
            "128",
            "--window-stride",
            "16",
            "--fragment-threshold",
            "0.8",
            "--index-maintenance",
            "append",
        ]);
        let config = settings.retrieval_config().unwrap();
        assert_eq!(config.max_window_tokens, 128);
        assert_eq!(config.window_stride, 16);
        assert_eq!(config.fragment_distance_threshold, 0.8);
        assert_eq!(config.index_maintenance, IndexMaintenance::Append);
    }

    #[test]
    fn inconsistent_window_is_rejected() {
        let settings = parse(&["--window-tokens", "8", "--window-stride", "8"]);
        assert!(settings.retrieval_config().is_err());
    }

    #[test]
    fn hash_engine_builds_without_model_files() {
        let engine = parse(&["--embedding-dimensions", "32"]).build_engine().unwrap();
        assert_eq!(engine.embedding_provider().dimensions(), 32);
    }

    #[test]
    fn missing_tokenizer_file_is_reported() {
        let err = parse(&["--tokenizer", "/nonexistent/tokenizer.json"]).build_engine().err();
        assert!(err.is_some());
    }
}
