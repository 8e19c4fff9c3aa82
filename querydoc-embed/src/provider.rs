//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::downloader::download_model;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};
use fnv::FnvHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::fs;

/// Result of embedding a batch of texts
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    /// One vector per input text, in input order
    pub embeddings: Vec<Vec<f32>>,
    /// Length of each vector, 0 for an empty batch
    pub dimension: usize,
}

impl EmbeddingResult {
    /// The dimension is taken from the first vector.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

type SharedModel = Arc<Mutex<TextEmbedding>>;
type ModelCacheEntry = (SharedModel, usize);

// Loading an ONNX model takes seconds and hundreds of MB, so providers built from
// identical configs share one instance.
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn model_cache() -> Result<MutexGuard<'static, HashMap<String, ModelCacheEntry>>> {
    MODEL_CACHE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .map_err(|_| EmbedError::LockPoisoned)
}

fn lock_model(model: &SharedModel) -> Result<MutexGuard<'_, TextEmbedding>> {
    model.lock().map_err(|_| EmbedError::LockPoisoned)
}

/// Maps text to fixed-dimension vectors.
///
/// Implementations must be order preserving: `embed_texts(texts).embeddings[i]`
/// is the embedding of `texts[i]`, and every vector has
/// [`embedding_dimension`](Self::embedding_dimension) elements.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts in one logical call.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    fn embedding_dimension(&self) -> usize;

    fn provider_name(&self) -> &str;
}

/// Local ONNX embedding provider backed by fastembed.
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<SharedModel>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Create an uninitialized provider. The dimension is unknown (0) until
    /// [`initialize`](Self::initialize) has loaded the model.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 0,
        }
    }

    /// Create and initialize a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    /// Load the model, downloading it first if needed, and detect its dimension.
    pub async fn initialize(&mut self) -> Result<()> {
        self.config.validate().or_else(|e| match e {
            // Hub models are validated again after the download
            EmbedError::ModelFileNotFound { .. } if self.config.is_huggingface_model() => Ok(()),
            other => Err(other),
        })?;

        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name
        );

        let cache_key = self.cache_key()?;
        let cached = model_cache()?
            .get(&cache_key)
            .map(|(model, dim)| (Arc::clone(model), *dim));

        if let Some((model, dimension)) = cached {
            tracing::info!("Using cached model for: {}", self.config.model_name);
            self.model = Some(model);
            self.dimension = dimension;
            return self.validate_model().await;
        }

        let (model, dimension) = if self.config.is_huggingface_model() {
            download_model(&self.config).await?;
            self.load_user_defined_model().await?
        } else {
            self.load_builtin_model().await?
        };

        let model = Arc::new(Mutex::new(model));
        model_cache()?.insert(cache_key, (Arc::clone(&model), dimension));

        self.model = Some(model);
        self.dimension = dimension;
        self.validate_model().await
    }

    fn cache_key(&self) -> Result<String> {
        // batch_size does not change the loaded model
        let keyed = self.config.clone().with_batch_size(1);
        let config_json =
            serde_json::to_string(&keyed).map_err(|e| EmbedError::External { source: e.into() })?;

        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(config_json.as_bytes());

        Ok(format!("v1:{:x}", hasher.finish()))
    }

    async fn load_builtin_model(&self) -> Result<(TextEmbedding, usize)> {
        let model_kind = self.config.builtin_model()?;
        let cache_dir = self.config.model_base_path.clone();
        let model_name = self.config.model_name.clone();

        tracing::info!("Using built-in fastembed model: {}", model_name);

        tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
            let init_options = InitOptions::new(model_kind)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(false);

            let mut model = TextEmbedding::try_new(init_options)
                .map_err(|e| EmbedError::External { source: e })?;
            let dimension = detect_dimension(&mut model)?;

            tracing::info!("Model {} loaded. Dimension: {}", model_name, dimension);
            Ok((model, dimension))
        })
        .await?
    }

    async fn load_user_defined_model(&self) -> Result<(TextEmbedding, usize)> {
        tracing::info!("Loading user-defined model: {}", self.config.model_name);

        let tokenizer_config = self.config.tokenizer_config();
        let onnx_file = fs::read(self.config.onnx_model_path()).await?;
        let tokenizer_file = fs::read(&tokenizer_config.tokenizer_path).await?;
        let config_file = fs::read(&tokenizer_config.config_path).await?;
        let special_tokens_map_file = fs::read(&tokenizer_config.special_tokens_map_path).await?;

        let tokenizer_config_file = match &tokenizer_config.tokenizer_config_path {
            Some(path) if path.exists() => fs::read(path).await?,
            _ => {
                let minimal_config = serde_json::json!({
                    "clean_up_tokenization_spaces": true,
                    "do_lower_case": false,
                    "model_max_length": 512,
                    "tokenizer_class": "BertTokenizer"
                });
                serde_json::to_vec_pretty(&minimal_config)
                    .map_err(|e| EmbedError::External { source: e.into() })?
            }
        };

        let user_model = UserDefinedEmbeddingModel::new(
            onnx_file,
            TokenizerFiles {
                tokenizer_file,
                config_file,
                special_tokens_map_file,
                tokenizer_config_file,
            },
        );

        let model_name = self.config.model_name.clone();
        tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
            let mut model = TextEmbedding::try_new_from_user_defined(user_model, Default::default())
                .map_err(|e| EmbedError::External { source: e })?;
            let dimension = detect_dimension(&mut model)?;

            tracing::info!(
                "User-defined model {} loaded. Dimension: {}",
                model_name,
                dimension
            );
            Ok((model, dimension))
        })
        .await?
    }

    async fn validate_model(&self) -> Result<()> {
        let embedding = self.embed_text("validation test").await?;

        if embedding.len() != self.dimension {
            return Err(EmbedError::invalid_config(format!(
                "Model validation failed: expected dimension {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(EmbedError::invalid_config(
                "Model validation failed: non-finite values in embedding",
            ));
        }

        tracing::debug!("Model validation passed for: {}", self.config.model_name);
        Ok(())
    }

    /// Drop every cached model. Providers already holding a model keep it.
    pub fn clear_cache() -> Result<()> {
        model_cache()?.clear();
        tracing::info!("Model cache cleared");
        Ok(())
    }

    pub fn cache_size() -> Result<usize> {
        Ok(model_cache()?.len())
    }
}

fn detect_dimension(model: &mut TextEmbedding) -> Result<usize> {
    let sample = model
        .embed(vec!["dimension check".to_string()], None)
        .map_err(|e| EmbedError::External { source: e })?;
    match sample.first() {
        Some(embedding) if !embedding.is_empty() => Ok(embedding.len()),
        _ => Err(EmbedError::invalid_config(
            "Model produced no embedding for the dimension check",
        )),
    }
}

/// Scale `embedding` to unit length. Zero vectors are left untouched.
pub fn l2_normalize(embedding: &mut [f32]) {
    let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in embedding.iter_mut() {
            *value /= norm;
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_input("No embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let batch = batch.to_vec();
            let model = Arc::clone(model);

            let embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut guard = lock_model(&model)?;
                guard
                    .embed(batch, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            all_embeddings.extend(embeddings);
        }

        if all_embeddings.len() != texts.len() {
            return Err(EmbedError::invalid_config(format!(
                "Model returned {} embeddings for {} texts",
                all_embeddings.len(),
                texts.len()
            )));
        }

        if self.config.normalize {
            all_embeddings.iter_mut().for_each(|e| l2_normalize(e));
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}
