// Embeddings module
// Local synthesis or remote generation, cached per origin

pub mod local;


use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheLayer};
use crate::config::Config;
use crate::morphology::MorphologyAnalyzer;
use crate::remote::RemoteEngine;
use crate::{RagError, Result};

pub use local::LocalEmbedder;

/// Which engine produced a vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingOrigin {
    Local,
    Remote,
}

impl EmbeddingOrigin {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Per-call overrides; unset fields fall back to configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddingOptions {
    pub dimension: Option<usize>,
    pub use_local: Option<bool>,
}

impl EmbeddingOptions {
    #[inline]
    pub fn local() -> Self {
        Self {
            use_local: Some(true),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub origin: EmbeddingOrigin,
    pub cached: bool,
    /// A remote attempt failed and the local path answered instead
    pub fell_back: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub local_computations: u64,
    pub remote_computations: u64,
    pub remote_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    local_computations: AtomicU64,
    remote_computations: AtomicU64,
    remote_failures: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

pub struct EmbeddingProvider {
    local: LocalEmbedder,
    remote: Option<Arc<dyn RemoteEngine>>,
    cache: Arc<CacheLayer>,
    default_dimension: usize,
    max_input_chars: usize,
    force_local: bool,
    remote_timeout: Duration,
    counters: Counters,
}

impl EmbeddingProvider {
    #[inline]
    pub fn new(
        config: &Config,
        analyzer: MorphologyAnalyzer,
        remote: Option<Arc<dyn RemoteEngine>>,
        cache: Arc<CacheLayer>,
    ) -> Self {
        Self {
            local: LocalEmbedder::new(analyzer),
            remote,
            cache,
            default_dimension: config.embedding.dimension,
            max_input_chars: config.embedding.max_input_chars,
            force_local: config.embedding.use_local,
            remote_timeout: config.remote.timeout(),
            counters: Counters::default(),
        }
    }

    #[inline]
    pub fn default_dimension(&self) -> usize {
        self.default_dimension
    }

    #[inline]
    pub fn remote_available(&self) -> bool {
        self.remote.is_some()
    }

    #[inline]
    pub async fn create_embedding(&self, text: &str, options: EmbeddingOptions) -> Result<Vec<f32>> {
        self.create_embedding_with_origin(text, options)
            .await
            .map(|embedding| embedding.vector)
    }

    /// Embed one text, reporting which engine produced the vector
    #[inline]
    pub async fn create_embedding_with_origin(
        &self,
        text: &str,
        options: EmbeddingOptions,
    ) -> Result<Embedding> {
        let dimension = self.dimension(options)?;
        let text = truncate_chars(text, self.max_input_chars);
        if text.trim().is_empty() {
            return Err(RagError::InvalidInput(
                "Cannot embed empty text".to_string(),
            ));
        }

        let Some(remote) = self.select_remote(options) else {
            return Ok(self.embed_locally(text, dimension, false));
        };

        let remote_key = cache_key(EmbeddingOrigin::Remote, dimension, text);
        if let Some(vector) = self.cache.get_embedding(&remote_key) {
            bump(&self.counters.cache_hits, 1);
            return Ok(Embedding {
                vector,
                origin: EmbeddingOrigin::Remote,
                cached: true,
                fell_back: false,
            });
        }
        bump(&self.counters.cache_misses, 1);

        match self.remote_embed(remote.as_ref(), text, dimension).await {
            Ok(vector) => {
                bump(&self.counters.remote_computations, 1);
                self.cache.put_embedding(remote_key, vector.clone());
                Ok(Embedding {
                    vector,
                    origin: EmbeddingOrigin::Remote,
                    cached: false,
                    fell_back: false,
                })
            }
            Err(e) => {
                bump(&self.counters.remote_failures, 1);
                warn!(error = %e, "Remote embedding failed, using local embedding");
                Ok(self.embed_locally(text, dimension, true))
            }
        }
    }

    /// Embed many texts in input order; blank items yield zero vectors
    #[inline]
    pub async fn create_batch_embeddings(
        &self,
        texts: &[String],
        options: EmbeddingOptions,
    ) -> Result<Vec<Vec<f32>>> {
        let dimension = self.dimension(options)?;
        let remote = self.select_remote(options);
        let origin = if remote.is_some() {
            EmbeddingOrigin::Remote
        } else {
            EmbeddingOrigin::Local
        };

        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut pending: Vec<(usize, &str)> = Vec::new();

        for (index, raw) in texts.iter().enumerate() {
            let text = truncate_chars(raw, self.max_input_chars);
            if text.trim().is_empty() {
                results.push(Some(vec![0.0; dimension]));
                continue;
            }

            match self.cache.get_embedding(&cache_key(origin, dimension, text)) {
                Some(vector) => {
                    bump(&self.counters.cache_hits, 1);
                    results.push(Some(vector));
                }
                None => {
                    bump(&self.counters.cache_misses, 1);
                    results.push(None);
                    pending.push((index, text));
                }
            }
        }

        debug!(
            "Batch embedding: {} cached, {} to compute via {}",
            texts.len() - pending.len(),
            pending.len(),
            origin.as_str()
        );

        if !pending.is_empty() {
            let computed = match remote {
                Some(remote) => self.remote_batch_or_local(remote.as_ref(), &pending, dimension).await,
                None => self.local_batch(&pending, dimension),
            };
            for ((index, _), vector) in pending.iter().zip(computed) {
                results[*index] = Some(vector);
            }
        }

        Ok(results
            .into_iter()
            .map(|vector| vector.unwrap_or_else(|| vec![0.0; dimension]))
            .collect())
    }

    #[inline]
    pub fn stats(&self) -> EmbeddingStats {
        EmbeddingStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            local_computations: self.counters.local_computations.load(Ordering::Relaxed),
            remote_computations: self.counters.remote_computations.load(Ordering::Relaxed),
            remote_failures: self.counters.remote_failures.load(Ordering::Relaxed),
        }
    }

    fn dimension(&self, options: EmbeddingOptions) -> Result<usize> {
        match options.dimension.unwrap_or(self.default_dimension) {
            0 => Err(RagError::InvalidInput(
                "Embedding dimension must be positive".to_string(),
            )),
            dimension => Ok(dimension),
        }
    }

    /// Explicit option, then configuration, then remote availability
    fn select_remote(&self, options: EmbeddingOptions) -> Option<&Arc<dyn RemoteEngine>> {
        let use_local = options.use_local.unwrap_or(self.force_local);
        if use_local {
            return None;
        }
        self.remote.as_ref()
    }

    fn embed_locally(&self, text: &str, dimension: usize, fell_back: bool) -> Embedding {
        let key = cache_key(EmbeddingOrigin::Local, dimension, text);
        if let Some(vector) = self.cache.get_embedding(&key) {
            bump(&self.counters.cache_hits, 1);
            return Embedding {
                vector,
                origin: EmbeddingOrigin::Local,
                cached: true,
                fell_back,
            };
        }
        if !fell_back {
            bump(&self.counters.cache_misses, 1);
        }

        let vector = self.local.embed(text, dimension);
        bump(&self.counters.local_computations, 1);
        self.cache.put_embedding(key, vector.clone());

        Embedding {
            vector,
            origin: EmbeddingOrigin::Local,
            cached: false,
            fell_back,
        }
    }

    fn local_batch(&self, pending: &[(usize, &str)], dimension: usize) -> Vec<Vec<f32>> {
        pending
            .iter()
            .map(|(_, text)| {
                let vector = self.local.embed(text, dimension);
                bump(&self.counters.local_computations, 1);
                self.cache.put_embedding(
                    cache_key(EmbeddingOrigin::Local, dimension, text),
                    vector.clone(),
                );
                vector
            })
            .collect()
    }

    async fn remote_batch_or_local(
        &self,
        remote: &dyn RemoteEngine,
        pending: &[(usize, &str)],
        dimension: usize,
    ) -> Vec<Vec<f32>> {
        let texts: Vec<String> = pending.iter().map(|(_, text)| (*text).to_string()).collect();

        let outcome = match tokio::time::timeout(
            self.remote_timeout,
            remote.embed_batch(&texts, dimension),
        )
        .await
        {
            Ok(Ok(vectors)) => check_batch(vectors, texts.len(), dimension),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RagError::EmbeddingGeneration(format!(
                "Remote batch embedding timed out after {:?}",
                self.remote_timeout
            ))),
        };

        match outcome {
            Ok(vectors) => {
                bump(&self.counters.remote_computations, vectors.len() as u64);
                for (text, vector) in texts.iter().zip(&vectors) {
                    self.cache.put_embedding(
                        cache_key(EmbeddingOrigin::Remote, dimension, text),
                        vector.clone(),
                    );
                }
                vectors
            }
            Err(e) => {
                bump(&self.counters.remote_failures, 1);
                warn!(
                    error = %e,
                    count = texts.len(),
                    "Remote batch embedding failed, using local embeddings"
                );
                self.local_batch(pending, dimension)
            }
        }
    }

    async fn remote_embed(
        &self,
        remote: &dyn RemoteEngine,
        text: &str,
        dimension: usize,
    ) -> Result<Vec<f32>> {
        let vector = tokio::time::timeout(self.remote_timeout, remote.embed(text, dimension))
            .await
            .map_err(|_| {
                RagError::EmbeddingGeneration(format!(
                    "Remote embedding timed out after {:?}",
                    self.remote_timeout
                ))
            })??;

        if vector.len() != dimension {
            return Err(RagError::EmbeddingGeneration(format!(
                "Remote embedding has {} dimensions, expected {}",
                vector.len(),
                dimension
            )));
        }
        Ok(vector)
    }
}

fn check_batch(vectors: Vec<Vec<f32>>, expected: usize, dimension: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(RagError::EmbeddingGeneration(format!(
            "Remote batch returned {} vectors for {} texts",
            vectors.len(),
            expected
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(RagError::EmbeddingGeneration(format!(
            "Remote embedding has {} dimensions, expected {}",
            bad.len(),
            dimension
        )));
    }
    Ok(vectors)
}

fn cache_key(origin: EmbeddingOrigin, dimension: usize, text: &str) -> CacheKey {
    CacheKey::from_parts(&[
        origin.as_str().as_bytes(),
        &(dimension as u64).to_le_bytes(),
        text.as_bytes(),
    ])
}

/// Cut `text` to at most `max_chars` characters on a char boundary
#[inline]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text.get(..end).unwrap_or(text),
        None => text,
    }
}
