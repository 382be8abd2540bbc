use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::RemoteEngine;
use crate::embeddings::local::hash_embedding;
use crate::{RagError, Result};

/// In-process [`RemoteEngine`] with switchable failures and call counters
#[derive(Debug, Default)]
pub(crate) struct ScriptedRemote {
    pub fail_embed: bool,
    pub fail_generate: bool,
    pub wrong_dimension: bool,
    pub delay: Option<Duration>,
    pub answer: String,
    pub embed_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,
}

impl ScriptedRemote {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_embed: true,
            fail_generate: true,
            ..Self::default()
        }
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str, dimension: usize) -> Vec<f32> {
        let length = if self.wrong_dimension {
            dimension + 1
        } else {
            dimension
        };
        hash_embedding(&format!("remote:{}", text), length)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteEngine for ScriptedRemote {
    async fn embed(&self, text: &str, dimension: usize) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_embed {
            return Err(RagError::Network("embedding endpoint unavailable".to_string()));
        }
        Ok(self.vector(text, dimension))
    }

    async fn embed_batch(&self, texts: &[String], dimension: usize) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_embed {
            return Err(RagError::Network("embedding endpoint unavailable".to_string()));
        }
        Ok(texts.iter().map(|t| self.vector(t, dimension)).collect())
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_generate {
            return Err(RagError::Network("generation endpoint unavailable".to_string()));
        }
        Ok(self.answer.clone())
    }
}
