// Indexer module
// Batched bulk indexing with an inter-batch delay for remote rate limits


use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::IndexingConfig;
use crate::database::{Document, DocumentMetadata};
use crate::embeddings::{EmbeddingOptions, EmbeddingProvider};
use crate::search::VectorStore;

/// A document to index; a missing id is replaced by a random UUID
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentInput {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl DocumentInput {
    #[inline]
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            content: content.into(),
            metadata: DocumentMetadata::default(),
        }
    }

    #[inline]
    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub indexed_count: usize,
    pub failed_count: usize,
    pub batches: usize,
}

/// Progress after one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_number: usize,
    pub total_batches: usize,
    pub indexed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkIndexer {
    batch_size: usize,
    batch_delay: Duration,
}

impl BulkIndexer {
    #[inline]
    pub fn new(config: &IndexingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_delay: config.batch_delay(),
        }
    }

    #[inline]
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Embed and store `documents` in fixed-size batches, calling `on_batch`
    /// after each one. Individual failures are counted, never returned.
    #[inline]
    pub async fn index<F>(
        &self,
        store: &VectorStore,
        embeddings: &EmbeddingProvider,
        documents: Vec<DocumentInput>,
        mut on_batch: F,
    ) -> IndexSummary
    where
        F: FnMut(&BatchReport) + Send,
    {
        let total_batches = documents.len().div_ceil(self.batch_size);
        let mut summary = IndexSummary::default();

        info!(
            "Bulk indexing {} documents in {} batches",
            documents.len(),
            total_batches
        );

        for (number, batch) in documents.chunks(self.batch_size).enumerate() {
            if number > 0 && !self.batch_delay.is_zero() {
                debug!("Waiting {:?} before next batch", self.batch_delay);
                sleep(self.batch_delay).await;
            }

            let (indexed, failed) = self.index_batch(store, embeddings, batch).await;
            summary.indexed_count += indexed;
            summary.failed_count += failed;
            summary.batches += 1;

            let report = BatchReport {
                batch_number: number + 1,
                total_batches,
                indexed,
                failed,
            };
            debug!(
                "Batch {}/{}: {} indexed, {} failed",
                report.batch_number, report.total_batches, indexed, failed
            );
            on_batch(&report);
        }

        info!(
            "Bulk indexing finished: {} indexed, {} failed",
            summary.indexed_count, summary.failed_count
        );
        summary
    }

    async fn index_batch(
        &self,
        store: &VectorStore,
        embeddings: &EmbeddingProvider,
        batch: &[DocumentInput],
    ) -> (usize, usize) {
        let mut failed = 0;

        let valid: Vec<&DocumentInput> = batch
            .iter()
            .filter(|input| {
                let ok = !input.content.trim().is_empty();
                if !ok {
                    warn!(id = ?input.id, "Skipping document with empty content");
                    failed += 1;
                }
                ok
            })
            .collect();
        if valid.is_empty() {
            return (0, failed);
        }

        let texts: Vec<String> = valid.iter().map(|input| input.content.clone()).collect();
        let vectors = match embeddings
            .create_batch_embeddings(&texts, EmbeddingOptions::default())
            .await
        {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(error = %e, "Failed to embed batch");
                return (0, failed + valid.len());
            }
        };

        let mut documents = Vec::with_capacity(valid.len());
        for (input, embedding) in valid.into_iter().zip(vectors) {
            let document = Document {
                id: document_id(input),
                content: input.content.clone(),
                embedding,
                metadata: input.metadata.clone(),
            };
            match store.validate_document(&document) {
                Ok(()) => documents.push(document),
                Err(e) => {
                    warn!(error = %e, "Skipping invalid document");
                    failed += 1;
                }
            }
        }

        let count = documents.len();
        match store.add_documents(&documents).await {
            Ok(()) => (count, failed),
            Err(e) => {
                warn!(error = %e, "Failed to store batch of {} documents", count);
                (0, failed + count)
            }
        }
    }
}

fn document_id(input: &DocumentInput) -> String {
    input
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string)
}
