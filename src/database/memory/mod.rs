
use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    Document, DocumentBackend, DocumentMetadata, SearchResult, SimilarityQuery, StoreStats,
    StoredDocument,
};
use crate::Result;
use crate::search::cosine_similarity;

/// Document store held entirely in process memory.
///
/// Documents keep their original insertion position when re-indexed, which is
/// the tie-break order for equal similarities.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<Vec<Document>>,
}

impl MemoryDocumentStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    #[inline]
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

fn matches_category(document: &Document, category: Option<&str>) -> bool {
    category.is_none_or(|wanted| document.metadata.category.as_deref() == Some(wanted))
}

fn stored(document: &Document) -> StoredDocument {
    StoredDocument {
        id: document.id.clone(),
        content: document.content.clone(),
        metadata: document.metadata.clone(),
    }
}

#[async_trait]
impl DocumentBackend for MemoryDocumentStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, document: &Document) -> Result<()> {
        let mut documents = self.documents.write().await;
        match documents.iter_mut().find(|existing| existing.id == document.id) {
            Some(existing) => *existing = document.clone(),
            None => documents.push(document.clone()),
        }
        Ok(())
    }

    async fn upsert_batch(&self, batch: &[Document]) -> Result<()> {
        for document in batch {
            self.upsert(document).await?;
        }
        debug!("Stored batch of {} documents in memory", batch.len());
        Ok(())
    }

    async fn similarity_search(&self, query: SimilarityQuery<'_>) -> Result<Vec<SearchResult>> {
        let documents = self.documents.read().await;

        let mut results = Vec::new();
        for document in documents
            .iter()
            .filter(|document| matches_category(document, query.category))
        {
            let similarity = cosine_similarity(query.vector, &document.embedding)?;
            results.push(SearchResult::from_stored(stored(document), similarity));
        }

        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(query.limit);
        Ok(results)
    }

    async fn text_search(
        &self,
        pattern: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<StoredDocument>> {
        let needle = pattern.to_lowercase();
        let documents = self.documents.read().await;

        Ok(documents
            .iter()
            .filter(|document| matches_category(document, category))
            .filter(|document| document.content.to_lowercase().contains(&needle))
            .take(limit)
            .map(stored)
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<StoredDocument>> {
        let documents = self.documents.read().await;
        Ok(documents
            .iter()
            .find(|document| document.id == id)
            .map(stored))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|document| document.id != id);
        Ok(documents.len() != before)
    }

    async fn update_metadata(&self, id: &str, metadata: &DocumentMetadata) -> Result<bool> {
        let mut documents = self.documents.write().await;
        match documents.iter_mut().find(|document| document.id == id) {
            Some(document) => {
                document.metadata = metadata.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stats(&self) -> Result<StoreStats> {
        let documents = self.documents.read().await;
        let mut counts = BTreeMap::new();
        for document in documents.iter() {
            let category = document
                .metadata
                .category
                .clone()
                .unwrap_or_else(|| "uncategorized".to_string());
            *counts.entry(category).or_insert(0_u64) += 1;
        }
        Ok(StoreStats::from_counts(documents.len() as u64, counts))
    }

    async fn clear(&self) -> Result<()> {
        self.documents.write().await.clear();
        Ok(())
    }
}
