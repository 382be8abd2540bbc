// Database module
// Document model, the storage backend seam, and its implementations:
// LanceDB for vectors, an in-process store, and the SQLite interaction log

pub mod lancedb;
pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use self::lancedb::LanceDocumentStore;
pub use memory::MemoryDocumentStore;
pub use sqlite::QueryLog;

/// Known metadata fields plus an open extension map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DocumentMetadata {
    #[inline]
    pub fn with_category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: DocumentMetadata,
}

/// A stored document without its vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    /// Cosine similarity in [-1, 1], or a fixed score for fallback tiers
    pub similarity: f32,
    pub metadata: DocumentMetadata,
}

impl SearchResult {
    #[inline]
    pub fn from_stored(document: StoredDocument, similarity: f32) -> Self {
        Self {
            id: document.id,
            content: document.content,
            similarity,
            metadata: document.metadata,
        }
    }

    #[inline]
    pub fn source_ref(&self) -> SourceRef {
        SourceRef {
            id: self.id.clone(),
            similarity: self.similarity,
        }
    }
}

/// Reference to a document that contributed to an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityQuery<'a> {
    pub vector: &'a [f32],
    pub limit: usize,
    pub category: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub count: u64,
    /// Document count per category, largest first
    pub categories: Vec<(String, u64)>,
}

impl StoreStats {
    /// Build stats from per-category counts, sorted by count descending then name
    #[inline]
    pub fn from_counts(count: u64, counts: BTreeMap<String, u64>) -> Self {
        let mut categories: Vec<(String, u64)> = counts.into_iter().collect();
        categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self { count, categories }
    }
}

/// Persistent document store with vector similarity support.
///
/// `similarity_search` returns candidates ordered by similarity, ties in
/// insertion order; threshold filtering is left to the caller.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upsert(&self, document: &Document) -> Result<()>;

    async fn upsert_batch(&self, documents: &[Document]) -> Result<()>;

    async fn similarity_search(&self, query: SimilarityQuery<'_>) -> Result<Vec<SearchResult>>;

    /// Case-insensitive substring match against stored content
    async fn text_search(
        &self,
        pattern: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<StoredDocument>>;

    async fn get(&self, id: &str) -> Result<Option<StoredDocument>>;

    /// Returns whether a document was removed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Returns whether the document exists
    async fn update_metadata(&self, id: &str, metadata: &DocumentMetadata) -> Result<bool>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn clear(&self) -> Result<()>;
}
