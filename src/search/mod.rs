// Similarity search with cascading fallbacks
// vector → keyword → canned catalogue; a search call never fails

pub mod catalogue;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheLayer};
use crate::config::Config;
use crate::database::{
    Document, DocumentBackend, DocumentMetadata, SearchResult, SimilarityQuery, StoreStats,
    StoredDocument,
};
use crate::morphology::MorphologyAnalyzer;
use crate::{RagError, Result};

const MAX_KEYWORD_TERMS: usize = 5;
const KEYWORD_BASE_SIMILARITY: f32 = 0.6;
const KEYWORD_MATCH_WEIGHT: f32 = 0.1;

/// Cosine similarity of two equal-length vectors, clamped to `[-1, 1]`.
///
/// Returns 0 when either vector has zero magnitude.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(RagError::VectorSearch(format!(
            "Vector length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot = x.mul_add(y, dot);
        norm_a = x.mul_add(x, norm_a);
        norm_b = y.mul_add(y, norm_b);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32)
}

/// Tier that produced a search outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTier {
    Vector,
    Keyword,
    Catalogue,
}

impl SearchTier {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Keyword => "keyword",
            Self::Catalogue => "catalogue",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Minimum similarity for the vector tier
    pub threshold: f32,
    pub category: Option<String>,
}

impl SearchOptions {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.search.top_k,
            threshold: config.search.threshold,
            category: None,
        }
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.3,
            category: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query_text: &'a str,
    pub vector: Option<&'a [f32]>,
    pub options: SearchOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub success: bool,
    pub results: Vec<SearchResult>,
    pub tier: SearchTier,
    pub cached: bool,
    /// Why an earlier tier was skipped, if one was
    pub degraded_reason: Option<String>,
}

impl SearchOutcome {
    fn new(tier: SearchTier, results: Vec<SearchResult>, degraded_reason: Option<String>) -> Self {
        Self {
            success: true,
            results,
            tier,
            cached: false,
            degraded_reason,
        }
    }

    #[inline]
    pub fn top_similarity(&self) -> Option<f32> {
        self.results.first().map(|r| r.similarity)
    }
}

/// Document store front with validation, result caching and the fallback chain
pub struct VectorStore {
    backend: Arc<dyn DocumentBackend>,
    cache: Arc<CacheLayer>,
    analyzer: MorphologyAnalyzer,
    keyword_fallback: bool,
    dimension: usize,
}

impl VectorStore {
    #[inline]
    pub fn new(
        backend: Arc<dyn DocumentBackend>,
        cache: Arc<CacheLayer>,
        analyzer: MorphologyAnalyzer,
        config: &Config,
    ) -> Self {
        Self {
            backend,
            cache,
            analyzer,
            keyword_fallback: config.search.keyword_fallback,
            dimension: config.embedding.dimension,
        }
    }

    #[inline]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Check a document before it reaches the backend
    #[inline]
    pub fn validate_document(&self, document: &Document) -> Result<()> {
        if document.id.trim().is_empty() {
            return Err(RagError::InvalidInput("Document id is empty".to_string()));
        }
        if document.content.trim().is_empty() {
            return Err(RagError::InvalidInput(format!(
                "Document {} has empty content",
                document.id
            )));
        }
        if document.embedding.len() != self.dimension {
            return Err(RagError::InvalidInput(format!(
                "Document {} has {} dimensions, expected {}",
                document.id,
                document.embedding.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    #[inline]
    pub async fn add_document(&self, document: &Document) -> Result<()> {
        self.validate_document(document)?;
        self.backend.upsert(document).await?;
        self.cache.invalidate_search();
        debug!("Indexed document {}", document.id);
        Ok(())
    }

    #[inline]
    pub async fn add_documents(&self, documents: &[Document]) -> Result<()> {
        for document in documents {
            self.validate_document(document)?;
        }
        if documents.is_empty() {
            return Ok(());
        }
        self.backend.upsert_batch(documents).await?;
        self.cache.invalidate_search();
        debug!("Indexed {} documents", documents.len());
        Ok(())
    }

    #[inline]
    pub async fn get_document(&self, id: &str) -> Result<Option<StoredDocument>> {
        self.backend.get(id).await
    }

    #[inline]
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let removed = self.backend.delete(id).await?;
        if removed {
            self.cache.invalidate_search();
        }
        Ok(removed)
    }

    #[inline]
    pub async fn update_metadata(&self, id: &str, metadata: &DocumentMetadata) -> Result<bool> {
        let updated = self.backend.update_metadata(id, metadata).await?;
        if updated {
            self.cache.invalidate_search();
        }
        Ok(updated)
    }

    #[inline]
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await?;
        self.cache.invalidate_search();
        info!("Cleared document store");
        Ok(())
    }

    #[inline]
    pub async fn get_stats(&self) -> Result<StoreStats> {
        self.backend.stats().await
    }

    /// Run the tiers in order until one yields results
    #[inline]
    pub async fn search(&self, request: &SearchRequest<'_>) -> SearchOutcome {
        let options = &request.options;

        let degraded_reason = match request.vector {
            None => "no query vector".to_string(),
            Some(vector) => match self.vector_tier(request.query_text, vector, options).await {
                Ok(outcome) if !outcome.results.is_empty() => return outcome,
                Ok(_) => "no vector matches above threshold".to_string(),
                Err(e) => {
                    warn!(error = %e, "Vector search failed, falling back");
                    format!("vector search failed: {}", e)
                }
            },
        };

        let degraded_reason = if self.keyword_fallback {
            match self.keyword_tier(request.query_text, options).await {
                Ok(results) if !results.is_empty() => {
                    debug!("Keyword tier returned {} results", results.len());
                    return SearchOutcome::new(SearchTier::Keyword, results, Some(degraded_reason));
                }
                Ok(_) => format!("{}; no keyword matches", degraded_reason),
                Err(e) => {
                    warn!(error = %e, "Keyword search failed, falling back");
                    format!("{}; keyword search failed: {}", degraded_reason, e)
                }
            }
        } else {
            degraded_reason
        };

        let results = catalogue::lookup(request.query_text, options.top_k);
        debug!("Catalogue tier returned {} results", results.len());
        SearchOutcome::new(SearchTier::Catalogue, results, Some(degraded_reason))
    }

    async fn vector_tier(
        &self,
        query_text: &str,
        vector: &[f32],
        options: &SearchOptions,
    ) -> Result<SearchOutcome> {
        let key = search_cache_key(query_text, vector, options);
        if let Some(results) = self.cache.get_search(&key) {
            debug!("Search cache hit");
            let mut outcome = SearchOutcome::new(SearchTier::Vector, results, None);
            outcome.cached = true;
            return Ok(outcome);
        }

        let mut results = self
            .backend
            .similarity_search(SimilarityQuery {
                vector,
                limit: options.top_k,
                category: options.category.as_deref(),
            })
            .await?;

        results.retain(|r| r.similarity >= options.threshold);
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(options.top_k);

        if !results.is_empty() {
            self.cache.put_search(key, results.clone());
        }
        Ok(SearchOutcome::new(SearchTier::Vector, results, None))
    }

    async fn keyword_tier(&self, query_text: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let terms = self.keyword_terms(query_text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        // first-seen order, with the number of terms each document matched
        let mut hits: Vec<(StoredDocument, usize)> = Vec::new();
        let mut failures = 0;
        let mut last_error = None;

        for term in &terms {
            match self
                .backend
                .text_search(term, options.top_k, options.category.as_deref())
                .await
            {
                Ok(documents) => {
                    for document in documents {
                        match hits.iter_mut().find(|(existing, _)| existing.id == document.id) {
                            Some((_, count)) => *count += 1,
                            None => hits.push((document, 1)),
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        if failures == terms.len() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let term_count = terms.len() as f32;
        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .map(|(document, matched)| {
                let similarity =
                    (matched as f32 / term_count).mul_add(KEYWORD_MATCH_WEIGHT, KEYWORD_BASE_SIMILARITY);
                SearchResult::from_stored(document, similarity)
            })
            .collect();
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(options.top_k);
        Ok(results)
    }

    /// Analyzer keywords, or stems of two or more characters when none
    fn keyword_terms(&self, query_text: &str) -> Vec<String> {
        let analysis = self.analyzer.analyze(query_text);
        let candidates = if analysis.keywords.is_empty() {
            analysis
                .stems
                .into_iter()
                .filter(|stem| stem.chars().count() >= 2)
                .collect()
        } else {
            analysis.keywords
        };

        candidates
            .into_iter()
            .map(|term| term.to_lowercase())
            .unique()
            .take(MAX_KEYWORD_TERMS)
            .collect()
    }
}

fn search_cache_key(query_text: &str, vector: &[f32], options: &SearchOptions) -> CacheKey {
    let vector_bytes: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
    CacheKey::from_parts(&[
        b"search".as_slice(),
        &vector_bytes,
        &(options.top_k as u64).to_le_bytes(),
        &options.threshold.to_le_bytes(),
        options.category.as_deref().unwrap_or("").as_bytes(),
        query_text.as_bytes(),
    ])
}
