// Retrieval engine
// Response cache → routing → embedding and context fan-out → tiered search →
// local or remote answer, with automatic fail-over to local in auto mode

pub mod answer;
pub mod context;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheLayer, CacheLayerStats, CacheSweeper, ResponseCacheEntry};
use crate::config::Config;
use crate::database::sqlite::NewQueryLogEntry;
use crate::database::{
    DocumentBackend, DocumentMetadata, LanceDocumentStore, MemoryDocumentStore, QueryLog,
    SourceRef, StoreStats, StoredDocument,
};
use crate::embeddings::{
    Embedding, EmbeddingOptions, EmbeddingOrigin, EmbeddingProvider, EmbeddingStats,
};
use crate::indexer::{BatchReport, BulkIndexer, DocumentInput, IndexSummary};
use crate::morphology::{self, IntentCategory, MorphologyAnalyzer};
use crate::remote::{HttpRemoteEngine, RemoteEngine};
use crate::router::{
    EngineKind, QueryComplexityRouter, QueryComplexityScore, RouteRequest, RoutingMode,
};
use crate::search::{SearchOptions, SearchOutcome, SearchRequest, SearchTier, VectorStore};
use crate::{RagError, Result};

pub use context::{ContextSnippets, ContextSupplier};

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub mode: RoutingMode,
    pub max_results: usize,
    pub threshold: f32,
    pub category: Option<String>,
    pub use_cache: bool,
    /// Honoured in auto mode only
    pub preferred_engine: Option<EngineKind>,
    pub include_external_context: bool,
    /// Earlier turns, oldest first
    pub conversation: Vec<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            mode: RoutingMode::Auto,
            max_results: 5,
            threshold: 0.3,
            category: None,
            use_cache: true,
            preferred_engine: None,
            include_external_context: false,
            conversation: Vec::new(),
        }
    }
}

impl QueryOptions {
    /// Defaults with the configured search limits
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_results: config.search.top_k,
            threshold: config.search.threshold,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_results == 0 {
            return Err(RagError::InvalidInput(
                "max_results must be at least 1".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.threshold) {
            return Err(RagError::InvalidInput(format!(
                "threshold {} is outside [-1, 1]",
                self.threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseMetadata {
    pub cached: bool,
    pub search_tier: Option<SearchTier>,
    pub sources: Vec<SourceRef>,
    pub intent: Option<IntentCategory>,
    pub complexity: Option<QueryComplexityScore>,
    /// The remote engine failed in auto mode and the local engine answered
    pub auto_switched: bool,
    pub embedding_origin: Option<EmbeddingOrigin>,
    pub external_context_used: bool,
    pub routing_reason: Option<String>,
    /// Why the answer is degraded, when it is
    pub fallback_reason: Option<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub response: String,
    pub engine: EngineKind,
    pub confidence: f32,
    pub metadata: ResponseMetadata,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub vector_store_up: bool,
    pub document_count: u64,
    pub cache_size: usize,
    pub remote_configured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub total_queries: u64,
    pub auto_switches: u64,
    pub cache: CacheLayerStats,
    pub embeddings: EmbeddingStats,
}

/// An answer before timing and bookkeeping are attached
struct Answer {
    success: bool,
    text: String,
    engine: EngineKind,
    confidence: f32,
    auto_switched: bool,
    fallback_reason: Option<String>,
}

pub struct RetrievalEngineBuilder {
    config: Config,
    analyzer: MorphologyAnalyzer,
    backend: Option<Arc<dyn DocumentBackend>>,
    remote: Option<Arc<dyn RemoteEngine>>,
    context_supplier: Option<Arc<dyn ContextSupplier>>,
    query_log: Option<QueryLog>,
}

impl RetrievalEngineBuilder {
    #[inline]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            analyzer: MorphologyAnalyzer::new(),
            backend: None,
            remote: None,
            context_supplier: None,
            query_log: None,
        }
    }

    #[inline]
    pub fn analyzer(mut self, analyzer: MorphologyAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Document storage; an in-process store when unset
    #[inline]
    pub fn backend(mut self, backend: Arc<dyn DocumentBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    #[inline]
    pub fn remote(mut self, remote: Arc<dyn RemoteEngine>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[inline]
    pub fn context_supplier(mut self, supplier: Arc<dyn ContextSupplier>) -> Self {
        self.context_supplier = Some(supplier);
        self
    }

    #[inline]
    pub fn query_log(mut self, query_log: QueryLog) -> Self {
        self.query_log = Some(query_log);
        self
    }

    #[inline]
    pub fn build(self) -> Result<RetrievalEngine> {
        self.config.validate()?;

        let cache = Arc::new(CacheLayer::new(&self.config.cache));
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryDocumentStore::new()));

        let embeddings = EmbeddingProvider::new(
            &self.config,
            self.analyzer.clone(),
            self.remote.clone(),
            Arc::clone(&cache),
        );
        let store = VectorStore::new(
            backend,
            Arc::clone(&cache),
            self.analyzer.clone(),
            &self.config,
        );

        info!(
            backend = store.backend_name(),
            remote = self.remote.is_some(),
            dimension = store.dimension(),
            "Retrieval engine ready"
        );

        Ok(RetrievalEngine {
            router: QueryComplexityRouter::new(&self.config.router),
            indexer: BulkIndexer::new(&self.config.indexing),
            analyzer: self.analyzer,
            cache,
            embeddings,
            store,
            remote: self.remote,
            context_supplier: self.context_supplier,
            query_log: self.query_log,
            total_queries: AtomicU64::new(0),
            auto_switches: AtomicU64::new(0),
            config: self.config,
        })
    }
}

pub struct RetrievalEngine {
    config: Config,
    analyzer: MorphologyAnalyzer,
    cache: Arc<CacheLayer>,
    embeddings: EmbeddingProvider,
    store: VectorStore,
    router: QueryComplexityRouter,
    indexer: BulkIndexer,
    remote: Option<Arc<dyn RemoteEngine>>,
    context_supplier: Option<Arc<dyn ContextSupplier>>,
    query_log: Option<QueryLog>,
    total_queries: AtomicU64,
    auto_switches: AtomicU64,
}

impl RetrievalEngine {
    #[inline]
    pub fn builder(config: Config) -> RetrievalEngineBuilder {
        RetrievalEngineBuilder::new(config)
    }

    /// Engine over the on-disk stores under the configuration directory, with
    /// the HTTP remote engine when a credential is configured
    #[inline]
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(config.get_base_dir())?;

        let backend = LanceDocumentStore::open(
            &config.vector_database_path(),
            config.embedding.dimension,
        )
        .await?;
        let query_log = QueryLog::new(config.query_log_path()).await?;

        let mut builder = Self::builder(config.clone())
            .backend(Arc::new(backend))
            .query_log(query_log);
        if let Some(remote) = HttpRemoteEngine::from_config(&config)? {
            builder = builder.remote(Arc::new(
                remote.with_timeout(config.remote.generation_timeout()),
            ));
        }
        builder.build()
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    #[inline]
    pub fn embeddings(&self) -> &EmbeddingProvider {
        &self.embeddings
    }

    #[inline]
    pub fn router(&self) -> &QueryComplexityRouter {
        &self.router
    }

    #[inline]
    pub fn query_log(&self) -> Option<&QueryLog> {
        self.query_log.as_ref()
    }

    #[inline]
    pub fn remote_available(&self) -> bool {
        self.remote.is_some()
    }

    /// Start the periodic cache expiry sweep; it stops when the handle drops
    #[inline]
    pub fn spawn_cache_sweeper(&self) -> CacheSweeper {
        self.cache.spawn_sweeper(self.config.cache.sweep_interval())
    }

    /// Answer `text`. Only invalid input and an unusable forced mode are
    /// returned as errors; dependency failures degrade the answer instead.
    #[inline]
    pub async fn query(&self, text: &str, options: &QueryOptions) -> Result<QueryResponse> {
        let started = Instant::now();
        let query = text.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput("Query is empty".to_string()));
        }
        options.validate()?;
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        let intent = self.analyzer.analyze_intent(query).category;
        let cache_key = response_cache_key(options.mode, query, options.category.as_deref());

        if options.use_cache {
            if let Some(entry) = self.cache.get_response(&cache_key) {
                debug!("Response cache hit");
                let response = QueryResponse {
                    success: true,
                    response: entry.response,
                    engine: entry.engine,
                    confidence: entry.confidence,
                    metadata: ResponseMetadata {
                        cached: true,
                        sources: entry.sources,
                        intent: Some(intent),
                        suggestions: answer::suggestions(intent),
                        ..ResponseMetadata::default()
                    },
                    processing_time_ms: elapsed_ms(started),
                };
                self.log_query(query, options.mode, &response).await;
                return Ok(response);
            }
        }

        let decision = self.router.route(
            query,
            &RouteRequest {
                mode: options.mode,
                preferred_engine: options.preferred_engine,
                context_chars: options.conversation.iter().map(|t| t.chars().count()).sum(),
                remote_available: self.remote.is_some(),
            },
        )?;

        let (embedding, context) = tokio::join!(
            self.embeddings
                .create_embedding_with_origin(query, EmbeddingOptions::default()),
            self.fetch_context(query, options.include_external_context),
        );
        let embedding = match embedding {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "Query embedding failed, searching without a vector");
                None
            }
        };

        let outcome = self
            .store
            .search(&SearchRequest {
                query_text: query,
                vector: embedding.as_ref().map(|e| e.vector.as_slice()),
                options: SearchOptions {
                    top_k: options.max_results,
                    threshold: options.threshold,
                    category: options.category.clone(),
                },
            })
            .await;

        let local = self.local_answer(query, intent, &outcome, embedding.as_ref());
        let answer = match decision.engine {
            EngineKind::Local => local,
            EngineKind::Remote => {
                self.remote_answer(query, options, &outcome, &context, local)
                    .await
            }
        };

        let sources: Vec<SourceRef> = outcome.results.iter().map(|r| r.source_ref()).collect();
        let fallback_reason = answer.fallback_reason.or(outcome.degraded_reason);

        if answer.success && !answer.auto_switched && options.use_cache {
            self.cache.put_response(
                cache_key,
                ResponseCacheEntry {
                    response: answer.text.clone(),
                    engine: answer.engine,
                    confidence: answer.confidence,
                    timestamp: Utc::now(),
                    ttl: self.cache.response_ttl(),
                    sources: sources.clone(),
                },
            );
        }

        let response = QueryResponse {
            success: answer.success,
            response: answer.text,
            engine: answer.engine,
            confidence: answer.confidence,
            metadata: ResponseMetadata {
                cached: false,
                search_tier: Some(outcome.tier),
                sources,
                intent: Some(intent),
                complexity: Some(decision.score),
                auto_switched: answer.auto_switched,
                embedding_origin: embedding.as_ref().map(|e| e.origin),
                external_context_used: !context.is_empty(),
                routing_reason: Some(decision.reason),
                fallback_reason,
                suggestions: answer::suggestions(intent),
            },
            processing_time_ms: elapsed_ms(started),
        };

        info!(
            engine = response.engine.as_str(),
            tier = outcome.tier.as_str(),
            confidence = response.confidence,
            auto_switched = response.metadata.auto_switched,
            elapsed_ms = response.processing_time_ms,
            "Answered query"
        );
        self.log_query(query, options.mode, &response).await;
        Ok(response)
    }

    fn local_answer(
        &self,
        query: &str,
        intent: IntentCategory,
        outcome: &SearchOutcome,
        embedding: Option<&Embedding>,
    ) -> Answer {
        let degraded = embedding.is_none_or(|e| e.fell_back);
        Answer {
            success: true,
            text: answer::local_answer(query, intent, &outcome.results),
            engine: EngineKind::Local,
            confidence: answer::local_confidence(outcome.top_similarity(), outcome.tier, degraded),
            auto_switched: false,
            fallback_reason: None,
        }
    }

    /// Remote answer; in auto mode a failure falls back to `local`
    async fn remote_answer(
        &self,
        query: &str,
        options: &QueryOptions,
        outcome: &SearchOutcome,
        context: &ContextSnippets,
        local: Answer,
    ) -> Answer {
        let prompt = answer::build_prompt(
            query,
            &outcome.results,
            &context.snippets,
            &options.conversation,
        );

        match self.generate(&prompt).await {
            Ok(text) => Answer {
                success: true,
                text,
                engine: EngineKind::Remote,
                confidence: answer::remote_confidence(!outcome.results.is_empty(), outcome.tier),
                auto_switched: false,
                fallback_reason: None,
            },
            Err(e) if options.mode == RoutingMode::Auto => {
                let switches = self.auto_switches.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, switches, "Remote engine failed, switching to local");
                Answer {
                    auto_switched: true,
                    fallback_reason: Some(format!("remote engine failed: {}", e)),
                    ..local
                }
            }
            Err(e) => {
                warn!(error = %e, "Pinned remote engine failed");
                Answer {
                    success: false,
                    text: answer::context_only_answer(&outcome.results),
                    engine: EngineKind::Remote,
                    confidence: answer::FAILED_REMOTE_CONFIDENCE,
                    auto_switched: false,
                    fallback_reason: Some(format!("remote engine failed: {}", e)),
                }
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let Some(remote) = self.remote.as_deref() else {
            return Err(RagError::RouterMisconfiguration(
                "no remote engine is configured".to_string(),
            ));
        };

        let timeout = self.config.remote.generation_timeout();
        tokio::time::timeout(timeout, remote.generate(prompt))
            .await
            .map_err(|_| RagError::Network(format!("Remote generation timed out after {:?}", timeout)))?
    }

    async fn fetch_context(&self, query: &str, wanted: bool) -> ContextSnippets {
        let Some(supplier) = self.context_supplier.as_deref().filter(|_| wanted) else {
            return ContextSnippets::default();
        };

        match supplier.query_context(query).await {
            Ok(snippets) => {
                debug!(
                    "External context: {} snippets, {} chars",
                    snippets.snippets.len(),
                    snippets.char_count()
                );
                snippets
            }
            Err(e) => {
                warn!(error = %e, "External context unavailable");
                ContextSnippets::default()
            }
        }
    }

    async fn log_query(&self, query: &str, mode: RoutingMode, response: &QueryResponse) {
        let Some(log) = &self.query_log else {
            return;
        };

        let entry = NewQueryLogEntry {
            query: query.to_string(),
            response: response.response.clone(),
            mode: mode.as_str().to_string(),
            engine: response.engine.as_str().to_string(),
            confidence: f64::from(response.confidence),
            processing_time_ms: i64::try_from(response.processing_time_ms).unwrap_or(i64::MAX),
            cached: response.metadata.cached,
            auto_switched: response.metadata.auto_switched,
            search_tier: response.metadata.search_tier.map(|t| t.as_str().to_string()),
            success: response.success,
        };
        if let Err(e) = log.record(&entry).await {
            warn!(error = %e, "Failed to record query in the interaction log");
        }
    }

    /// Embed and store one document. Returns `false` when storage fails.
    #[inline]
    pub async fn index_document(
        &self,
        id: &str,
        content: &str,
        metadata: DocumentMetadata,
    ) -> Result<bool> {
        if id.trim().is_empty() {
            return Err(RagError::InvalidInput("Document id is empty".to_string()));
        }
        if content.trim().is_empty() {
            return Err(RagError::InvalidInput(format!(
                "Document {} has empty content",
                id
            )));
        }

        let embedding = self
            .embeddings
            .create_embedding(content, EmbeddingOptions::default())
            .await?;
        let document = crate::database::Document {
            id: id.trim().to_string(),
            content: content.to_string(),
            embedding,
            metadata,
        };

        match self.store.add_document(&document).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_caller_error() => Err(e),
            Err(e) => {
                warn!(error = %e, id, "Failed to index document");
                Ok(false)
            }
        }
    }

    #[inline]
    pub async fn bulk_index(&self, documents: Vec<DocumentInput>) -> IndexSummary {
        self.bulk_index_with_progress(documents, |_| {}).await
    }

    /// Bulk index, calling `on_batch` after every batch
    #[inline]
    pub async fn bulk_index_with_progress<F>(
        &self,
        documents: Vec<DocumentInput>,
        on_batch: F,
    ) -> IndexSummary
    where
        F: FnMut(&BatchReport) + Send,
    {
        self.indexer
            .index(&self.store, &self.embeddings, documents, on_batch)
            .await
    }

    #[inline]
    pub async fn get_document(&self, id: &str) -> Result<Option<StoredDocument>> {
        self.store.get_document(id).await
    }

    #[inline]
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        self.store.delete_document(id).await
    }

    #[inline]
    pub async fn update_metadata(&self, id: &str, metadata: &DocumentMetadata) -> Result<bool> {
        self.store.update_metadata(id, metadata).await
    }

    /// Remove every document and drop all cached state
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await?;
        self.cache.clear_all();
        Ok(())
    }

    #[inline]
    pub async fn store_stats(&self) -> Result<StoreStats> {
        self.store.get_stats().await
    }

    #[inline]
    pub async fn health_check(&self) -> HealthReport {
        let (vector_store_up, document_count) = match self.store.get_stats().await {
            Ok(stats) => (true, stats.count),
            Err(e) => {
                warn!(error = %e, "Vector store health check failed");
                (false, 0)
            }
        };

        HealthReport {
            status: if vector_store_up {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            vector_store_up,
            document_count,
            cache_size: self.cache.stats().total_entries(),
            remote_configured: self.remote.is_some(),
        }
    }

    #[inline]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            auto_switches: self.auto_switches.load(Ordering::Relaxed),
            cache: self.cache.stats(),
            embeddings: self.embeddings.stats(),
        }
    }
}

fn response_cache_key(mode: RoutingMode, query: &str, category: Option<&str>) -> CacheKey {
    let normalized = morphology::normalize(query).to_lowercase();
    CacheKey::from_parts(&[
        b"response".as_slice(),
        mode.as_str().as_bytes(),
        category.unwrap_or("").as_bytes(),
        normalized.as_bytes(),
    ])
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
