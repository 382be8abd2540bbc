use super::*;
use crate::config::{CacheConfig, Config};
use crate::database::MemoryDocumentStore;
use async_trait::async_trait;

const DIMENSION: usize = 3;

fn create_test_config() -> Config {
    let mut config = Config::default();
    config.embedding.dimension = DIMENSION;
    config
}

fn create_store(backend: Arc<dyn DocumentBackend>, config: &Config) -> (VectorStore, Arc<CacheLayer>) {
    let cache = Arc::new(CacheLayer::new(&CacheConfig::default()));
    let store = VectorStore::new(backend, Arc::clone(&cache), MorphologyAnalyzer::new(), config);
    (store, cache)
}

fn document(id: &str, content: &str, embedding: Vec<f32>) -> Document {
    Document {
        id: id.to_string(),
        content: content.to_string(),
        embedding,
        metadata: DocumentMetadata::default(),
    }
}

fn request<'a>(query_text: &'a str, vector: Option<&'a [f32]>) -> SearchRequest<'a> {
    SearchRequest {
        query_text,
        vector,
        options: SearchOptions::default(),
    }
}

/// Backend whose every call fails
struct BrokenBackend;

#[async_trait]
impl DocumentBackend for BrokenBackend {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn upsert(&self, _document: &Document) -> Result<()> {
        Err(RagError::Database("offline".to_string()))
    }

    async fn upsert_batch(&self, _documents: &[Document]) -> Result<()> {
        Err(RagError::Database("offline".to_string()))
    }

    async fn similarity_search(&self, _query: SimilarityQuery<'_>) -> Result<Vec<SearchResult>> {
        Err(RagError::VectorSearch("offline".to_string()))
    }

    async fn text_search(
        &self,
        _pattern: &str,
        _limit: usize,
        _category: Option<&str>,
    ) -> Result<Vec<StoredDocument>> {
        Err(RagError::Database("offline".to_string()))
    }

    async fn get(&self, _id: &str) -> Result<Option<StoredDocument>> {
        Err(RagError::Database("offline".to_string()))
    }

    async fn delete(&self, _id: &str) -> Result<bool> {
        Err(RagError::Database("offline".to_string()))
    }

    async fn update_metadata(&self, _id: &str, _metadata: &DocumentMetadata) -> Result<bool> {
        Err(RagError::Database("offline".to_string()))
    }

    async fn stats(&self) -> Result<StoreStats> {
        Err(RagError::Database("offline".to_string()))
    }

    async fn clear(&self) -> Result<()> {
        Err(RagError::Database("offline".to_string()))
    }
}

#[test]
fn cosine_similarity_bounds() {
    let same = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).expect("same length");
    assert!((same - 1.0).abs() < 1e-6);

    let opposite = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).expect("same length");
    assert!((opposite + 1.0).abs() < 1e-6);

    let orthogonal = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).expect("same length");
    assert!(orthogonal.abs() < 1e-6);
}

#[test]
fn cosine_similarity_zero_vector_is_zero() {
    let similarity = cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).expect("same length");
    assert!(similarity.abs() < f32::EPSILON);
}

#[test]
fn cosine_similarity_rejects_mismatch() {
    assert!(matches!(
        cosine_similarity(&[1.0], &[1.0, 2.0]),
        Err(RagError::VectorSearch(_))
    ));
}

#[tokio::test]
async fn vector_tier_filters_threshold_and_caches() {
    let config = create_test_config();
    let (store, cache) = create_store(Arc::new(MemoryDocumentStore::new()), &config);
    store
        .add_documents(&[
            document("close", "CPU 부하 대응", vec![1.0, 0.1, 0.0]),
            document("far", "디스크 정리", vec![-1.0, 0.0, 0.0]),
        ])
        .await
        .expect("should index");

    let vector = [1.0, 0.0, 0.0];
    let outcome = store.search(&request("cpu", Some(&vector))).await;

    assert!(outcome.success);
    assert_eq!(outcome.tier, SearchTier::Vector);
    assert!(!outcome.cached);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].id, "close");
    assert_eq!(cache.stats().search.size, 1);

    let again = store.search(&request("cpu", Some(&vector))).await;
    assert!(again.cached);
    assert_eq!(again.results, outcome.results);
}

#[tokio::test]
async fn writes_invalidate_search_cache() {
    let config = create_test_config();
    let (store, cache) = create_store(Arc::new(MemoryDocumentStore::new()), &config);
    store
        .add_document(&document("a", "서버 상태", vec![1.0, 0.0, 0.0]))
        .await
        .expect("should index");

    store.search(&request("서버", Some(&[1.0, 0.0, 0.0]))).await;
    assert_eq!(cache.stats().search.size, 1);

    store
        .update_metadata("a", &DocumentMetadata::with_category("server"))
        .await
        .expect("should update");
    assert_eq!(cache.stats().search.size, 0);
}

#[tokio::test]
async fn invalid_documents_are_rejected() {
    let config = create_test_config();
    let (store, _cache) = create_store(Arc::new(MemoryDocumentStore::new()), &config);

    for bad in [
        document("", "content", vec![1.0, 0.0, 0.0]),
        document("id", "  ", vec![1.0, 0.0, 0.0]),
        document("id", "content", vec![1.0]),
    ] {
        assert!(matches!(
            store.add_document(&bad).await,
            Err(RagError::InvalidInput(_))
        ));
    }
    assert_eq!(store.get_stats().await.expect("should count").count, 0);
}

#[tokio::test]
async fn below_threshold_falls_back_to_keywords() {
    let config = create_test_config();
    let (store, cache) = create_store(Arc::new(MemoryDocumentStore::new()), &config);
    store
        .add_documents(&[
            document("mem", "메모리 누수 점검 절차", vec![0.0, 0.0, 1.0]),
            document("other", "배포 체크리스트", vec![0.0, 0.0, 1.0]),
        ])
        .await
        .expect("should index");

    let outcome = store
        .search(&request("메모리 사용량", Some(&[1.0, 0.0, 0.0])))
        .await;

    assert_eq!(outcome.tier, SearchTier::Keyword);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].id, "mem");
    assert!(outcome.results[0].similarity >= 0.6);
    assert!(outcome.degraded_reason.is_some());
    assert_eq!(cache.stats().search.size, 0);
}

#[tokio::test]
async fn failing_backend_falls_through_to_catalogue() {
    let config = create_test_config();
    let (store, _cache) = create_store(Arc::new(BrokenBackend), &config);

    let outcome = store
        .search(&request("메모리 부족", Some(&[1.0, 0.0, 0.0])))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.tier, SearchTier::Catalogue);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].id, "catalogue-memory");
    let reason = outcome.degraded_reason.expect("should explain fallback");
    assert!(reason.contains("vector search failed"));
    assert!(reason.contains("keyword search failed"));
}

#[tokio::test]
async fn disabled_keyword_fallback_goes_to_catalogue() {
    let mut config = create_test_config();
    config.search.keyword_fallback = false;
    let (store, _cache) = create_store(Arc::new(MemoryDocumentStore::new()), &config);
    store
        .add_document(&document("mem", "메모리 누수 점검", vec![0.0, 0.0, 1.0]))
        .await
        .expect("should index");

    let outcome = store
        .search(&request("메모리", Some(&[1.0, 0.0, 0.0])))
        .await;
    assert_eq!(outcome.tier, SearchTier::Catalogue);
}

#[tokio::test]
async fn cpu_query_on_empty_store_ranks_cpu_entry_first() {
    let config = create_test_config();
    let (store, _cache) = create_store(Arc::new(MemoryDocumentStore::new()), &config);

    let outcome = store
        .search(&request("CPU 사용률이 높은 서버", Some(&[1.0, 0.0, 0.0])))
        .await;

    assert_eq!(outcome.tier, SearchTier::Catalogue);
    assert_eq!(outcome.results[0].id, "catalogue-cpu");
    assert!((outcome.results[0].similarity - 0.6).abs() < 1e-6);
    assert!((outcome.results[1].similarity - 0.5).abs() < 1e-6);
    assert_eq!(
        outcome.results[0].metadata.source.as_deref(),
        Some(catalogue::CATALOGUE_SOURCE)
    );
}

#[test]
fn catalogue_similarity_has_floor() {
    let results = catalogue::lookup(
        "cpu memory disk network database log server alert",
        8,
    );
    assert_eq!(results.len(), 8);
    assert!((results[4].similarity - 0.2).abs() < 1e-6);
    assert!((results[5].similarity - 0.1).abs() < 1e-6);
    assert!((results[7].similarity - 0.1).abs() < 1e-6);
}

#[test]
fn catalogue_drops_entries_without_keyword_overlap() {
    assert!(catalogue::lookup("아무 관련 없는 질문", 8).is_empty());

    let results = catalogue::lookup("디스크 용량 부족", 5);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "catalogue-disk");
}

#[tokio::test]
async fn unrelated_query_on_failing_backend_yields_empty_catalogue() {
    let config = create_test_config();
    let (store, _cache) = create_store(Arc::new(BrokenBackend), &config);

    let outcome = store
        .search(&request("hello world", Some(&[1.0, 0.0, 0.0])))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.tier, SearchTier::Catalogue);
    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn missing_vector_skips_vector_tier() {
    let config = create_test_config();
    let (store, _cache) = create_store(Arc::new(MemoryDocumentStore::new()), &config);

    let outcome = store.search(&request("디스크", None)).await;
    assert_eq!(outcome.tier, SearchTier::Catalogue);
    assert_eq!(outcome.results[0].id, "catalogue-disk");
    assert!(
        outcome
            .degraded_reason
            .expect("should explain")
            .starts_with("no query vector")
    );
}

#[tokio::test]
async fn document_management_roundtrip() {
    let config = create_test_config();
    let (store, _cache) = create_store(Arc::new(MemoryDocumentStore::new()), &config);
    store
        .add_document(&document("a", "로그 보관 정책", vec![0.0, 1.0, 0.0]))
        .await
        .expect("should index");

    let fetched = store
        .get_document("a")
        .await
        .expect("should read")
        .expect("should exist");
    assert_eq!(fetched.content, "로그 보관 정책");

    assert!(store.delete_document("a").await.expect("should delete"));
    assert!(store.get_document("a").await.expect("should read").is_none());

    store
        .add_document(&document("b", "x", vec![0.0, 1.0, 0.0]))
        .await
        .expect("should index");
    store.clear().await.expect("should clear");
    assert_eq!(store.get_stats().await.expect("should count").count, 0);
}
