use std::time::Duration;

use super::*;
use crate::database::sqlite::QueryLog;
use crate::remote::testing::ScriptedRemote;

const COMPLEX_QUERY: &str = "지난 주 CPU 사용률 추세를 분석하고 메모리 사용량과의 상관관계를 비교해서 원인을 설명해줘. 그리고 최적화 전략도 추천해줘";

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

fn create_test_config() -> Config {
    let mut config = Config::default();
    config.embedding.dimension = 64;
    config.indexing.batch_delay_ms = 0;
    config
}

fn local_engine() -> RetrievalEngine {
    RetrievalEngine::builder(create_test_config())
        .build()
        .expect("should build engine")
}

fn engine_with_remote(remote: Arc<ScriptedRemote>) -> RetrievalEngine {
    RetrievalEngine::builder(create_test_config())
        .remote(remote)
        .build()
        .expect("should build engine")
}

/// Enough prior conversation to push the complex query over the threshold
fn long_conversation() -> Vec<String> {
    vec!["가".repeat(2500)]
}

struct FixedContext(Vec<String>);

#[async_trait::async_trait]
impl ContextSupplier for FixedContext {
    async fn query_context(&self, _query: &str) -> Result<ContextSnippets> {
        Ok(ContextSnippets {
            snippets: self.0.clone(),
        })
    }
}

struct FailingContext;

#[async_trait::async_trait]
impl ContextSupplier for FailingContext {
    async fn query_context(&self, _query: &str) -> Result<ContextSnippets> {
        Err(RagError::Network("metrics endpoint down".to_string()))
    }
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let engine = local_engine();

    let result = engine.query("   ", &QueryOptions::default()).await;

    assert!(matches!(result, Err(RagError::InvalidInput(_))));
    assert_eq!(engine.stats().total_queries, 0);
}

#[tokio::test]
async fn zero_max_results_is_rejected() {
    let engine = local_engine();
    let options = QueryOptions {
        max_results: 0,
        ..QueryOptions::default()
    };

    let result = engine.query("서버 상태", &options).await;

    assert!(matches!(result, Err(RagError::InvalidInput(_))));
}

#[tokio::test]
async fn remote_mode_without_remote_engine_is_misconfiguration() {
    let engine = local_engine();
    let options = QueryOptions {
        mode: RoutingMode::Remote,
        ..QueryOptions::default()
    };

    let result = engine.query("서버 상태", &options).await;

    assert!(matches!(result, Err(RagError::RouterMisconfiguration(_))));
}

#[tokio::test]
async fn local_query_on_empty_store_uses_cpu_catalogue_entry() {
    init_test_tracing();
    let engine = local_engine();
    let options = QueryOptions {
        mode: RoutingMode::Local,
        ..QueryOptions::default()
    };

    let response = engine
        .query("CPU 사용률이 높은 서버", &options)
        .await
        .expect("should answer");

    assert!(response.success);
    assert_eq!(response.engine, EngineKind::Local);
    assert_eq!(response.metadata.search_tier, Some(SearchTier::Catalogue));
    let first = response.metadata.sources.first().expect("should have sources");
    assert_eq!(first.id, "catalogue-cpu");
    assert!(response.response.contains("CPU"));
    assert!(response.metadata.fallback_reason.is_some());
    assert!(response.confidence > 0.0 && response.confidence < 0.95);
}

#[tokio::test]
async fn local_answer_uses_indexed_documents() {
    let engine = local_engine();
    engine
        .index_document(
            "disk-cleanup",
            "디스크 용량 부족 시 오래된 로그 파일을 삭제하고 임시 디렉터리를 정리하세요",
            DocumentMetadata::with_category("disk"),
        )
        .await
        .expect("should index");
    let options = QueryOptions {
        mode: RoutingMode::Local,
        threshold: 0.0,
        ..QueryOptions::default()
    };

    let response = engine
        .query("디스크 용량 부족 시 오래된 로그 파일을 삭제하고 임시 디렉터리를 정리하세요", &options)
        .await
        .expect("should answer");

    assert_eq!(response.metadata.search_tier, Some(SearchTier::Vector));
    assert_eq!(response.metadata.sources[0].id, "disk-cleanup");
    assert!(response.response.contains("디스크 용량 부족"));
    assert_eq!(response.metadata.embedding_origin, Some(EmbeddingOrigin::Local));
    assert!(response.confidence > 0.85);
}

#[tokio::test]
async fn repeated_query_is_served_from_response_cache() {
    let engine = local_engine();
    let options = QueryOptions {
        mode: RoutingMode::Local,
        ..QueryOptions::default()
    };

    let first = engine.query("메모리 누수 확인", &options).await.expect("should answer");
    let second = engine
        .query("  메모리   누수 확인 ", &options)
        .await
        .expect("should answer");

    assert!(!first.metadata.cached);
    assert!(second.metadata.cached);
    assert_eq!(first.response, second.response);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(engine.stats().total_queries, 2);
}

#[tokio::test]
async fn cache_can_be_bypassed() {
    let engine = local_engine();
    let options = QueryOptions {
        mode: RoutingMode::Local,
        use_cache: false,
        ..QueryOptions::default()
    };

    engine.query("메모리 누수 확인", &options).await.expect("should answer");
    let second = engine.query("메모리 누수 확인", &options).await.expect("should answer");

    assert!(!second.metadata.cached);
    assert_eq!(engine.stats().cache.responses.size, 0);
}

#[tokio::test]
async fn remote_failure_in_auto_mode_switches_to_local_once() {
    init_test_tracing();
    let remote = Arc::new(ScriptedRemote::failing());
    let engine = engine_with_remote(Arc::clone(&remote));
    let options = QueryOptions {
        conversation: long_conversation(),
        ..QueryOptions::default()
    };

    let response = engine.query(COMPLEX_QUERY, &options).await.expect("should answer");

    assert!(response.success);
    assert_eq!(response.engine, EngineKind::Local);
    assert!(response.metadata.auto_switched);
    assert!(response.metadata.fallback_reason.is_some());
    assert_eq!(engine.stats().auto_switches, 1);
    assert_eq!(ScriptedRemote::calls(&remote.generate_calls), 1);
    // an auto-switched answer is not cached
    assert_eq!(engine.stats().cache.responses.size, 0);
}

#[tokio::test]
async fn simple_auto_query_stays_local_without_calling_remote() {
    let remote = Arc::new(ScriptedRemote::answering("원격 답변"));
    let engine = engine_with_remote(Arc::clone(&remote));

    let response = engine
        .query("서버 상태", &QueryOptions::default())
        .await
        .expect("should answer");

    assert_eq!(response.engine, EngineKind::Local);
    assert!(!response.metadata.auto_switched);
    assert_eq!(ScriptedRemote::calls(&remote.generate_calls), 0);
    assert_eq!(engine.stats().auto_switches, 0);
}

#[tokio::test]
async fn pinned_remote_answer_is_cached() {
    let remote = Arc::new(ScriptedRemote::answering("원격 엔진의 분석 결과입니다"));
    let engine = engine_with_remote(Arc::clone(&remote));
    let options = QueryOptions {
        mode: RoutingMode::Remote,
        ..QueryOptions::default()
    };

    let first = engine.query("서버 상태", &options).await.expect("should answer");
    let second = engine.query("서버 상태", &options).await.expect("should answer");

    assert!(first.success);
    assert_eq!(first.engine, EngineKind::Remote);
    assert_eq!(first.response, "원격 엔진의 분석 결과입니다");
    assert_eq!(first.metadata.embedding_origin, Some(EmbeddingOrigin::Remote));
    assert!(second.metadata.cached);
    assert_eq!(second.engine, EngineKind::Remote);
    assert_eq!(ScriptedRemote::calls(&remote.generate_calls), 1);
}

#[tokio::test]
async fn pinned_remote_failure_returns_unsuccessful_low_confidence_answer() {
    let engine = engine_with_remote(Arc::new(ScriptedRemote::failing()));
    let options = QueryOptions {
        mode: RoutingMode::Remote,
        ..QueryOptions::default()
    };

    let response = engine.query("디스크 용량", &options).await.expect("should not error");

    assert!(!response.success);
    assert_eq!(response.engine, EngineKind::Remote);
    assert!((response.confidence - 0.1).abs() < f32::EPSILON);
    assert!(!response.response.is_empty());
    assert_eq!(engine.stats().auto_switches, 0);
    assert_eq!(engine.stats().cache.responses.size, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_remote_generation_times_out_and_switches() {
    let remote = Arc::new(ScriptedRemote {
        delay: Some(Duration::from_secs(120)),
        answer: "too late".to_string(),
        ..ScriptedRemote::default()
    });
    let engine = engine_with_remote(remote);
    let options = QueryOptions {
        conversation: long_conversation(),
        ..QueryOptions::default()
    };

    let response = engine.query(COMPLEX_QUERY, &options).await.expect("should answer");

    assert_eq!(response.engine, EngineKind::Local);
    assert!(response.metadata.auto_switched);
    assert_eq!(engine.stats().auto_switches, 1);
}

#[tokio::test]
async fn external_context_is_fetched_only_when_requested() {
    let engine = RetrievalEngine::builder(create_test_config())
        .context_supplier(Arc::new(FixedContext(vec![
            "web-01 CPU 92%".to_string(),
        ])))
        .build()
        .expect("should build engine");

    let without = engine
        .query("CPU 상태", &QueryOptions::default())
        .await
        .expect("should answer");
    let with = engine
        .query(
            "CPU 상태 확인",
            &QueryOptions {
                include_external_context: true,
                ..QueryOptions::default()
            },
        )
        .await
        .expect("should answer");

    assert!(!without.metadata.external_context_used);
    assert!(with.metadata.external_context_used);
}

#[tokio::test]
async fn failing_context_supplier_does_not_fail_query() {
    let engine = RetrievalEngine::builder(create_test_config())
        .context_supplier(Arc::new(FailingContext))
        .build()
        .expect("should build engine");
    let options = QueryOptions {
        include_external_context: true,
        ..QueryOptions::default()
    };

    let response = engine.query("네트워크 지연", &options).await.expect("should answer");

    assert!(response.success);
    assert!(!response.metadata.external_context_used);
}

#[tokio::test]
async fn server_status_embedding_is_deterministic_at_384_dimensions() {
    let mut config = Config::default();
    config.embedding.dimension = 384;
    let engine = RetrievalEngine::builder(config)
        .build()
        .expect("should build engine");

    let first = engine
        .embeddings()
        .create_embedding("서버 상태 확인", EmbeddingOptions::default())
        .await
        .expect("should embed");
    let second = engine
        .embeddings()
        .create_embedding("서버 상태 확인", EmbeddingOptions::local())
        .await
        .expect("should embed");

    assert_eq!(first.len(), 384);
    assert_eq!(first, second);
    let norm: f32 = first.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn index_document_rejects_blank_input() {
    let engine = local_engine();

    let blank_id = engine
        .index_document(" ", "내용", DocumentMetadata::default())
        .await;
    let blank_content = engine
        .index_document("doc", "  ", DocumentMetadata::default())
        .await;

    assert!(matches!(blank_id, Err(RagError::InvalidInput(_))));
    assert!(matches!(blank_content, Err(RagError::InvalidInput(_))));
}

#[tokio::test]
async fn indexing_invalidates_cached_search_results() {
    let engine = local_engine();
    let options = QueryOptions {
        mode: RoutingMode::Local,
        use_cache: false,
        threshold: -1.0,
        ..QueryOptions::default()
    };
    engine
        .index_document("first", "데이터베이스 커넥션 풀 설정", DocumentMetadata::default())
        .await
        .expect("should index");
    engine
        .query("데이터베이스 커넥션 풀 설정", &options)
        .await
        .expect("should answer");

    engine
        .index_document("second", "데이터베이스 커넥션 풀 설정 가이드", DocumentMetadata::default())
        .await
        .expect("should index");
    let response = engine
        .query("데이터베이스 커넥션 풀 설정", &options)
        .await
        .expect("should answer");

    assert_eq!(response.metadata.sources.len(), 2);
}

#[tokio::test]
async fn bulk_index_reports_counts() {
    let engine = local_engine();
    let documents = vec![
        DocumentInput::new("a", "CPU 사용률 경고 기준"),
        DocumentInput::new("b", ""),
        DocumentInput {
            id: None,
            content: "메모리 스왑 사용량 점검".to_string(),
            metadata: DocumentMetadata::default(),
        },
    ];

    let summary = engine.bulk_index(documents).await;

    assert_eq!(summary.indexed_count, 2);
    assert_eq!(summary.failed_count, 1);
    let stats = engine.store_stats().await.expect("should get stats");
    assert_eq!(stats.count, 2);
}

#[tokio::test]
async fn health_check_reports_store_and_cache() {
    let engine = local_engine();
    engine
        .index_document("doc", "로드밸런서 헬스체크 실패", DocumentMetadata::default())
        .await
        .expect("should index");

    let report = engine.health_check().await;

    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.vector_store_up);
    assert_eq!(report.document_count, 1);
    assert!(report.cache_size >= 1);
    assert!(!report.remote_configured);
}

/// Backend that stores nothing and cannot report stats
struct OfflineBackend;

#[async_trait::async_trait]
impl DocumentBackend for OfflineBackend {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn upsert(&self, _document: &crate::database::Document) -> Result<()> {
        Err(RagError::Database("offline".to_string()))
    }

    async fn upsert_batch(&self, _documents: &[crate::database::Document]) -> Result<()> {
        Err(RagError::Database("offline".to_string()))
    }

    async fn similarity_search(
        &self,
        _query: crate::database::SimilarityQuery<'_>,
    ) -> Result<Vec<crate::database::SearchResult>> {
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

#[tokio::test]
async fn health_check_is_unhealthy_when_store_is_down() {
    let engine = RetrievalEngine::builder(create_test_config())
        .backend(Arc::new(OfflineBackend))
        .build()
        .expect("should build engine");

    let report = engine.health_check().await;

    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert_eq!(report.status.as_str(), "unhealthy");
    assert!(!report.vector_store_up);
    assert_eq!(report.document_count, 0);
    let json = serde_json::to_value(&report).expect("should serialize");
    assert_eq!(json["status"], "unhealthy");
}

#[tokio::test]
async fn unrelated_query_on_offline_store_has_no_sources() {
    let engine = RetrievalEngine::builder(create_test_config())
        .backend(Arc::new(OfflineBackend))
        .build()
        .expect("should build engine");
    let options = QueryOptions {
        mode: RoutingMode::Local,
        ..QueryOptions::default()
    };

    let response = engine.query("hello world", &options).await.expect("should answer");

    assert!(response.success);
    assert_eq!(response.metadata.search_tier, Some(SearchTier::Catalogue));
    assert!(response.metadata.sources.is_empty());
    assert!((response.confidence - 0.3).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn cache_sweeper_expires_cached_responses() {
    let mut config = create_test_config();
    config.cache.response_ttl_seconds = 1;
    config.cache.sweep_interval_seconds = 1;
    let engine = RetrievalEngine::builder(config)
        .build()
        .expect("should build engine");
    let options = QueryOptions {
        mode: RoutingMode::Local,
        ..QueryOptions::default()
    };
    engine.query("디스크 용량 부족", &options).await.expect("should answer");
    assert_eq!(engine.stats().cache.responses.size, 1);

    let sweeper = engine.spawn_cache_sweeper();
    assert!(sweeper.is_running());
    tokio::time::sleep(Duration::from_secs(3)).await;

    let responses = engine.stats().cache.responses;
    assert_eq!(responses.size, 0);
    assert!(responses.expirations >= 1);
    sweeper.stop();
}

#[tokio::test]
async fn clear_removes_documents_and_cached_responses() {
    let engine = local_engine();
    let options = QueryOptions {
        mode: RoutingMode::Local,
        ..QueryOptions::default()
    };
    engine
        .index_document("doc", "알림 임계값 조정", DocumentMetadata::default())
        .await
        .expect("should index");
    engine.query("알림 임계값", &options).await.expect("should answer");

    engine.clear().await.expect("should clear");

    assert_eq!(engine.stats().cache.total_entries(), 0);
    let response = engine.query("알림 임계값", &options).await.expect("should answer");
    assert!(!response.metadata.cached);
    assert_eq!(
        response.metadata.sources.first().map(|s| s.id.starts_with("catalogue-")),
        Some(true)
    );
}

#[tokio::test]
async fn answered_queries_are_written_to_query_log() {
    let temp_dir = tempfile::TempDir::new().expect("should create temp dir");
    let log = QueryLog::new(temp_dir.path().join("query_log.db"))
        .await
        .expect("should open query log");
    let engine = RetrievalEngine::builder(create_test_config())
        .query_log(log)
        .build()
        .expect("should build engine");
    let options = QueryOptions {
        mode: RoutingMode::Local,
        ..QueryOptions::default()
    };

    engine.query("디스크 IOPS", &options).await.expect("should answer");
    engine.query("디스크 IOPS", &options).await.expect("should answer");

    let log = engine.query_log().expect("should have query log");
    let entries = log.recent(10).await.expect("should list entries");
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| e.cached));
    assert!(entries.iter().all(|e| e.engine == "local" && e.mode == "local"));
}

#[test]
fn invalid_config_is_rejected_by_builder() {
    let mut config = create_test_config();
    config.search.top_k = 0;

    let result = RetrievalEngine::builder(config).build();

    assert!(matches!(result, Err(RagError::Config(_))));
}

fn result(id: &str, content: &str, similarity: f32) -> crate::database::SearchResult {
    crate::database::SearchResult {
        id: id.to_string(),
        content: content.to_string(),
        similarity,
        metadata: DocumentMetadata::default(),
    }
}

#[test]
fn local_answer_without_results_uses_generic_details() {
    let text = answer::local_answer("보안 점검", IntentCategory::Security, &[]);

    assert!(text.contains("관련 정보를 수집하여 분석했습니다."));
    assert!(!text.contains("{details}"));
}

#[test]
fn local_answer_truncates_long_content_and_lists_sources() {
    let long = "가".repeat(300);
    let results = vec![
        result("top", &long, 0.9),
        result("second", "두 번째 문서", 0.8),
    ];

    let text = answer::local_answer("성능", IntentCategory::Performance, &results);

    assert!(text.contains(&format!("{}...", "가".repeat(200))));
    assert!(!text.contains(&"가".repeat(201)));
    assert!(text.contains("[second] 두 번째 문서"));
}

#[test]
fn local_answer_is_stable_for_equal_queries() {
    let results = vec![result("a", "내용", 0.7)];

    let first = answer::local_answer("장애 원인", IntentCategory::Troubleshooting, &results);
    let second = answer::local_answer("장애 원인", IntentCategory::Troubleshooting, &results);

    assert_eq!(first, second);
}

#[test]
fn every_intent_has_three_suggestions() {
    for intent in [
        IntentCategory::Performance,
        IntentCategory::Troubleshooting,
        IntentCategory::Monitoring,
        IntentCategory::Security,
        IntentCategory::Analysis,
        IntentCategory::General,
    ] {
        assert_eq!(answer::suggestions(intent).len(), 3, "{}", intent);
    }
    assert_eq!(
        answer::suggestions(IntentCategory::Performance)[0],
        "CPU 사용률 확인"
    );
}

#[test]
fn prompt_keeps_recent_conversation_and_all_sections() {
    let conversation: Vec<String> = (1..=6).map(|i| format!("turn-{}", i)).collect();
    let results = vec![result("doc", "캐시 히트율 저하", 0.82)];
    let context = vec!["redis-01 hit rate 41%".to_string()];

    let prompt = answer::build_prompt("캐시 문제 원인?", &results, &context, &conversation);

    assert!(!prompt.contains("turn-2"));
    assert!(prompt.contains("turn-3"));
    assert!(prompt.contains("turn-6"));
    assert!(prompt.contains("(0.82) 캐시 히트율 저하"));
    assert!(prompt.contains("redis-01 hit rate 41%"));
    assert!(prompt.ends_with("캐시 문제 원인?"));
}

#[test]
fn confidence_reflects_tier_and_degradation() {
    let vector = answer::local_confidence(Some(1.0), SearchTier::Vector, false);
    let keyword = answer::local_confidence(Some(1.0), SearchTier::Keyword, false);
    let degraded = answer::local_confidence(Some(1.0), SearchTier::Vector, true);

    assert!((vector - 0.9).abs() < 1e-6);
    assert!(keyword < vector);
    assert!(degraded < vector);
    assert!((answer::local_confidence(None, SearchTier::Catalogue, false) - 0.3).abs() < 1e-6);
    assert!((answer::remote_confidence(false, SearchTier::Vector) - 0.6).abs() < 1e-6);
}
