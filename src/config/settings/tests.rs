use super::*;
use serial_test::serial;
use std::collections::HashMap;
use tempfile::TempDir;

fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.embedding.dimension, 384);
    assert_eq!(config.embedding.max_input_chars, 2000);
    assert!(!config.embedding.use_local);
    assert_eq!(config.search.top_k, 5);
    assert!(config.search.keyword_fallback);
    assert_eq!(config.cache.embedding_capacity, 1000);
    assert_eq!(config.cache.embedding_ttl(), Duration::from_secs(10_800));
    assert_eq!(config.remote.generation_model, "gemini-2.5-flash-lite");
    assert!(config.remote.api_key.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.embedding.dimension = 4;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.remote.base_url = "ftp://example.com".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.remote.retry_attempts = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.search.threshold = 1.5;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.router.threshold = 100.0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.cache.search_ttl_seconds = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidCacheTtl("search", 0))
    ));

    let mut invalid_config = config;
    invalid_config.indexing.batch_size = 1001;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn setter_validation() {
    let mut config = Config::default();

    assert!(config.embedding.set_dimension(768).is_ok());
    assert!(config.embedding.set_dimension(0).is_err());
    assert_eq!(config.embedding.dimension, 768);

    assert!(
        config
            .remote
            .set_base_url("https://api.example.com".to_string())
            .is_ok()
    );
    assert!(config.remote.set_base_url("not a url".to_string()).is_err());
    assert_eq!(config.remote.base_url, "https://api.example.com");

    assert!(config.router.set_threshold(45.0).is_ok());
    assert!(config.router.set_threshold(0.0).is_err());

    assert!(config.indexing.set_batch_size(25).is_ok());
    assert!(config.indexing.set_batch_size(0).is_err());

    assert!(config.remote.set_generation_model("  ".to_string()).is_err());
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [router]
        threshold = 50.0

        [search]
        top_k = 8
        "#,
    )
    .expect("should parse partial toml");

    assert!((parsed.router.threshold - 50.0).abs() < f32::EPSILON);
    assert!((parsed.router.auto_min_confidence - 0.15).abs() < f32::EPSILON);
    assert_eq!(parsed.search.top_k, 8);
    assert_eq!(parsed.embedding, EmbeddingConfig::default());
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.embedding, EmbeddingConfig::default());
}

#[test]
fn save_and_load_roundtrip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::load(temp_dir.path()).expect("should load defaults");
    config.router.threshold = 42.0;
    config.indexing.batch_delay_ms = 250;
    config.save().expect("should save config");

    assert!(config.config_file_path().exists());

    let loaded = Config::load(temp_dir.path()).expect("should load saved config");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[embedding]\ndimension = 2\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn paths_are_under_base_dir() {
    let config = Config {
        base_dir: PathBuf::from("/tmp/infra-rag-test"),
        ..Config::default()
    };

    assert_eq!(
        config.vector_database_path(),
        PathBuf::from("/tmp/infra-rag-test/vectors")
    );
    assert_eq!(
        config.query_log_path(),
        PathBuf::from("/tmp/infra-rag-test/query_log.db")
    );
}

#[test]
fn env_overrides_flags_and_credential() {
    let mut config = Config::default();
    config
        .apply_env_overrides(lookup_from(&[
            (ENV_USE_LOCAL_EMBEDDINGS, "true"),
            (ENV_KEYWORD_SEARCH_FALLBACK, "0"),
            (DEFAULT_API_KEY_ENV, "  secret-key  "),
        ]))
        .expect("should apply overrides");

    assert!(config.embedding.use_local);
    assert!(!config.search.keyword_fallback);
    assert!(config.has_remote_credential());
    assert_eq!(
        config.remote.api_key.as_ref().map(Credential::expose),
        Some("secret-key")
    );
}

#[test]
fn blank_credential_counts_as_absent() {
    let mut config = Config::default();
    config
        .apply_env_overrides(lookup_from(&[(DEFAULT_API_KEY_ENV, "   ")]))
        .expect("should apply overrides");

    assert!(!config.has_remote_credential());
    assert!(config.search.keyword_fallback);
}

#[test]
fn invalid_env_flag_is_rejected() {
    let mut config = Config::default();
    let result = config.apply_env_overrides(lookup_from(&[(ENV_USE_LOCAL_EMBEDDINGS, "maybe")]));

    assert!(matches!(result, Err(ConfigError::InvalidEnvFlag { .. })));
}

#[test]
fn credential_debug_is_redacted() {
    let credential = Credential::new("super-secret");
    assert_eq!(format!("{:?}", credential), "Credential(***)");
}

#[test]
#[serial]
fn load_with_env_reads_process_environment() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    // SAFETY: serialized with every other test that touches the environment
    unsafe {
        std::env::set_var(ENV_USE_LOCAL_EMBEDDINGS, "yes");
    }
    let config = Config::load_with_env(temp_dir.path()).expect("should load config");
    // SAFETY: see above
    unsafe {
        std::env::remove_var(ENV_USE_LOCAL_EMBEDDINGS);
    }

    assert!(config.embedding.use_local);
}
