use super::*;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::Ollama);
    assert_eq!(config.embedding.protocol, "http");
    assert_eq!(config.embedding.host, "localhost");
    assert_eq!(config.embedding.port, 11434);
    assert_eq!(config.embedding.model, "nomic-embed-text:latest");
    assert_eq!(config.embedding.batch_size, 16);
    assert_eq!(config.generation.model, "llama3.1-8b");
    assert!((config.generation.temperature - 0.7).abs() < f32::EPSILON);
    assert!((config.generation.top_p - 0.8).abs() < f32::EPSILON);
    assert_eq!(config.generation.max_completion_tokens, 2000);
    assert_eq!(config.store.collection, "granthX");
    assert_eq!(config.retrieval.top_k, 3);
    assert_eq!(config.server.port, 5000);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.embedding.protocol = "ftp".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidProtocol(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.embedding.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.model = String::new();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidModel(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.embedding.batch_size = 1001;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidBatchSize(1001))
    ));

    let mut invalid_config = config.clone();
    invalid_config.store.collection = " ".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidCollection(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.retrieval.top_k = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTopK(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.server.port = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidPort(0))
    ));

    let mut invalid_config = config;
    invalid_config.browser.max_tabs = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTabLimit(0))
    ));
}

#[test]
fn generation_validation() {
    let config = GenerationConfig::default();
    assert!(config.validate().is_ok());

    let invalid = GenerationConfig {
        temperature: 2.5,
        ..config.clone()
    };
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::InvalidTemperature(_))
    ));

    let invalid = GenerationConfig {
        top_p: 0.0,
        ..config.clone()
    };
    assert!(matches!(invalid.validate(), Err(ConfigError::InvalidTopP(_))));

    let invalid = GenerationConfig {
        max_completion_tokens: 0,
        ..config.clone()
    };
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::InvalidMaxTokens(0))
    ));

    let invalid = GenerationConfig {
        base_url: "not a url".to_string(),
        ..config.clone()
    };
    assert!(matches!(invalid.validate(), Err(ConfigError::InvalidUrl(_))));

    let invalid = GenerationConfig {
        api_key_env: String::new(),
        ..config
    };
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::InvalidApiKeyEnv(_))
    ));
}

#[test]
fn chunking_validation() {
    let mut config = Config::default();
    config.chunking.chunk_overlap = config.chunking.max_chunk_size;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidOverlapSize(3000, 3000))
    ));

    let mut config = Config::default();
    config.chunking.max_chunk_size = 50;
    config.chunking.chunk_overlap = 10;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidMaxChunkSize(50))
    ));
}

#[test]
fn embedding_url_generation() {
    let config = Config::default();
    let url = config
        .embedding
        .endpoint_url()
        .expect("should generate endpoint url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn https_url_generation() {
    let mut config = Config::default();
    config.embedding.protocol = "https".to_string();
    config.embedding.host = "secure.example.com".to_string();
    config.embedding.port = 443;

    let url = config
        .embedding
        .endpoint_url()
        .expect("should generate https url successfully");
    assert_eq!(url.as_str(), "https://secure.example.com/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn provider_names_are_lowercase() {
    let parsed: Config = toml::from_str(
        r#"
            [embedding]
            provider = "openai"
            model = "text-embedding-3-large"

            [store]
            backend = "memory"
        "#,
    )
    .expect("should parse toml correctly");

    assert_eq!(parsed.embedding.provider, EmbeddingProviderKind::OpenAi);
    assert_eq!(parsed.embedding.provider.to_string(), "openai");
    assert_eq!(parsed.store.backend, StoreBackend::Memory);
    assert_eq!(parsed.embedding.port, 11434);
}

#[test]
fn setter_validation() {
    let mut config = EmbeddingConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_model("new-model".to_string()).is_ok());
    assert!(config.set_batch_size(128).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_model(String::new()).is_err());
    assert!(config.set_batch_size(0).is_err());
    assert!(config.set_batch_size(1001).is_err());

    assert_eq!(config.protocol, "https");
    assert_eq!(config.port, 8080);
    assert_eq!(config.batch_size, 128);
}

#[test]
fn vector_path_resolution() {
    let mut config = Config {
        base_dir: PathBuf::from("/srv/granthx"),
        ..Default::default()
    };
    assert_eq!(
        config.vector_database_path(),
        PathBuf::from("/srv/granthx/vectors")
    );

    config.store.path = Some(PathBuf::from("data/lance"));
    assert_eq!(
        config.vector_database_path(),
        PathBuf::from("/srv/granthx/data/lance")
    );

    config.store.path = Some(PathBuf::from("/var/lib/granthx"));
    assert_eq!(
        config.vector_database_path(),
        PathBuf::from("/var/lib/granthx")
    );
}

#[test]
fn port_override() {
    let mut config = Config::default();

    config
        .apply_port_override("8080")
        .expect("should accept port");
    assert_eq!(config.server.port, 8080);

    assert!(matches!(
        config.apply_port_override("eighty"),
        Err(ConfigError::InvalidPortOverride(_))
    ));
    assert!(matches!(
        config.apply_port_override("0"),
        Err(ConfigError::InvalidPort(0))
    ));
    assert_eq!(config.server.port, 8080);
}

#[test]
#[serial]
fn load_missing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: serialized with the other environment-mutating tests
    unsafe { std::env::remove_var("PORT") };

    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.embedding, EmbeddingConfig::default());
    assert_eq!(config.store, StoreConfig::default());
}

#[test]
#[serial]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: serialized with the other environment-mutating tests
    unsafe { std::env::remove_var("PORT") };

    let mut config = Config {
        base_dir: temp_dir.path().join("nested"),
        ..Default::default()
    };
    config.embedding.model = "mxbai-embed-large".to_string();
    config.retrieval.top_k = 5;
    config.save().expect("should save config");

    let loaded = Config::load(temp_dir.path().join("nested")).expect("should reload config");
    assert_eq!(loaded, config);
}

#[test]
#[serial]
fn load_applies_port_environment() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: serialized with the other environment-mutating tests
    unsafe { std::env::set_var("PORT", "7070") };

    let result = Config::load(temp_dir.path());

    // SAFETY: serialized with the other environment-mutating tests
    unsafe { std::env::remove_var("PORT") };
    let config = result.expect("should load config");
    assert_eq!(config.server.port, 7070);
}

#[test]
#[serial]
fn invalid_file_is_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: serialized with the other environment-mutating tests
    unsafe { std::env::remove_var("PORT") };
    fs::write(
        temp_dir.path().join("config.toml"),
        "[retrieval]\ntop_k = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}
