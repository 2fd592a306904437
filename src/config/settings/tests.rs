use super::*;
use std::collections::HashMap;
use tempfile::TempDir;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.gemini.embedding_model, "text-embedding-004");
    assert_eq!(config.gemini.max_attempts, 3);
    assert_eq!(config.chroma.host, "localhost");
    assert_eq!(config.chroma.port, 8000);
    assert_eq!(config.chat.max_context_documents, 5);
    assert_eq!(config.chat.allowed_metadata_keys, vec!["scope", "category"]);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid = config.clone();
    invalid.chat.temperature = 2.5;
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::InvalidTemperature(_))
    ));

    let mut invalid = config.clone();
    invalid.chat.temperature = f32::NAN;
    assert!(invalid.validate().is_err());

    let mut invalid = config.clone();
    invalid.chat.top_k = 0;
    assert!(matches!(invalid.validate(), Err(ConfigError::InvalidTopK(0))));

    let mut invalid = config.clone();
    invalid.chat.max_output_tokens = 8193;
    assert!(invalid.validate().is_err());

    let mut invalid = config.clone();
    invalid.chat.max_context_documents = 0;
    assert!(invalid.validate().is_err());

    let mut invalid = config.clone();
    invalid.chat.allowed_metadata_keys = vec!["scope".to_string(), "  ".to_string()];
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::InvalidMetadataKey(_))
    ));

    let mut invalid = config.clone();
    invalid.gemini.max_attempts = 0;
    assert!(invalid.validate().is_err());

    let mut invalid = config.clone();
    invalid.gemini.request_timeout_seconds = 0.0;
    assert!(invalid.validate().is_err());

    let mut invalid = config.clone();
    invalid.gemini.api_base_url = "ftp://example.com".to_string();
    assert!(matches!(invalid.validate(), Err(ConfigError::InvalidUrl(_))));

    let mut invalid = config.clone();
    invalid.chroma.port = 0;
    assert!(invalid.validate().is_err());

    let mut invalid = config;
    invalid.chroma.collection_name = String::new();
    assert!(invalid.validate().is_err());
}

#[test]
fn chroma_url_generation() {
    let mut chroma = ChromaConfig::default();
    let url = chroma.base_url().expect("should generate chroma url");
    assert_eq!(url.as_str(), "http://localhost:8000/");

    chroma.ssl = true;
    chroma.host = "chroma.internal".to_string();
    chroma.port = 443;
    let url = chroma.base_url().expect("should generate chroma url");
    assert_eq!(url.as_str(), "https://chroma.internal/");
}

#[test]
fn retry_policy_from_gemini_settings() {
    let gemini = GeminiConfig {
        max_attempts: 4,
        retry_backoff_seconds: 0.5,
        ..GeminiConfig::default()
    };
    let policy = gemini.retry_policy();
    assert_eq!(policy.max_attempts, 4);
    assert_eq!(policy.base_delay, Duration::from_millis(500));
    assert_eq!(gemini.request_timeout(), Duration::from_secs(60));
}

#[test]
fn oversized_durations_are_rejected() {
    let mut config = Config::default();
    config
        .apply_overrides(lookup_from(&[("GEMINI_REQUEST_TIMEOUT", "1e30")]))
        .expect("value parses");
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidTimeout(_))
    ));
    assert_eq!(
        config.gemini.request_timeout(),
        Duration::from_secs_f64(MAX_REQUEST_TIMEOUT_SECONDS)
    );

    let mut config = Config::default();
    config
        .apply_overrides(lookup_from(&[("GEMINI_RETRY_BACKOFF_SECONDS", "1e30")]))
        .expect("value parses");
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidBackoff(_))
    ));
    assert_eq!(
        config.gemini.retry_policy().base_delay,
        Duration::from_secs_f64(MAX_RETRY_BACKOFF_SECONDS)
    );

    let gemini = GeminiConfig {
        request_timeout_seconds: MAX_REQUEST_TIMEOUT_SECONDS,
        retry_backoff_seconds: MAX_RETRY_BACKOFF_SECONDS,
        ..GeminiConfig::default()
    };
    assert!(gemini.validate().is_ok());
}

#[test]
fn non_finite_durations_do_not_panic() {
    let gemini = GeminiConfig {
        request_timeout_seconds: f64::NAN,
        retry_backoff_seconds: f64::INFINITY,
        ..GeminiConfig::default()
    };
    assert!(gemini.validate().is_err());
    assert_eq!(gemini.request_timeout(), Duration::ZERO);
    assert_eq!(
        gemini.retry_policy().base_delay,
        Duration::from_secs_f64(MAX_RETRY_BACKOFF_SECONDS)
    );
}

#[test]
fn missing_api_key_is_reported() {
    let gemini = GeminiConfig::default();
    assert!(matches!(
        gemini.require_api_key(),
        Err(ConfigError::MissingApiKey)
    ));

    let gemini = GeminiConfig {
        api_key: " test-key ".to_string(),
        ..GeminiConfig::default()
    };
    assert_eq!(gemini.require_api_key().expect("key is set"), "test-key");
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
        [chat]
        top_k = 3
        allowed_metadata_keys = ["tag"]
        "#,
    )
    .expect("partial config should parse");

    assert_eq!(parsed.chat.top_k, 3);
    assert_eq!(parsed.chat.allowed_metadata_keys, vec!["tag"]);
    assert_eq!(parsed.chat.model, ChatConfig::default().model);
    assert_eq!(parsed.chroma, ChromaConfig::default());
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let config = Config::load(temp_dir.path()).expect("defaults load");

    assert_eq!(config.chat, ChatConfig::default());
    assert_eq!(config.base_dir, temp_dir.path());
}

#[test]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[chat]\ntemperature = 9.0\n",
    )
    .expect("write config");

    assert!(matches!(
        Config::load(temp_dir.path()),
        Err(ConfigError::InvalidTemperature(_))
    ));
}

#[test]
fn load_rejects_malformed_toml() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    fs::write(temp_dir.path().join("config.toml"), "[chat\ntop_k = ").expect("write config");

    assert!(matches!(
        Config::load(temp_dir.path()),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn overrides_apply_over_defaults() {
    let mut config = Config::default();
    config
        .apply_overrides(lookup_from(&[
            ("GOOGLE_API_KEY", "secret"),
            ("EMBEDDING_MODEL", "embed-test"),
            ("GEMINI_MAX_ATTEMPTS", "5"),
            ("GEMINI_RETRY_BACKOFF_SECONDS", "0"),
            ("CHROMA_HOST", "chroma"),
            ("CHROMA_PORT", "9000"),
            ("CHROMA_SSL", "true"),
            ("CHROMA_AUTH_TOKEN", "token"),
            ("CHAT_MODEL", "chat-test"),
            ("CHAT_TEMPERATURE", "0.7"),
            ("CHAT_TOP_K", "4"),
            ("CHAT_MAX_CONTEXT_DOCUMENTS", "2"),
            ("CHAT_SYSTEM_PROMPT_PATH", "/etc/rag/prompt.txt"),
        ]))
        .expect("overrides apply");

    assert_eq!(config.gemini.api_key, "secret");
    assert_eq!(config.gemini.embedding_model, "embed-test");
    assert_eq!(config.gemini.max_attempts, 5);
    assert!(config.gemini.retry_backoff_seconds.abs() < f64::EPSILON);
    assert_eq!(config.chroma.host, "chroma");
    assert_eq!(config.chroma.port, 9000);
    assert!(config.chroma.ssl);
    assert_eq!(config.chroma.auth_token.as_deref(), Some("token"));
    assert_eq!(config.chat.model, "chat-test");
    assert!((config.chat.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(config.chat.top_k, 4);
    assert_eq!(config.chat.max_context_documents, 2);
    assert_eq!(
        config.chat.system_prompt_path,
        Some(PathBuf::from("/etc/rag/prompt.txt"))
    );
    assert!(config.validate().is_ok());
}

#[test]
fn unparseable_override_is_an_error() {
    let mut config = Config::default();
    let result = config.apply_overrides(lookup_from(&[("CHAT_TOP_K", "many")]));

    match result {
        Err(ConfigError::InvalidEnvValue { name, value }) => {
            assert_eq!(name, "CHAT_TOP_K");
            assert_eq!(value, "many");
        }
        other => panic!("expected InvalidEnvValue, got {:?}", other),
    }

    let result = config.apply_overrides(lookup_from(&[("CHROMA_SSL", "maybe")]));
    assert!(result.is_err());
}

#[test]
fn metadata_keys_from_comma_string() {
    let keys = parse_metadata_keys("scope, category ,tag").expect("parses");
    assert_eq!(keys, vec!["scope", "category", "tag"]);
}

#[test]
fn metadata_keys_from_blank_string() {
    assert!(parse_metadata_keys("").expect("parses").is_empty());
    assert!(parse_metadata_keys("   ").expect("parses").is_empty());
}

#[test]
fn metadata_keys_from_json_array() {
    let keys = parse_metadata_keys(r#"["scope", "category"]"#).expect("parses");
    assert_eq!(keys, vec!["scope", "category"]);
}

#[test]
fn metadata_keys_rejects_malformed_json() {
    assert!(parse_metadata_keys(r#"["scope""#).is_err());
}

#[test]
fn metadata_keys_override_replaces_default() {
    let mut config = Config::default();
    config
        .apply_overrides(lookup_from(&[("CHAT_ALLOWED_METADATA_KEYS", "")]))
        .expect("overrides apply");
    assert!(config.chat.allowed_metadata_keys.is_empty());
}

#[test]
fn system_prompt_path_expands_home() {
    let chat = ChatConfig {
        system_prompt_path: Some(PathBuf::from("~/prompts/system.txt")),
        ..ChatConfig::default()
    };

    let expanded = chat
        .expanded_system_prompt_path()
        .expect("path should expand");
    if let Some(home) = dirs::home_dir() {
        assert_eq!(expanded, home.join("prompts/system.txt"));
    }

    let absolute = ChatConfig {
        system_prompt_path: Some(PathBuf::from("/srv/prompt.txt")),
        ..ChatConfig::default()
    };
    assert_eq!(
        absolute.expanded_system_prompt_path(),
        Some(PathBuf::from("/srv/prompt.txt"))
    );
    assert_eq!(ChatConfig::default().expanded_system_prompt_path(), None);
}
