use ai_router::{AIConfig, AIError, AIService, ErrorCode, ProviderType, RoutingMode};
use serial_test::serial;
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
[routing]
mode = "fast"

[defaults]
timeout_ms = 15000

[[providers]]
provider_type = "openai"
api_key_env = "AI_ROUTER_TEST_OPENAI_KEY"

[[providers]]
provider_type = "anthropic"
api_key_env = "AI_ROUTER_TEST_MISSING_KEY"

[[providers]]
provider_type = "ollama"
priority = 10
"#;

#[test]
fn test_config_file_operations() {
    let original = AIConfig::example();
    let temp_file = NamedTempFile::new().expect("Should be able to create temporary file");

    original
        .to_toml_file(temp_file.path())
        .expect("Should be able to save config to file");
    let loaded = AIConfig::from_toml_file(temp_file.path()).expect("Should be able to load config from file");

    assert_eq!(original, loaded);
    assert_eq!(loaded.providers.len(), 4);
}

#[test]
fn test_config_toml_structure() {
    let toml_str = AIConfig::example()
        .to_toml_string()
        .expect("Should be able to serialize config");

    for section in ["[routing]", "[safety]", "[memory]", "[cache]", "[resilience", "[[providers]]"] {
        assert!(toml_str.contains(section), "Should contain {} section", section);
    }
}

#[test]
fn test_config_error_handling() {
    assert!(AIConfig::from_toml_file("/nonexistent/ai-router.toml").is_err());

    let error = AIConfig::from_toml_str("[routing]\nmode = \"fastest\"").unwrap_err();
    assert!(matches!(error, AIError::Configuration(_)));
    assert_eq!(error.code(), ErrorCode::InvalidRequest);

    let duplicated = "[[providers]]\nprovider_type = \"groq\"\n[[providers]]\nprovider_type = \"groq\"\n";
    assert!(AIConfig::from_toml_str(duplicated).is_err());
}

#[tokio::test]
#[serial]
async fn test_service_starts_providers_with_credentials() {
    unsafe {
        std::env::set_var("AI_ROUTER_TEST_OPENAI_KEY", "sk-test-0123456789abcdef");
        std::env::remove_var("AI_ROUTER_TEST_MISSING_KEY");
    }

    let config = AIConfig::from_toml_str(CONFIG).unwrap();
    assert_eq!(config.routing.mode, RoutingMode::Fast);

    let service = AIService::from_config(config).await.unwrap();
    let registry = service.registry();
    assert!(registry.contains(ProviderType::OpenAI));
    assert!(registry.contains(ProviderType::Ollama));
    assert!(!registry.contains(ProviderType::Anthropic));
    assert_eq!(
        registry.config(ProviderType::OpenAI).and_then(|c| c.timeout_ms),
        Some(15000)
    );

    unsafe {
        std::env::remove_var("AI_ROUTER_TEST_OPENAI_KEY");
    }
}

#[tokio::test]
#[serial]
async fn test_disabled_provider_is_not_started() {
    let config = AIConfig::from_toml_str(
        "[[providers]]\nprovider_type = \"ollama\"\nenabled = false\n",
    )
    .unwrap();

    let service = AIService::from_config(config).await.unwrap();
    assert!(service.registry().is_empty());
}
