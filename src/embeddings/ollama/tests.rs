use super::*;
use crate::config::EmbeddingProviderKind;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: EmbeddingProviderKind::Ollama,
        protocol: "http".to_string(),
        host: server.address().ip().to_string(),
        port: server.address().port(),
        model: "test-model".to_string(),
        ..Default::default()
    }
}

fn client_for(server: &MockServer) -> OllamaClient {
    OllamaClient::new(&config_for(server))
        .expect("Failed to create client")
        .with_retry_attempts(2)
        .with_retry_delay(Duration::from_millis(1))
}

#[test]
fn client_configuration() {
    let config = EmbeddingConfig {
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        ..Default::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model(), "test-model");
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry.attempts, http::DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&EmbeddingConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.retry.attempts, 5);
}

#[tokio::test]
async fn embeds_batch_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": "test-model", "input": ["first", "second"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embeddings = client_for(&server)
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .expect("should embed batch");

    assert_eq!(embeddings, vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]);
}

#[tokio::test]
async fn empty_batch_skips_request() {
    let server = MockServer::start().await;

    let embeddings = client_for(&server)
        .embed_batch(&[])
        .await
        .expect("empty batch should succeed");

    assert!(embeddings.is_empty());
    assert!(
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .is_empty()
    );
}

#[tokio::test]
async fn count_mismatch_is_embedding_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.1, 0.2]]})),
        )
        .mount(&server)
        .await;

    let result = client_for(&server)
        .embed_batch(&["a".to_string(), "b".to_string()])
        .await;

    assert!(matches!(result, Err(GranthError::EmbeddingService(_))));
}

#[tokio::test]
async fn missing_model_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "model not found"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server).embed("hello").await;

    assert!(matches!(result, Err(GranthError::EmbeddingService(_))));
}

#[tokio::test]
async fn server_errors_become_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let result = client_for(&server).embed("hello").await;

    let error = result.expect_err("should fail after retries");
    assert!(error.is_retryable());
}
