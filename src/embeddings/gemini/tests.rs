use super::*;
use serde_json::json;
use std::sync::Mutex;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EMBED_PATH: &str = "/v1beta/models/text-embedding-004:embedContent";

#[derive(Debug, Default)]
struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().expect("sleeper lock").push(delay);
    }
}

fn test_config(server: &MockServer) -> GeminiConfig {
    GeminiConfig {
        api_key: "test-key".to_string(),
        api_base_url: server.uri(),
        max_attempts: 3,
        retry_backoff_seconds: 0.25,
        request_timeout_seconds: 5.0,
        ..GeminiConfig::default()
    }
}

fn test_embedder(server: &MockServer) -> (GeminiEmbedder, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let embedder = GeminiEmbedder::new(&test_config(server))
        .expect("embedder builds")
        .with_sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>);
    (embedder, sleeper)
}

async fn received(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or_default()
}

#[test]
fn client_requires_api_key() {
    let result = GeminiEmbedder::new(&GeminiConfig::default());
    assert!(matches!(result, Err(ConfigError::MissingApiKey)));
}

#[test]
fn client_configuration() {
    let config = GeminiConfig {
        api_key: "key".to_string(),
        max_attempts: 5,
        ..GeminiConfig::default()
    };
    let embedder = GeminiEmbedder::new(&config)
        .expect("embedder builds")
        .with_timeout(Duration::from_secs(10));

    assert_eq!(embedder.model_name(), "text-embedding-004");
    assert_eq!(embedder.retry_policy().max_attempts, 5);
    assert_eq!(
        embedder.endpoint.as_str(),
        "https://generativelanguage.googleapis.com/v1beta/models/text-embedding-004:embedContent"
    );
}

#[test]
fn model_names_are_qualified_once() {
    assert_eq!(qualified_model_name("text-embedding-004"), "models/text-embedding-004");
    assert_eq!(qualified_model_name("models/custom"), "models/custom");
}

#[test]
fn parse_embedding_accepts_both_shapes() {
    let values = parse_embedding(r#"{"embedding": {"values": [0.1, 0.2]}}"#).expect("parses");
    assert_eq!(values, vec![0.1, 0.2]);

    let bare = parse_embedding(r#"{"embedding": [0.3, 0.4]}"#).expect("parses");
    assert_eq!(bare, vec![0.3, 0.4]);
}

#[test]
fn parse_embedding_rejects_empty_or_missing() {
    assert!(matches!(
        parse_embedding(r#"{"embedding": {"values": []}}"#),
        Err(EmbeddingError::MalformedResponse(_))
    ));
    assert!(matches!(
        parse_embedding(r#"{}"#),
        Err(EmbeddingError::MalformedResponse(_))
    ));
    assert!(matches!(
        parse_embedding("not json"),
        Err(EmbeddingError::MalformedResponse(_))
    ));
}

#[tokio::test]
async fn embed_text_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .and(header(API_KEY_HEADER, "test-key"))
        .and(body_partial_json(json!({
            "model": "models/text-embedding-004",
            "content": {"parts": [{"text": "Hello world"}]}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"embedding": {"values": [0.1, 0.2, 0.3]}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (embedder, sleeper) = test_embedder(&server);
    let vector = embedder.embed("  Hello world ").await.expect("embedding succeeds");

    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    assert!(sleeper.delays.lock().expect("sleeper lock").is_empty());
}

#[tokio::test]
async fn embed_rejects_empty_text_without_calling_remote() {
    let server = MockServer::start().await;
    let (embedder, _) = test_embedder(&server);

    let result = embedder.embed("   ").await;

    assert!(matches!(result, Err(EmbeddingError::InvalidInput)));
    assert_eq!(received(&server).await, 0);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": {"values": [1.0]}})),
        )
        .mount(&server)
        .await;

    let (embedder, sleeper) = test_embedder(&server);
    let vector = embedder.embed("retry me").await.expect("third attempt succeeds");

    assert_eq!(vector, vec![1.0]);
    assert_eq!(received(&server).await, 3);
    assert_eq!(
        *sleeper.delays.lock().expect("sleeper lock"),
        vec![Duration::from_millis(250), Duration::from_millis(500)]
    );
}

#[tokio::test]
async fn exhausted_retries_attach_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let (embedder, _) = test_embedder(&server);
    let error = embedder.embed("always busy").await.expect_err("should fail");

    match error {
        EmbeddingError::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                *source,
                EmbeddingError::Request(crate::http::HttpError::Status(429))
            ));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(received(&server).await, 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (embedder, sleeper) = test_embedder(&server);
    let error = embedder.embed("bad key").await.expect_err("should fail");

    assert!(matches!(
        error,
        EmbeddingError::Request(crate::http::HttpError::Status(401))
    ));
    assert_eq!(received(&server).await, 1);
    assert!(sleeper.delays.lock().expect("sleeper lock").is_empty());
}

#[tokio::test]
async fn malformed_response_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": []})))
        .mount(&server)
        .await;

    let (embedder, _) = test_embedder(&server);
    let error = embedder.embed("empty").await.expect_err("should fail");

    assert!(matches!(error, EmbeddingError::MalformedResponse(_)));
    assert_eq!(received(&server).await, 1);
}

#[tokio::test]
async fn embed_batch_handles_multiple_entries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .and(body_partial_json(json!({"content": {"parts": [{"text": "doc1"}]}})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.4, 0.5]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .and(body_partial_json(json!({"content": {"parts": [{"text": "doc2"}]}})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": {"values": [0.6, 0.7]}})),
        )
        .mount(&server)
        .await;

    let (embedder, _) = test_embedder(&server);
    let vectors = embedder
        .embed_batch(&["doc1".to_string(), "doc2".to_string()])
        .await
        .expect("batch succeeds");

    assert_eq!(vectors, vec![vec![0.4, 0.5], vec![0.6, 0.7]]);
}

#[tokio::test]
async fn embed_batch_reports_failing_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(EMBED_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.4]})))
        .mount(&server)
        .await;

    let (embedder, _) = test_embedder(&server);
    let error = embedder
        .embed_batch(&["doc1".to_string(), "  ".to_string()])
        .await
        .expect_err("second entry is empty");

    match error {
        EmbeddingError::Batch { index, source } => {
            assert_eq!(index, 1);
            assert!(matches!(*source, EmbeddingError::InvalidInput));
        }
        other => panic!("expected Batch error, got {:?}", other),
    }
}
