//! OpenAI-compatible adapter against a mock HTTP server

use custom_llm_rs::models::{Content, CountTokensRequest, FinishReason};
use custom_llm_rs::{
    ContentGenerator, GenerateContentRequest, ModelError, OpenAiCompatibleProvider,
    ProviderConfig, RequestId, RetryPolicy,
};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> ProviderConfig {
    ProviderConfig::new("sk-test", &server.uri(), "test-model").unwrap()
}

fn provider(config: ProviderConfig) -> OpenAiCompatibleProvider {
    OpenAiCompatibleProvider::new(Arc::new(config)).with_retry_policy(
        RetryPolicy::default()
            .with_max_retries(0)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter_factor(0.0),
    )
}

fn request() -> GenerateContentRequest {
    GenerateContentRequest::new(vec![Content::user("Hello")])
        .with_system_instruction(Content::user("Be brief"))
}

fn completion(content: &str, finish_reason: &str) -> Value {
    json!({
        "id": "chatcmpl-123",
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": finish_reason
        }],
        "usage": { "prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12 }
    })
}

fn sse(events: &[Value]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str(&format!("data: {}\n\n", event));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn test_generate_content_posts_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Hi there", "stop")))
        .expect(1)
        .mount(&server)
        .await;

    let response = provider(config(&server))
        .generate_content(&request().with_temperature(0.2), &RequestId::new())
        .await
        .unwrap();

    assert_eq!(response.text, "Hi there");
    assert_eq!(response.finish_reason(), Some(FinishReason::Stop));
    assert_eq!(response.usage.prompt_tokens, 9);
    assert_eq!(response.usage.completion_tokens, 3);
    assert_eq!(response.usage.total_tokens, 12);

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["stream"], false);
    assert_eq!(body["max_tokens"], 4096);
    assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    assert_eq!(
        body["messages"],
        json!([
            { "role": "system", "content": "Be brief" },
            { "role": "user", "content": "Hello" }
        ])
    );
}

#[tokio::test]
async fn test_length_finish_maps_to_max_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("cut", "length")))
        .mount(&server)
        .await;

    let response = provider(config(&server))
        .generate_content(&request(), &RequestId::new())
        .await
        .unwrap();
    assert_eq!(response.finish_reason(), Some(FinishReason::MaxTokens));
}

#[tokio::test]
async fn test_non_success_status_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let err = provider(config(&server))
        .generate_content(&request(), &RequestId::new())
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(StatusCode::UNAUTHORIZED));
    match err.root() {
        ModelError::Transport { body, .. } => assert_eq!(body, "invalid api key"),
        other => panic!("expected transport error, got {:?}", other),
    }
    assert!(err.to_string().starts_with("custom-llm generate_content failed"));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("late", "stop"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let provider = provider(config(&server)).with_timeout(Duration::from_millis(200));

    let err = provider
        .generate_content(&request(), &RequestId::new())
        .await
        .unwrap_err();
    assert!(matches!(err.root(), ModelError::Timeout(_)));
    assert_eq!(err.status_code(), None);

    let err = provider
        .generate_content_stream(&request(), &RequestId::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err.root(), ModelError::Timeout(_)));
}

#[tokio::test]
async fn test_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("recovered", "stop")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::new(Arc::new(config(&server))).with_retry_policy(
        RetryPolicy::default()
            .with_max_retries(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter_factor(0.0),
    );
    let response = provider
        .generate_content(&request(), &RequestId::new())
        .await
        .unwrap();
    assert_eq!(response.text, "recovered");
}

#[tokio::test]
async fn test_stream_yields_chunks_in_order() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({ "choices": [{ "index": 0, "delta": { "role": "assistant", "content": "Hel" } }] }),
        json!({ "choices": [{ "index": 0, "delta": { "content": "lo" } }] }),
        json!({ "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }] }),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let stream = provider(config(&server))
        .generate_content_stream(&request(), &RequestId::new())
        .await
        .unwrap();
    let chunks: Vec<_> = stream.map(|chunk| chunk.unwrap()).collect().await;

    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["Hel", "lo", ""]);
    assert_eq!(chunks[0].finish_reason(), None);
    assert_eq!(chunks[2].finish_reason(), Some(FinishReason::Stop));

    let received = server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(sent["stream"], true);
}

#[tokio::test]
async fn test_stream_skips_malformed_events() {
    let server = MockServer::start().await;
    let body = format!(
        "data: {}\n\ndata: {{not json\n\n: keep-alive\n\ndata: {}\n\ndata: [DONE]\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "content": "a" } }] }),
        json!({ "choices": [{ "index": 0, "delta": { "content": "b" } }] }),
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let stream = provider(config(&server))
        .generate_content_stream(&request(), &RequestId::new())
        .await
        .unwrap();
    let texts: Vec<String> = stream.map(|chunk| chunk.unwrap().text).collect().await;
    assert_eq!(texts, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_stream_open_failure_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let err = provider(config(&server))
        .generate_content_stream(&request(), &RequestId::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.status_code(), Some(StatusCode::BAD_REQUEST));
    assert!(err
        .to_string()
        .starts_with("custom-llm generate_content_stream failed"));
}

#[tokio::test]
async fn test_disabled_streaming_uses_unary_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("whole answer", "stop")))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server).with_stream_enabled(false);
    let stream = provider(config)
        .generate_content_stream(&request(), &RequestId::new())
        .await
        .unwrap();
    let chunks: Vec<_> = stream.collect().await;

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].as_ref().unwrap().text, "whole answer");

    let received = server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(sent["stream"], false);
}

#[tokio::test]
async fn test_count_tokens_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let counted = provider(config(&server))
        .count_tokens(&CountTokensRequest {
            contents: vec![Content::user("abcdefghi")],
        })
        .await
        .unwrap();
    assert_eq!(counted.total_tokens, 3);
}

#[tokio::test]
async fn test_disabled_streaming_failure_names_stream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server).with_stream_enabled(false);
    let err = provider(config)
        .generate_content_stream(&request(), &RequestId::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.status_code(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(
        err.to_string(),
        "custom-llm generate_content_stream failed: HTTP 500 Internal Server Error: boom"
    );
}

/// Server that sends the headers and one event, then keeps the connection open silently
async fn stalling_sse_server() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = vec![0u8; 16 * 1024];
        let _ = socket.read(&mut request).await;

        let event = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n";
        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket
            .write_all(format!("{:x}\r\n{}\r\n", event.len(), event).as_bytes())
            .await
            .unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn test_stalled_stream_body_times_out() {
    let (uri, server) = stalling_sse_server().await;
    let config = ProviderConfig::new("sk-test", &uri, "test-model").unwrap();
    let provider = provider(config).with_timeout(Duration::from_millis(300));

    let mut stream = provider
        .generate_content_stream(&request(), &RequestId::new())
        .await
        .unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.text, "hi");

    let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stalled body must surface an error");
    let err = next.unwrap().unwrap_err();
    assert!(matches!(err.root(), ModelError::Timeout(_)));
    assert!(err
        .to_string()
        .starts_with("custom-llm generate_content_stream failed"));
    assert!(stream.next().await.is_none());

    server.abort();
}
