use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use confidant::agent::AgentEvent;
use confidant::agent::providers::{
    LlmProvider, OllamaProvider, OpenAiProvider, TRUNCATED_STREAM, from_config,
};
use confidant::config::ConfidantConfig;
use confidant::types::{ChatMessage, GenerationParams};

fn ollama(server: &MockServer) -> OllamaProvider {
    OllamaProvider::new(
        server.uri(),
        "qwen2.5:7b",
        GenerationParams::default(),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn openai(server: &MockServer) -> OpenAiProvider {
    OpenAiProvider::new(
        format!("{}/v1", server.uri()),
        Some("sk-test".into()),
        "gpt-4o-mini",
        GenerationParams::default(),
        Duration::from_secs(5),
    )
    .unwrap()
}

async fn collect(
    provider: &dyn LlmProvider,
    messages: &[ChatMessage],
    system: Option<&str>,
) -> (anyhow::Result<()>, Vec<AgentEvent>) {
    let (tx, mut rx) = mpsc::channel(64);
    let result = provider.call_streaming(messages, system, tx).await;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}

fn streamed_text(events: &[AgentEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::Text(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Serve one request, answering with `body` sent as two HTTP chunks split
/// `split_at` bytes into the first Cyrillic character. Returns the base URL.
async fn serve_split_body(body: &'static str, split_at: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let split = body.bytes().position(|b| b >= 0x80).unwrap() + split_at;

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        // Drain the request: headers, then `content-length` bytes of body.
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }
        }

        let head = "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\n\
                    transfer-encoding: chunked\r\nconnection: close\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        for part in [&body.as_bytes()[..split], &body.as_bytes()[split..]] {
            socket
                .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                .await
                .unwrap();
            socket.write_all(part).await.unwrap();
            socket.write_all(b"\r\n").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        socket.write_all(b"0\r\n\r\n").await.unwrap();
        socket.flush().await.unwrap();
    });

    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ollama_complete_sends_options_and_reads_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({
            "model": "qwen2.5:7b",
            "stream": false,
            "options": {"num_predict": 2048, "num_ctx": 8192, "top_k": 40},
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "qwen2.5:7b",
            "message": {"role": "assistant", "content": "[\"факт\"]"},
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = ollama(&server)
        .complete(&[ChatMessage::user("hi")], Some("be brief"))
        .await
        .unwrap();
    assert_eq!(text, "[\"факт\"]");
}

#[tokio::test]
async fn ollama_complete_fails_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .mount(&server)
        .await;

    let err = ollama(&server)
        .complete(&[ChatMessage::user("hi")], None)
        .await
        .unwrap_err()
        .to_string();
    assert!(err.contains("404"), "got: {err}");
    assert!(err.contains("model not found"), "got: {err}");
}

#[tokio::test]
async fn ollama_streams_ndjson_chunks() {
    let server = MockServer::start().await;
    let body = concat!(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"При\"},\"done\":false}\n",
        "this line is not json\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"вет\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let provider = ollama(&server);
    let (result, events) = collect(&provider, &[ChatMessage::user("hi")], None).await;
    assert!(result.is_ok());
    assert_eq!(
        events,
        vec![
            AgentEvent::Text("При".into()),
            AgentEvent::Text("вет".into()),
            AgentEvent::Done,
        ]
    );
}

#[tokio::test]
async fn ollama_stream_error_field_becomes_error_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("{\"error\":\"model 'x' not found\"}\n"),
        )
        .mount(&server)
        .await;

    let provider = ollama(&server);
    let (result, events) = collect(&provider, &[ChatMessage::user("hi")], None).await;
    assert!(result.is_ok());
    assert_eq!(
        events,
        vec![
            AgentEvent::Error("model 'x' not found".into()),
            AgentEvent::Done,
        ]
    );
}

#[tokio::test]
async fn ollama_stream_http_error_becomes_error_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let provider = ollama(&server);
    let (_, events) = collect(&provider, &[ChatMessage::user("hi")], None).await;
    assert!(matches!(&events[0], AgentEvent::Error(e) if e.contains("boom")));
    assert_eq!(events.last(), Some(&AgentEvent::Done));
}

#[tokio::test]
async fn ollama_stream_keeps_cyrillic_split_across_chunks() {
    let base_url = serve_split_body(
        concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Привет\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        ),
        1,
    )
    .await;
    let provider = OllamaProvider::new(
        base_url,
        "qwen2.5:7b",
        GenerationParams::default(),
        Duration::from_secs(5),
    )
    .unwrap();

    let (result, events) = collect(&provider, &[ChatMessage::user("hi")], None).await;
    assert!(result.is_ok());
    assert_eq!(streamed_text(&events), "Привет");
    assert_eq!(events.last(), Some(&AgentEvent::Done));
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::Error(_))));
}

#[tokio::test]
async fn ollama_stream_without_done_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Полови\"},\"done\":false}\n",
        ))
        .mount(&server)
        .await;

    let provider = ollama(&server);
    let (result, events) = collect(&provider, &[ChatMessage::user("hi")], None).await;
    assert!(result.is_ok());
    assert_eq!(
        events,
        vec![
            AgentEvent::Text("Полови".into()),
            AgentEvent::Error(TRUNCATED_STREAM.into()),
            AgentEvent::Done,
        ]
    );
}

#[tokio::test]
async fn ollama_lists_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [
                {"name": "qwen2.5:7b", "size": 1},
                {"name": "llama3.1:8b", "size": 2}
            ]
        })))
        .mount(&server)
        .await;

    let models = ollama(&server).list_models().await.unwrap();
    assert_eq!(models, vec!["qwen2.5:7b", "llama3.1:8b"]);
}

#[tokio::test]
async fn unreachable_backend_is_an_error() {
    // Nothing listens on the discard port.
    let provider = OllamaProvider::new(
        "http://127.0.0.1:9",
        "qwen2.5:7b",
        GenerationParams::default(),
        Duration::from_secs(2),
    )
    .unwrap();
    assert!(provider.list_models().await.is_err());
    let (result, _) = collect(&provider, &[ChatMessage::user("hi")], None).await;
    assert!(result.is_err());
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_complete_sends_bearer_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"age\": 30}"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = openai(&server)
        .complete(&[ChatMessage::user("hi")], None)
        .await
        .unwrap();
    assert_eq!(text, "{\"age\": 30}");
}

#[tokio::test]
async fn openai_streams_sse_chunks() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let provider = openai(&server);
    let (result, events) = collect(&provider, &[ChatMessage::user("hi")], Some("sys")).await;
    assert!(result.is_ok());
    assert_eq!(
        events,
        vec![
            AgentEvent::Text("Hel".into()),
            AgentEvent::Text("lo".into()),
            AgentEvent::Done,
        ]
    );
}

#[tokio::test]
async fn openai_stream_keeps_cyrillic_split_across_chunks() {
    let base_url = serve_split_body(
        concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Привет\"}}]}\n\n",
            "data: [DONE]\n\n",
        ),
        1,
    )
    .await;
    let provider = OpenAiProvider::new(
        base_url,
        None,
        "gpt-4o-mini",
        GenerationParams::default(),
        Duration::from_secs(5),
    )
    .unwrap();

    let (result, events) = collect(&provider, &[ChatMessage::user("hi")], None).await;
    assert!(result.is_ok());
    assert_eq!(streamed_text(&events), "Привет");
    assert_eq!(events.last(), Some(&AgentEvent::Done));
}

#[tokio::test]
async fn openai_stream_without_done_marker_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n"),
        )
        .mount(&server)
        .await;

    let provider = openai(&server);
    let (_, events) = collect(&provider, &[ChatMessage::user("hi")], None).await;
    assert_eq!(
        events,
        vec![
            AgentEvent::Text("Hel".into()),
            AgentEvent::Error(TRUNCATED_STREAM.into()),
            AgentEvent::Done,
        ]
    );
}

#[tokio::test]
async fn openai_lists_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"id": "gpt-4o-mini"}, {"id": "gpt-4o"}]
        })))
        .mount(&server)
        .await;

    let models = openai(&server).list_models().await.unwrap();
    assert_eq!(models, vec!["gpt-4o-mini", "gpt-4o"]);
}

#[tokio::test]
async fn from_config_targets_configured_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"models": [{"name": "m:1"}]})),
        )
        .mount(&server)
        .await;

    let mut config = ConfidantConfig::default();
    config.agent.base_url = Some(format!("{}/", server.uri()));
    let provider = from_config(&config).unwrap();
    assert_eq!(provider.list_models().await.unwrap(), vec!["m:1"]);

    config.agent.provider = "anthropic".into();
    assert!(from_config(&config).is_err());
}
