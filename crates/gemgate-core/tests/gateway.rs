use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use gemgate_core::{
    ChatOutcome, Gateway, GatewayConfig, GatewayError, TransportErrorKind, UpstreamBody,
    UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse, UpstreamTransport,
};
use gemgate_pool::{FailureKind, KeyInput, KeyStatus};
use gemgate_protocol::openai::CreateChatCompletionRequestBody;

const KEYS: [&str; 3] = [
    "AIzaSyA-first-key-0000",
    "AIzaSyB-second-key-1111",
    "AIzaSyC-third-key-2222",
];

const OK_BODY: &str = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"pong"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":2,"candidatesTokenCount":1,"totalTokenCount":3}}"#;
const BAD_KEY_BODY: &str = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#;
const RATE_LIMIT_BODY: &str = r#"{"error":{"code":429,"message":"Too many requests, slow down.","status":"UNAVAILABLE"}}"#;

enum Reply {
    Buffered(u16, &'static str),
    Stream(Vec<Result<&'static str, UpstreamFailure>>),
    Fail(UpstreamFailure),
    /// Stream fed by the test through its own sender.
    Open(mpsc::Receiver<Result<Bytes, UpstreamFailure>>),
}

#[derive(Debug, Clone)]
struct Seen {
    url: String,
    key: String,
    body: serde_json::Value,
}

struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    fn keys_used(&self) -> Vec<String> {
        self.seen().into_iter().map(|seen| seen.key).collect()
    }
}

impl UpstreamTransport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let key = req
                .headers
                .iter()
                .find(|(name, _)| name == "x-goog-api-key")
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            self.seen.lock().unwrap().push(Seen {
                url: req.url.clone(),
                key,
                body: serde_json::from_slice(&req.body).unwrap(),
            });
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected upstream call");
            match reply {
                Reply::Buffered(status, body) => Ok(UpstreamHttpResponse {
                    status,
                    body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
                Reply::Stream(chunks) => {
                    let (tx, rx) = mpsc::channel(chunks.len().max(1));
                    for chunk in chunks {
                        tx.send(chunk.map(|text| Bytes::from_static(text.as_bytes())))
                            .await
                            .unwrap();
                    }
                    Ok(UpstreamHttpResponse {
                        status: 200,
                        body: UpstreamBody::Stream(rx),
                    })
                }
                Reply::Open(rx) => Ok(UpstreamHttpResponse {
                    status: 200,
                    body: UpstreamBody::Stream(rx),
                }),
                Reply::Fail(failure) => Err(failure),
            }
        })
    }
}

fn gateway(transport: Arc<ScriptedTransport>, keys: usize) -> Gateway {
    let gateway = Gateway::new(
        GatewayConfig {
            base_url: "http://upstream.test/".to_string(),
            ..GatewayConfig::default()
        },
        transport,
    );
    gateway.reload(KEYS[..keys].iter().copied().map(KeyInput::manual).collect());
    gateway
}

fn chat(stream: bool) -> CreateChatCompletionRequestBody {
    serde_json::from_value(serde_json::json!({
        "model": "gpt-4o",
        "stream": stream,
        "messages": [
            {"role": "system", "content": "Be brief."},
            {"role": "user", "content": "ping"}
        ]
    }))
    .unwrap()
}

async fn collect(mut rx: mpsc::Receiver<Bytes>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(String::from_utf8(frame.to_vec()).unwrap());
    }
    frames
}

fn frame_json(frame: &str) -> serde_json::Value {
    serde_json::from_str(frame.strip_prefix("data: ").unwrap().trim()).unwrap()
}

#[tokio::test]
async fn invalid_keys_are_disabled_and_skipped() {
    let transport = ScriptedTransport::new(vec![
        Reply::Buffered(400, BAD_KEY_BODY),
        Reply::Buffered(400, BAD_KEY_BODY),
        Reply::Buffered(200, OK_BODY),
        Reply::Buffered(200, OK_BODY),
    ]);
    let gateway = gateway(transport.clone(), 3);

    let ChatOutcome::Json(response) = gateway.chat_completion(chat(false)).await.unwrap() else {
        panic!("expected a buffered response");
    };
    assert_eq!(response.model, "gpt-4o");
    assert_eq!(response.choices[0].message.content, "pong");
    assert_eq!(response.usage.total_tokens, 3);
    assert!(response.id.starts_with("chatcmpl-"));

    let pool = gateway.pool();
    assert_eq!(pool.status(0), Some(KeyStatus::Disabled));
    assert_eq!(pool.status(1), Some(KeyStatus::Disabled));
    assert_eq!(pool.status(2), Some(KeyStatus::Active));
    assert_eq!(pool.available_count(), 1);

    assert!(matches!(
        gateway.chat_completion(chat(false)).await.unwrap(),
        ChatOutcome::Json(_)
    ));
    assert_eq!(transport.keys_used(), vec![KEYS[0], KEYS[1], KEYS[2], KEYS[2]]);

    let seen = transport.seen();
    assert_eq!(
        seen[0].url,
        "http://upstream.test/v1beta/models/gemini-2.5-flash:generateContent"
    );
    assert_eq!(
        seen[0].body["contents"][0]["parts"][0]["text"],
        "[System]\nBe brief.\n\n[User]\nping"
    );

    let stats = gateway.stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.successful_requests, 2);
    assert_eq!(stats.retried_attempts, 2);
}

#[tokio::test]
async fn rate_limited_single_key_reports_no_key_available() {
    let transport = ScriptedTransport::new(vec![Reply::Buffered(429, RATE_LIMIT_BODY)]);
    let gateway = gateway(transport.clone(), 1);

    let err = match gateway.chat_completion(chat(false)).await {
        Err(err) => err,
        Ok(_) => panic!("expected failure"),
    };
    assert!(matches!(err, GatewayError::NoKeyAvailable { .. }));
    assert_eq!(err.status_code(), 503);
    let message = err.to_string();
    assert!(message.starts_with("no API key available"));
    assert!(message.contains("HTTP 429"));

    assert_eq!(gateway.pool().status(0), Some(KeyStatus::Cooldown));
    assert_eq!(transport.keys_used().len(), 1);
    assert_eq!(gateway.stats().failed_requests, 1);
}

#[tokio::test]
async fn empty_pool_fails_without_calling_upstream() {
    let transport = ScriptedTransport::new(Vec::new());
    let gateway = gateway(transport.clone(), 0);
    let err = match gateway.chat_completion(chat(false)).await {
        Err(err) => err,
        Ok(_) => panic!("expected failure"),
    };
    assert_eq!(err.status_code(), 503);
    assert_eq!(err.to_string(), "no API key available");
    assert!(transport.seen().is_empty());
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_upstream_error() {
    let server_error = r#"{"error":{"code":500,"message":"Internal error encountered.","status":"INTERNAL"}}"#;
    let transport = ScriptedTransport::new(vec![
        Reply::Buffered(500, server_error),
        Reply::Fail(UpstreamFailure::Transport {
            kind: TransportErrorKind::Connect,
            message: "connection refused".to_string(),
        }),
        Reply::Buffered(500, server_error),
    ]);
    let gateway = gateway(transport.clone(), 3);

    let err = match gateway.chat_completion(chat(false)).await {
        Err(err) => err,
        Ok(_) => panic!("expected failure"),
    };
    assert_eq!(err.status_code(), 502);
    let body = serde_json::to_value(err.to_response()).unwrap();
    assert_eq!(body["error"]["type"], "upstream_error");
    assert_eq!(body["error"]["code"], "500");
    assert_eq!(transport.keys_used(), vec![KEYS[0], KEYS[1], KEYS[2]]);

    // Generic failures only count toward the threshold.
    let pool = gateway.pool();
    assert_eq!(pool.available_count(), 3);
    assert_eq!(pool.view(0).unwrap().consecutive_failures, 1);
}

#[tokio::test]
async fn malformed_success_body_is_retried() {
    let transport = ScriptedTransport::new(vec![
        Reply::Buffered(200, "<html>proxy error</html>"),
        Reply::Buffered(200, OK_BODY),
    ]);
    let gateway = gateway(transport.clone(), 2);
    assert!(matches!(
        gateway.chat_completion(chat(false)).await.unwrap(),
        ChatOutcome::Json(_)
    ));
    assert_eq!(transport.keys_used(), vec![KEYS[0], KEYS[1]]);
}

#[tokio::test]
async fn truncated_success_body_counts_as_generic_failure() {
    let truncated: &'static str =
        Box::leak(format!("{}{{\"candidates\": [", "\n".repeat(400)).into_boxed_str());
    let transport = ScriptedTransport::new(vec![
        Reply::Buffered(200, truncated),
        Reply::Buffered(200, OK_BODY),
    ]);
    let gateway = gateway(transport.clone(), 2);
    assert!(matches!(
        gateway.chat_completion(chat(false)).await.unwrap(),
        ChatOutcome::Json(_)
    ));

    let view = gateway.pool().view(0).unwrap();
    assert_eq!(view.status, KeyStatus::Active);
    assert_eq!(view.consecutive_failures, 1);
    let last_error = view.last_error.unwrap();
    assert!(last_error.starts_with("malformed upstream payload"));
    assert!(!last_error.contains("401"));
}

#[tokio::test]
async fn empty_messages_are_rejected_before_selection() {
    let transport = ScriptedTransport::new(Vec::new());
    let gateway = gateway(transport.clone(), 1);
    let body: CreateChatCompletionRequestBody =
        serde_json::from_value(serde_json::json!({"messages": []})).unwrap();
    let err = match gateway.chat_completion(body).await {
        Err(err) => err,
        Ok(_) => panic!("expected failure"),
    };
    assert_eq!(err.status_code(), 400);
    assert_eq!(gateway.pool().view(0).unwrap().total_requests, 0);

    let body: CreateChatCompletionRequestBody = serde_json::from_value(serde_json::json!({
        "messages": [{"role": "tool", "content": "result"}]
    }))
    .unwrap();
    assert!(matches!(
        gateway.chat_completion(body).await,
        Err(GatewayError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn stream_translates_deltas_and_terminates() {
    let transport = ScriptedTransport::new(vec![Reply::Stream(vec![
        Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n"),
        Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]}}]}\n\ndata: {\"candidates\":[{\"content\":"),
        Ok("{\"parts\":[{\"text\":\"!\"}]},\"finishReason\":\"STOP\"}]}\n\n"),
    ])]);
    let gateway = gateway(transport.clone(), 1);

    let ChatOutcome::Stream(rx) = gateway.chat_completion(chat(true)).await.unwrap() else {
        panic!("expected a stream");
    };
    let frames = collect(rx).await;
    assert_eq!(frames.last().map(String::as_str), Some("data: [DONE]\n\n"));

    let chunks: Vec<serde_json::Value> = frames[..frames.len() - 1]
        .iter()
        .map(|frame| frame_json(frame))
        .collect();
    let text: String = chunks
        .iter()
        .filter_map(|chunk| chunk["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, "Hello!");
    let stops = chunks
        .iter()
        .filter(|chunk| chunk["choices"][0]["finish_reason"] == "stop")
        .count();
    assert_eq!(stops, 1);
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert!(chunks.iter().all(|chunk| chunk["id"] == chunks[0]["id"]));

    assert_eq!(
        transport.seen()[0].url,
        "http://upstream.test/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
    );
    assert_eq!(gateway.pool().view(0).unwrap().total_successes, 1);
    assert_eq!(gateway.stats().stream_requests, 1);
}

#[tokio::test]
async fn mid_stream_failure_becomes_an_error_frame() {
    let transport = ScriptedTransport::new(vec![Reply::Stream(vec![
        Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"partial\"}]}}]}\n\n"),
        Err(UpstreamFailure::Transport {
            kind: TransportErrorKind::ReadTimeout,
            message: "stream idle for 120s".to_string(),
        }),
    ])]);
    let gateway = gateway(transport, 1);

    let ChatOutcome::Stream(rx) = gateway.chat_completion(chat(true)).await.unwrap() else {
        panic!("expected a stream");
    };
    let frames = collect(rx).await;
    assert_eq!(frames.len(), 3);
    assert_eq!(
        frame_json(&frames[0])["choices"][0]["delta"]["content"],
        "partial"
    );
    let error = frame_json(&frames[1]);
    assert_eq!(error["error"]["type"], "upstream_error");
    assert!(
        error["error"]["message"]
            .as_str()
            .unwrap()
            .contains("stream idle")
    );
    assert_eq!(frames[2], "data: [DONE]\n\n");
    assert_eq!(gateway.pool().status(0), Some(KeyStatus::Active));
}

#[tokio::test]
async fn dropped_client_releases_an_idle_upstream_stream() {
    let (upstream_tx, upstream_rx) = mpsc::channel(4);
    upstream_tx
        .send(Ok(Bytes::from_static(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
        )))
        .await
        .unwrap();
    let transport = ScriptedTransport::new(vec![Reply::Open(upstream_rx)]);
    let gateway = gateway(transport, 1);

    let ChatOutcome::Stream(mut rx) = gateway.chat_completion(chat(true)).await.unwrap() else {
        panic!("expected a stream");
    };
    let first = rx.recv().await.unwrap();
    assert_eq!(
        frame_json(&String::from_utf8(first.to_vec()).unwrap())["choices"][0]["delta"]["content"],
        "Hel"
    );

    drop(rx);
    tokio::time::timeout(std::time::Duration::from_secs(5), upstream_tx.closed())
        .await
        .expect("upstream receiver should be dropped once the client is gone");
}

#[tokio::test]
async fn stream_rejected_before_headers_moves_to_next_key() {
    let transport = ScriptedTransport::new(vec![
        Reply::Buffered(429, RATE_LIMIT_BODY),
        Reply::Stream(vec![Ok(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"ok\"}]},\"finishReason\":\"STOP\"}]}\n\n",
        )]),
    ]);
    let gateway = gateway(transport.clone(), 2);
    let ChatOutcome::Stream(rx) = gateway.chat_completion(chat(true)).await.unwrap() else {
        panic!("expected a stream");
    };
    let frames = collect(rx).await;
    assert_eq!(frame_json(&frames[0])["choices"][0]["delta"]["content"], "ok");
    assert_eq!(transport.keys_used(), vec![KEYS[0], KEYS[1]]);
    assert_eq!(gateway.pool().status(0), Some(KeyStatus::Cooldown));
}

#[tokio::test]
async fn reload_replaces_the_pool() {
    let transport = ScriptedTransport::new(vec![Reply::Buffered(400, BAD_KEY_BODY)]);
    let gateway = gateway(transport, 1);
    let _ = gateway.chat_completion(chat(false)).await;
    assert_eq!(gateway.pool().status(0), Some(KeyStatus::Disabled));

    let loaded = gateway.reload(vec![
        KeyInput::manual(KEYS[1]),
        KeyInput::manual(KEYS[2]),
    ]);
    assert_eq!(loaded, 2);
    let status = gateway.status();
    assert_eq!(status.pool.total, 2);
    assert_eq!(status.pool.available, 2);
    assert_eq!(status.default_model, "gemini-2.5-flash");
    assert_eq!(status.max_retries, 3);
}

#[tokio::test]
async fn probe_reports_outcome_to_the_pool() {
    let transport = ScriptedTransport::new(vec![
        Reply::Buffered(200, OK_BODY),
        Reply::Buffered(400, BAD_KEY_BODY),
    ]);
    let gateway = gateway(transport.clone(), 2);

    let probe = gateway.probe_key(0).await.unwrap();
    assert!(probe.ok);
    assert_eq!(probe.status, Some(200));
    assert_eq!(probe.key_preview, "AIzaSyA-...0000");
    assert_eq!(gateway.pool().view(0).unwrap().total_successes, 1);

    let probe = gateway.probe_key(1).await.unwrap();
    assert!(!probe.ok);
    assert_eq!(probe.status, Some(400));
    assert_eq!(probe.failure_kind, Some(FailureKind::AuthInvalid));
    assert!(probe.error.unwrap().contains("API key not valid"));
    assert_eq!(gateway.pool().status(1), Some(KeyStatus::Disabled));

    let seen = transport.seen();
    assert_eq!(seen[1].key, KEYS[1]);
    assert_eq!(seen[1].body["contents"][0]["parts"][0]["text"], "Hi");
    assert_eq!(seen[1].body["generationConfig"]["maxOutputTokens"], 8);

    assert!(matches!(
        gateway.probe_key(9).await,
        Err(GatewayError::KeyNotFound(9))
    ));
}

#[tokio::test]
async fn reset_endpoints_reactivate_keys() {
    let transport = ScriptedTransport::new(vec![
        Reply::Buffered(400, BAD_KEY_BODY),
        Reply::Buffered(400, BAD_KEY_BODY),
        Reply::Buffered(400, BAD_KEY_BODY),
    ]);
    let gateway = gateway(transport, 3);
    let _ = gateway.chat_completion(chat(false)).await;
    assert_eq!(gateway.pool().available_count(), 0);

    gateway.reset_key(1).unwrap();
    assert_eq!(gateway.pool().available_count(), 1);
    assert!(matches!(
        gateway.reset_key(5),
        Err(GatewayError::KeyNotFound(5))
    ));
    assert_eq!(gateway.reset_all(), 3);
    assert_eq!(gateway.pool().available_count(), 3);
}

#[tokio::test]
async fn cooled_down_key_serves_again_once_the_window_passes() {
    use std::time::Duration;

    use gemgate_pool::ManualClock;
    use time::macros::datetime;

    let clock = Arc::new(ManualClock::new(datetime!(2024-06-03 18:00 UTC)));
    let transport = ScriptedTransport::new(vec![
        Reply::Buffered(429, RATE_LIMIT_BODY),
        Reply::Buffered(200, OK_BODY),
    ]);
    let gateway = Gateway::with_clock(GatewayConfig::default(), transport.clone(), clock.clone());
    gateway.reload(vec![KeyInput::manual(KEYS[0])]);

    assert!(gateway.chat_completion(chat(false)).await.is_err());
    assert!(gateway.chat_completion(chat(false)).await.is_err());
    assert_eq!(transport.keys_used().len(), 1);

    clock.advance(Duration::from_secs(31));
    assert!(gateway.chat_completion(chat(false)).await.is_ok());
    assert_eq!(gateway.pool().status(0), Some(KeyStatus::Active));
}
