mod common;

use std::time::Duration;

use anyhow::Result;
use parley::errors::{ApiErrorKind, MarshalingError, ParleyError, TransportError, ValidationError};
use parley::models::conversation::Conversation;
use parley::models::message::{Message, StopReason};
use parley::models::tool::Tool;
use parley::request::{GenerationParams, GenerationRequest};
use parley::stream::fold::MessageAssembler;
use parley::stream::{self, ContentDelta, StreamEvent, StreamResults};
use parley::transport::Transport;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;

fn request(params: &GenerationParams) -> GenerationRequest {
    let mut conversation = Conversation::new(MODEL);
    conversation.push(Message::user().with_text("Say hi"));
    let catalog = parley::models::catalog::ModelCatalog::default();
    GenerationRequest::build(&conversation, params, catalog.resolve("haiku").unwrap())
        .expect("valid request")
}

fn streaming() -> GenerationParams {
    GenerationParams::new().with_stream(true)
}

async fn mount_sse(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}

async fn collect(results: StreamResults) -> (Vec<StreamEvent>, Vec<ParleyError>) {
    tokio::time::timeout(Duration::from_secs(5), results.collect())
        .await
        .expect("stream channels should close")
}

#[tokio::test]
async fn test_six_events_in_order_and_fold() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("accept", "text/event-stream"))
        .and(header("x-api-key", "test_api_key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({"stream": true, "model": MODEL})))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse(&hello_frames()), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = Transport::new(&config(&server.uri()))?;
    let results = stream::stream(transport, request(&streaming()), CancellationToken::new());
    let (events, errors) = collect(results).await;

    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    let names: Vec<_> = events.iter().map(StreamEvent::name).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "message_delta",
            "message_stop",
        ]
    );
    match &events[2] {
        StreamEvent::ContentBlockDelta(delta) => {
            assert_eq!(delta.index, 0);
            assert_eq!(
                delta.delta,
                ContentDelta::TextDelta {
                    text: "Hi".to_string()
                }
            );
        }
        other => panic!("Expected a content block delta, got {:?}", other),
    }

    let mut assembler = MessageAssembler::new();
    events.iter().for_each(|event| assembler.push(event));
    let message = assembler.finish()?.expect("a folded message");
    assert_eq!(message.text(), "Hi there");
    assert_eq!(message.stop_reason, Some(StopReason::EndTurn));
    assert_eq!(message.usage.map(|usage| usage.output_tokens), Some(15));
    Ok(())
}

#[tokio::test]
async fn test_acks_and_unknown_frames_are_dropped() -> Result<()> {
    let server = MockServer::start().await;
    let body = sse(&[
        ("ping", json!({"type": "ping"}).to_string()),
        ("message_start", message_start()),
        ("content_block_start", block_start(0)),
        ("future_event", json!({"type": "future_event"}).to_string()),
        ("content_block_delta", text_delta(0, "Hi")),
        ("content_block_stop", json!({"type": "content_block_stop", "index": 0}).to_string()),
        ("ping", json!({"type": "ping"}).to_string()),
        ("message_stop", message_stop()),
    ]);
    mount_sse(&server, body).await;

    let transport = Transport::new(&config(&server.uri()))?;
    let results = stream::stream(transport, request(&streaming()), CancellationToken::new());
    let (events, errors) = collect(results).await;

    assert!(errors.is_empty());
    assert_eq!(events.len(), 4);
    assert!(events
        .iter()
        .all(|event| !matches!(event, StreamEvent::Ping | StreamEvent::ContentBlockStop(_))));
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_reports_once_and_continues() -> Result<()> {
    let server = MockServer::start().await;
    let body = sse(&[
        ("message_start", message_start()),
        ("content_block_start", block_start(0)),
        ("content_block_delta", text_delta(0, "Hi")),
        ("content_block_delta", "{\"index\": 0, \"delta\": ".to_string()),
        ("content_block_delta", text_delta(0, " there")),
        ("message_delta", message_delta("end_turn", 15)),
        ("message_stop", message_stop()),
    ]);
    mount_sse(&server, body).await;

    let transport = Transport::new(&config(&server.uri()))?;
    let results = stream::stream(transport, request(&streaming()), CancellationToken::new());
    let (events, errors) = collect(results).await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ParleyError::Marshaling(MarshalingError::Frame { event, .. }) if event == "content_block_delta"
    ));
    assert_eq!(events.len(), 6);
    assert!(matches!(events.last(), Some(StreamEvent::MessageStop)));
    Ok(())
}

#[tokio::test]
async fn test_error_frame_is_terminal() -> Result<()> {
    let server = MockServer::start().await;
    let body = sse(&[
        ("message_start", message_start()),
        (
            "error",
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})
                .to_string(),
        ),
        ("content_block_start", block_start(0)),
        ("message_stop", message_stop()),
    ]);
    mount_sse(&server, body).await;

    let transport = Transport::new(&config(&server.uri()))?;
    let results = stream::stream(transport, request(&streaming()), CancellationToken::new());
    let (events, errors) = collect(results).await;

    assert_eq!(events.len(), 2);
    match &events[1] {
        StreamEvent::Error(frame) => assert_eq!(frame.error.kind, "overloaded_error"),
        other => panic!("Expected an error event, got {:?}", other),
    }
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ParleyError::Streaming { kind, message } => {
            assert_eq!(kind, "overloaded_error");
            assert_eq!(message, "Overloaded");
        }
        other => panic!("Expected a streaming error, got {:?}", other),
    }
    assert!(errors[0].is_retryable());
    Ok(())
}

#[tokio::test]
async fn test_preflight_failure_never_connects() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    // Built without streaming, so the tool is accepted until the stream starts
    let params = GenerationParams::new().with_tool(Tool::new(
        "get_weather",
        "Get the weather for a location",
        json!({"type": "object"}),
    ));
    let transport = Transport::new(&config(&server.uri()))?;
    let results = stream::stream(transport, request(&params), CancellationToken::new());
    let (events, errors) = collect(results).await;

    assert!(events.is_empty());
    assert!(matches!(
        errors.as_slice(),
        [ParleyError::Validation(ValidationError::ToolUseWhileStreaming)]
    ));
    Ok(())
}

#[tokio::test]
async fn test_http_status_is_reported() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "type": "error",
            "error": {"type": "rate_limit_error", "message": "Slow down"}
        })))
        .mount(&server)
        .await;

    let transport = Transport::new(&config(&server.uri()))?;
    let results = stream::stream(transport, request(&streaming()), CancellationToken::new());
    let (events, errors) = collect(results).await;

    assert!(events.is_empty());
    match errors.as_slice() {
        [ParleyError::Transport(TransportError::Status { kind, body, .. })] => {
            assert_eq!(*kind, ApiErrorKind::RateLimit);
            assert!(body.contains("Slow down"));
        }
        other => panic!("Expected one status error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_cancel_while_connecting() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse(&hello_frames()), "text/event-stream")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    let transport = Transport::new(&config(&server.uri()))?;
    let results = stream::stream(transport, request(&streaming()), token.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();

    let (events, errors) = tokio::time::timeout(Duration::from_secs(1), results.collect()).await?;
    assert!(events.is_empty());
    assert!(errors.is_empty(), "cancellation reported: {:?}", errors);
    Ok(())
}

#[tokio::test]
async fn test_cancel_mid_stream() -> Result<()> {
    let body = sse(&[
        ("message_start", message_start()),
        ("content_block_start", block_start(0)),
    ]);
    let uri = raw_sse_server(body, true).await?;

    let token = CancellationToken::new();
    let transport = Transport::new(&config(&uri))?;
    let mut results = stream::stream(transport, request(&streaming()), token.clone());

    let first = tokio::time::timeout(Duration::from_secs(5), results.events.recv()).await?;
    assert!(matches!(first, Some(StreamEvent::MessageStart(_))));

    token.cancel();
    let (events, errors) = tokio::time::timeout(Duration::from_secs(1), results.collect()).await?;
    assert!(events.len() <= 1);
    assert!(errors.is_empty(), "cancellation reported: {:?}", errors);
    Ok(())
}

#[tokio::test]
async fn test_dropped_connection_is_reported() -> Result<()> {
    let body = sse(&[
        ("message_start", message_start()),
        ("content_block_start", block_start(0)),
        ("content_block_delta", text_delta(0, "Hi")),
    ]);
    let uri = raw_sse_server(body, false).await?;

    let transport = Transport::new(&config(&uri))?;
    let results = stream::stream(transport, request(&streaming()), CancellationToken::new());
    let (events, errors) = collect(results).await;

    assert_eq!(events.len(), 3);
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        ParleyError::Transport(TransportError::UnexpectedEof)
            | ParleyError::Transport(TransportError::Stream(_))
    ));
    assert!(errors[0].is_retryable());
    Ok(())
}
