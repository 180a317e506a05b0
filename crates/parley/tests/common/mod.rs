#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use parley::config::ClientConfig;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const MODEL: &str = "claude-3-haiku-20240307";

pub fn config(host: &str) -> ClientConfig {
    ClientConfig::builder()
        .api_key("test_api_key")
        .model("haiku")
        .host(host)
        .timeout(Duration::from_secs(10))
        .build()
        .expect("valid test config")
}

pub fn config_with_file(host: &str, path: &Path) -> ClientConfig {
    ClientConfig::builder()
        .api_key("test_api_key")
        .model("haiku")
        .host(host)
        .timeout(Duration::from_secs(10))
        .conversation_file(path)
        .build()
        .expect("valid test config")
}

/// Render frames as an SSE body
pub fn sse(frames: &[(&str, String)]) -> String {
    frames
        .iter()
        .map(|(event, data)| format!("event: {}\ndata: {}\n\n", event, data))
        .collect()
}

pub fn message_start() -> String {
    json!({
        "type": "message_start",
        "message": {
            "id": "msg_stream",
            "type": "message",
            "role": "assistant",
            "content": [],
            "model": MODEL,
            "stop_reason": null,
            "stop_sequence": null,
            "usage": {"input_tokens": 25, "output_tokens": 1}
        }
    })
    .to_string()
}

pub fn block_start(index: usize) -> String {
    json!({
        "type": "content_block_start",
        "index": index,
        "content_block": {"type": "text", "text": ""}
    })
    .to_string()
}

pub fn text_delta(index: usize, text: &str) -> String {
    json!({
        "type": "content_block_delta",
        "index": index,
        "delta": {"type": "text_delta", "text": text}
    })
    .to_string()
}

pub fn message_delta(stop_reason: &str, output_tokens: u32) -> String {
    json!({
        "type": "message_delta",
        "delta": {"stop_reason": stop_reason, "stop_sequence": null},
        "usage": {"output_tokens": output_tokens}
    })
    .to_string()
}

pub fn message_stop() -> String {
    json!({"type": "message_stop"}).to_string()
}

/// message_start, content_block_start, two deltas, message_delta, message_stop
pub fn hello_frames() -> Vec<(&'static str, String)> {
    vec![
        ("message_start", message_start()),
        ("content_block_start", block_start(0)),
        ("content_block_delta", text_delta(0, "Hi")),
        ("content_block_delta", text_delta(0, " there")),
        ("message_delta", message_delta("end_turn", 15)),
        ("message_stop", message_stop()),
    ]
}

pub fn reply(text: &str) -> Value {
    json!({
        "id": "msg_reply",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "model": MODEL,
        "stop_reason": "end_turn",
        "stop_sequence": null,
        "usage": {"input_tokens": 12, "output_tokens": 6}
    })
}

/// A one-shot HTTP server that answers with `body` as an event stream and then
/// either closes the connection or, with `hold_open`, keeps it open without
/// sending anything more. Returns the base url.
pub async fn raw_sse_server(body: String, hold_open: bool) -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        if read_request(&mut socket).await.is_err() {
            return;
        }

        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err()
            || socket.write_all(body.as_bytes()).await.is_err()
            || socket.flush().await.is_err()
        {
            return;
        }

        if hold_open {
            tokio::time::sleep(Duration::from_secs(30)).await;
        } else {
            let _ = socket.shutdown().await;
        }
    });

    Ok(format!("http://{}", addr))
}

// Read headers and the content-length body so closing does not reset the connection
async fn read_request(socket: &mut tokio::net::TcpStream) -> Result<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let read = socket.read(&mut chunk).await?;
        anyhow::ensure!(read > 0, "connection closed before headers");
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buffer[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < header_end + content_length {
        let read = socket.read(&mut chunk).await?;
        anyhow::ensure!(read > 0, "connection closed before body");
        buffer.extend_from_slice(&chunk[..read]);
    }
    Ok(())
}
