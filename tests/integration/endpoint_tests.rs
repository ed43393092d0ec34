//! HTTP and WebSocket endpoints on an ephemeral port.

#![cfg(unix)]

use std::net::SocketAddr;

use agent_bridge::transport::ws;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{Harness, WAIT};

/// Serve `h` on an OS-assigned port. Cancel the token to stop.
async fn spawn_server(h: &Harness) -> (SocketAddr, CancellationToken) {
    let listener = ws::bind(&h.config).await.expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    let ct = CancellationToken::new();

    let state = h.state();
    let server_ct = ct.clone();
    tokio::spawn(async move {
        let _ = ws::serve(listener, state, server_ct).await;
    });
    (addr, ct)
}

async fn next_json<S>(stream: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(WAIT, stream.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("json frame");
        }
    }
}

// ── GET /health ──────────────────────────────────────────────

#[tokio::test]
async fn health_reports_status_and_active_sessions() {
    let h = Harness::new();
    let (addr, ct) = spawn_server(&h).await;

    let resp = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("HTTP GET /health");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json body");
    assert_eq!(body, json!({"status": "ok", "activeSessions": 0}));

    ct.cancel();
}

#[tokio::test]
async fn non_existent_route_returns_404() {
    let h = Harness::new();
    let (addr, ct) = spawn_server(&h).await;

    let resp = reqwest::get(format!("http://{addr}/nonexistent"))
        .await
        .expect("HTTP GET /nonexistent");
    assert_eq!(resp.status(), 404);

    ct.cancel();
}

// ── /ws ──────────────────────────────────────────────────────

#[tokio::test]
async fn websocket_without_user_id_is_refused() {
    let h = Harness::new();
    let (addr, ct) = spawn_server(&h).await;

    let err = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect_err("upgrade refused");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 401),
        other => panic!("unexpected error: {other:?}"),
    }

    ct.cancel();
}

#[tokio::test]
async fn websocket_execute_round_trip() {
    let h = Harness::new();
    h.store.insert("p1", "README.md", "hi").unwrap();
    let (addr, ct) = spawn_server(&h).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws?user_id=alice"))
        .await
        .expect("websocket connect");

    let execute = json!({"event": "execute", "data": {"projectId": "p1", "command": "echo hello"}});
    socket
        .send(Message::Text(execute.to_string()))
        .await
        .expect("send execute");

    let started = next_json(&mut socket).await;
    assert_eq!(started["event"], "execution_started");
    assert_eq!(started["data"]["projectId"], "p1");
    let execution_id = started["data"]["executionId"].clone();

    let output = next_json(&mut socket).await;
    assert_eq!(output["event"], "output");
    assert_eq!(output["data"]["content"], "hello");
    assert_eq!(output["data"]["stream"], "primary");
    assert_eq!(output["data"]["executionId"], execution_id);

    let complete = next_json(&mut socket).await;
    assert_eq!(complete["event"], "complete");
    assert_eq!(complete["data"]["status"], "success");
    assert_eq!(complete["data"]["exitCode"], 0);
    assert_eq!(complete["data"]["filesChanged"], json!([]));

    socket.close(None).await.expect("close");
    ct.cancel();
}

#[tokio::test]
async fn execution_survives_client_disconnect() {
    let h = Harness::new();
    let (addr, ct) = spawn_server(&h).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws?user_id=alice"))
        .await
        .expect("websocket connect");
    let execute = json!({"event": "execute", "data": {"projectId": "p1", "command": "sleep 1; echo done > out.txt"}});
    socket
        .send(Message::Text(execute.to_string()))
        .await
        .expect("send execute");
    assert_eq!(next_json(&mut socket).await["event"], "execution_started");
    drop(socket);

    let deadline = tokio::time::Instant::now() + WAIT;
    while h.sessions.is_active("p1") && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(!h.sessions.is_active("p1"));
    assert_eq!(h.store.snapshot("p1").unwrap()["out.txt"], b"done\n");

    ct.cancel();
}
