//! WebSocket endpoint and HTTP server.
//!
//! `GET /ws?user_id=<id>` upgrades to a WebSocket bound to that user. The
//! identity is expected to have been verified upstream; connections without
//! one are refused. `GET /health` reports liveness and the number of live
//! executions.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::handler::Connection;
use super::protocol::ServerEvent;
use super::AppState;
use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Outbound events buffered per connection.
const OUTBOUND_BUFFER: usize = 256;

/// `GET /health` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    status: &'static str,
    active_sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        active_sessions: state.sessions.active_sessions().len(),
    })
}

/// Extract `user_id` from a URI query string.
///
/// Returns `None` when the parameter is absent or empty.
fn extract_user_id(uri: &Uri) -> Option<String> {
    uri.query().and_then(|q| {
        q.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == "user_id")
            .map(|(_, v)| v.to_owned())
            .filter(|v| !v.is_empty())
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>, uri: Uri) -> Response {
    let Some(user_id) = extract_user_id(&uri) else {
        warn!("websocket connection refused: missing user_id");
        return (StatusCode::UNAUTHORIZED, "user_id required").into_response();
    };
    ws.on_upgrade(move |socket| {
        let span = info_span!("connection", %user_id);
        handle_socket(socket, state, user_id).instrument(span)
    })
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    info!("websocket connected");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(
        async move {
            while let Some(event) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(%err, "failed to serialize server event");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    debug!("websocket send failed, client disconnected");
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let connection = Connection::new(state, user_id, outbound_tx);

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => connection.handle_text(text.as_str()).await,
            Ok(Message::Close(_)) => {
                debug!("client sent close frame");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "websocket receive error");
                break;
            }
        }
    }

    // Live executions keep running; their events are discarded from here on.
    drop(connection);
    writer.abort();
    info!("websocket disconnected");
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind the listener described by `config`.
///
/// # Errors
///
/// Returns `AppError::Config` for an unparsable bind address and
/// `AppError::Transport` if the port cannot be bound.
pub async fn bind(config: &GlobalConfig) -> Result<TcpListener> {
    let ip: IpAddr = config.bind_address.parse().map_err(|err| {
        AppError::Config(format!("invalid bind_address {}: {err}", config.bind_address))
    })?;
    let addr = SocketAddr::new(ip, config.http_port);
    TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Transport(format!("failed to bind {addr}: {err}")))
}

/// Serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Transport` if the server fails.
pub async fn serve(listener: TcpListener, state: AppState, ct: CancellationToken) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Transport(format!("listener has no address: {err}")))?;
    info!(%local, "websocket transport listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Transport(format!("server error: {err}")))?;

    info!("websocket transport shut down");
    Ok(())
}
