//! Per-connection dispatch of client events to the session manager.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::{ClientEvent, ServerEvent};
use super::AppState;
use crate::orchestrator::{ExecuteRequest, SessionEvent};
use crate::AppError;

/// Session events buffered per connection.
const SESSION_EVENT_BUFFER: usize = 256;

/// One client connection, bound to a verified user.
///
/// Everything destined for the client is written to the `outbound` channel
/// handed to [`Connection::new`]; the caller owns the socket.
pub struct Connection {
    state: AppState,
    user_id: String,
    outbound: mpsc::Sender<ServerEvent>,
    session_tx: mpsc::Sender<SessionEvent>,
}

impl Connection {
    /// Bind a connection and start relaying its session events.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(state: AppState, user_id: String, outbound: mpsc::Sender<ServerEvent>) -> Self {
        let (session_tx, session_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        tokio::spawn(relay(
            session_rx,
            outbound.clone(),
            state.clone(),
            user_id.clone(),
        ));
        Self {
            state,
            user_id,
            outbound,
            session_tx,
        }
    }

    /// The verified user this connection acts for.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Parse and dispatch one text frame.
    pub async fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(err) => {
                warn!(%err, "malformed client message");
                let err = AppError::Validation(format!("malformed message: {err}"));
                self.send(ServerEvent::from_error(&err, None)).await;
            }
        }
    }

    /// Dispatch one decoded client event.
    pub async fn handle_event(&self, event: ClientEvent) {
        debug!(user_id = %self.user_id, ?event, "client event");
        match event {
            ClientEvent::Execute(payload) => {
                let request = ExecuteRequest {
                    project_id: payload.project_id,
                    command: payload.command,
                    user_id: self.user_id.clone(),
                };
                if let Err(err) = self
                    .state
                    .sessions
                    .execute(request, self.session_tx.clone())
                    .await
                {
                    self.send(ServerEvent::from_error(&err, None)).await;
                }
            }
            ClientEvent::Stop(payload) => {
                if let Err(err) = self.state.sessions.stop(&payload.execution_id, &self.user_id) {
                    self.send(ServerEvent::from_error(&err, Some(payload.execution_id)))
                        .await;
                }
            }
            ClientEvent::Input(payload) => {
                let sent = self
                    .state
                    .sessions
                    .send_input(&payload.execution_id, &self.user_id, payload.data, payload.eof)
                    .await;
                if let Err(err) = sent {
                    self.send(ServerEvent::from_error(&err, Some(payload.execution_id)))
                        .await;
                }
            }
            ClientEvent::FileSync(payload) => {
                // Transfers can be slow; keep reading frames meanwhile.
                let sessions = self.state.sessions.clone();
                let user_id = self.user_id.clone();
                let outbound = self.outbound.clone();
                tokio::spawn(async move {
                    let event = match sessions
                        .sync_files(&payload.project_id, &user_id, payload.action)
                        .await
                    {
                        Ok(report) => ServerEvent::sync_complete(payload.action, report),
                        Err(err) => ServerEvent::from_error(&err, None),
                    };
                    if outbound.send(event).await.is_err() {
                        debug!("client gone, sync result discarded");
                    }
                });
            }
        }
    }

    async fn send(&self, event: ServerEvent) {
        if self.outbound.send(event).await.is_err() {
            debug!("client gone, event discarded");
        }
    }
}

/// Forward session events to the client and arm the execution timeout.
async fn relay(
    mut session_rx: mpsc::Receiver<SessionEvent>,
    outbound: mpsc::Sender<ServerEvent>,
    state: AppState,
    user_id: String,
) {
    let timeout = state.config.execution_timeout();

    while let Some(event) = session_rx.recv().await {
        if let (SessionEvent::Started { execution_id, .. }, Some(limit)) = (&event, timeout) {
            arm_timeout(&state, execution_id.clone(), user_id.clone(), limit);
        }
        if outbound.send(ServerEvent::from(event)).await.is_err() {
            debug!("client gone, relay stopping");
            break;
        }
    }
}

fn arm_timeout(state: &AppState, execution_id: String, user_id: String, limit: Duration) {
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        if sessions.session(&execution_id).is_none() {
            return;
        }
        info!(%execution_id, timeout_secs = limit.as_secs(), "execution timed out, stopping");
        if let Err(err) = sessions.stop(&execution_id, &user_id) {
            debug!(%execution_id, %err, "timeout stop skipped");
        }
    });
}
