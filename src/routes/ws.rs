use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::AppResult;
use crate::services::auth::AuthService;
use crate::services::notifier::Notifier;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(ws_handler))
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token; browsers cannot set headers on WebSocket handshakes,
    /// so the credential travels as a query parameter.
    token: String,
}

/// HTTP handler that authenticates the caller and upgrades to WebSocket.
///
/// The token is validated before the upgrade: an invalid credential is
/// rejected with 401 and no session is ever registered.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> AppResult<impl IntoResponse> {
    let user = AuthService::get_user_from_token(&state, &query.token).await?;
    let notifier = state.notifier.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, notifier, user.id)))
}

/// Manage a single WebSocket session after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the session with the notifier under the user's id.
///   2. Spawns a sender task that forwards notifier messages to the sink.
///   3. Drains inbound messages on the current task.
///   4. Prunes the session on disconnect.
async fn handle_socket(socket: WebSocket, notifier: Arc<Notifier>, user_id: String) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, user_id = %user_id, "WebSocket connected");

    let mut rx = notifier.add(conn_id.clone(), user_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward notifier messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    // Receiver loop: clients only listen, so inbound traffic is drained.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    notifier.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}
