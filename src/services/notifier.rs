//! Real-time notification channel.
//!
//! Keeps the process-wide map of live WebSocket sessions (user id attached at
//! connect time, pruned on disconnect) and pushes swap events to every session
//! of an addressed user. Delivery is best-effort and fire-and-forget: a user
//! with no live sessions simply receives nothing, and a closed channel is
//! skipped. Losing a notification is tolerable; the slot-state transition it
//! announces is already committed.

use std::collections::HashMap;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

/// Event pushed when a new swap request addresses the user.
pub const EVENT_SWAP_REQUEST_RECEIVED: &str = "swap-request-received";
/// Event pushed to the requester when their request is accepted.
pub const EVENT_SWAP_REQUEST_ACCEPTED: &str = "swap-request-accepted";
/// Event pushed to the requester when their request is rejected.
pub const EVENT_SWAP_REQUEST_REJECTED: &str = "swap-request-rejected";

/// Channel sender half for pushing messages to a WebSocket connection.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Metadata for a single live WebSocket session.
pub struct Connection {
    /// Authenticated user this session belongs to.
    pub user_id: String,
    /// Channel sender for outbound messages to this session.
    pub sender: ConnectionSender,
    /// When this session was established.
    pub connected_at: DateTime<Utc>,
}

/// Manages all active WebSocket sessions.
///
/// Thread-safe via interior `RwLock`; designed to be shared through
/// `AppState`. Connect/disconnect races are serialized by the lock.
pub struct Notifier {
    connections: RwLock<HashMap<String, Connection>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session for `user_id`.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn add(&self, conn_id: String, user_id: String) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection {
            user_id,
            sender: tx,
            connected_at: Utc::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Remove a session by its connection ID.
    pub async fn remove(&self, conn_id: &str) {
        if let Some(conn) = self.connections.write().await.remove(conn_id) {
            let lifetime = Utc::now() - conn.connected_at;
            tracing::debug!(
                conn_id,
                user_id = %conn.user_id,
                seconds = lifetime.num_seconds(),
                "Session removed"
            );
        }
    }

    /// Push `{"event": ..., "data": ...}` to every live session of `user_id`.
    ///
    /// Never fails: sessions whose send channels are closed are skipped (they
    /// are cleaned up by their own receive loop). Returns the number of
    /// sessions the event was handed to.
    pub async fn notify<T: Serialize>(&self, user_id: &str, event: &str, data: &T) -> usize {
        let payload = serde_json::json!({ "event": event, "data": data });
        let message = Message::Text(payload.to_string());

        let conns = self.connections.read().await;
        let mut count = 0;
        for conn in conns.values() {
            if conn.user_id == user_id && conn.sender.send(message.clone()).is_ok() {
                count += 1;
            }
        }

        tracing::debug!(user_id, event, sessions = count, "Dispatched notification");
        count
    }

    /// Return the current number of active sessions.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Ping frame to every connected client.
    ///
    /// Used by the heartbeat task to keep sessions alive and detect stale
    /// ones.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Ping(Vec::new()));
        }
    }

    /// Send a Close frame to every session, then clear the map.
    ///
    /// Used during graceful shutdown to notify clients before the server
    /// stops accepting new connections.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket sessions");
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_reaches_only_the_addressed_users_sessions() {
        let notifier = Notifier::new();
        let mut alice_rx1 = notifier.add("c1".into(), "alice".into()).await;
        let mut alice_rx2 = notifier.add("c2".into(), "alice".into()).await;
        let mut bob_rx = notifier.add("c3".into(), "bob".into()).await;

        let sent = notifier
            .notify("alice", EVENT_SWAP_REQUEST_ACCEPTED, &serde_json::json!({"id": "r1"}))
            .await;
        assert_eq!(sent, 2);

        for rx in [&mut alice_rx1, &mut alice_rx2] {
            match rx.try_recv().unwrap() {
                Message::Text(text) => {
                    let v: serde_json::Value = serde_json::from_str(&text).unwrap();
                    assert_eq!(v["event"], EVENT_SWAP_REQUEST_ACCEPTED);
                    assert_eq!(v["data"]["id"], "r1");
                }
                other => panic!("expected text frame, got {:?}", other),
            }
        }
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn notify_without_sessions_is_a_no_op() {
        let notifier = Notifier::new();
        let sent = notifier
            .notify("nobody", EVENT_SWAP_REQUEST_REJECTED, &serde_json::json!({}))
            .await;
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn removed_sessions_no_longer_receive() {
        let notifier = Notifier::new();
        let _rx = notifier.add("c1".into(), "alice".into()).await;
        notifier.remove("c1").await;
        assert_eq!(notifier.connection_count().await, 0);

        let sent = notifier
            .notify("alice", EVENT_SWAP_REQUEST_RECEIVED, &serde_json::json!({}))
            .await;
        assert_eq!(sent, 0);
    }
}
