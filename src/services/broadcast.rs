//! Live broadcast gateway
//!
//! Owns the registry of open WebSocket connections and fans queue events
//! out to them. One instance is built per process and shared through
//! `AppState`; nothing here is global.

use std::collections::HashMap;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::{
    models::{queue::active_snapshot, QueueEvent},
    repository::QueueStore,
};

/// Channel sender half for pushing frames to a WebSocket connection
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Metadata for a single connection
pub struct Connection {
    /// Set once the client presents a valid token
    pub user_id: Option<i32>,
    /// Salon page the client is currently looking at
    pub viewing_salon: Option<i32>,
    pub sender: WsSender,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<String, Connection>,
    /// Authenticated identity -> its single live connection
    by_user: HashMap<i32, String>,
}

#[derive(Default)]
pub struct Gateway {
    registry: RwLock<Registry>,
}

fn encode(event: &QueueEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize queue event");
            None
        }
    }
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, unauthenticated connection.
    ///
    /// Returns its id and the receiver the socket task drains into the sink.
    pub async fn register(&self) -> (String, mpsc::UnboundedReceiver<Message>) {
        let conn_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection {
            user_id: None,
            viewing_salon: None,
            sender: tx,
        };
        self.registry
            .write()
            .await
            .connections
            .insert(conn_id.clone(), conn);
        (conn_id, rx)
    }

    /// Bind an identity to a connection.
    ///
    /// A previous connection holding the same identity is closed and
    /// dropped from the registry. Returns the evicted connection id.
    pub async fn authenticate(&self, conn_id: &str, user_id: i32) -> Option<String> {
        let mut guard = self.registry.write().await;
        let registry = &mut *guard;
        if !registry.connections.contains_key(conn_id) {
            return None;
        }

        let evicted = match registry.by_user.insert(user_id, conn_id.to_string()) {
            Some(previous) if previous != conn_id => {
                if let Some(old) = registry.connections.remove(&previous) {
                    let _ = old.sender.send(Message::Close(None));
                }
                tracing::info!(user_id, evicted = %previous, "Replaced existing connection");
                Some(previous)
            }
            _ => None,
        };

        let previous_user = registry
            .connections
            .get_mut(conn_id)
            .and_then(|conn| conn.user_id.replace(user_id));
        if let Some(old_user) = previous_user.filter(|u| *u != user_id) {
            if registry.by_user.get(&old_user).map(String::as_str) == Some(conn_id) {
                registry.by_user.remove(&old_user);
            }
        }
        evicted
    }

    pub async fn set_viewing(&self, conn_id: &str, salon_id: Option<i32>) {
        if let Some(conn) = self.registry.write().await.connections.get_mut(conn_id) {
            conn.viewing_salon = salon_id;
        }
    }

    /// Remove a connection. Returns its identity if it was authenticated.
    pub async fn unregister(&self, conn_id: &str) -> Option<i32> {
        let mut registry = self.registry.write().await;
        let conn = registry.connections.remove(conn_id)?;
        let user_id = conn.user_id?;
        if registry.by_user.get(&user_id).map(String::as_str) == Some(conn_id) {
            registry.by_user.remove(&user_id);
        }
        Some(user_id)
    }

    /// Deliver an event for a salon.
    ///
    /// Goes to every authenticated connection (clients filter by salon) and
    /// to anonymous connections viewing that salon. Returns the number of
    /// connections the frame was queued on.
    pub async fn broadcast_to_salon(&self, salon_id: i32, event: &QueueEvent) -> usize {
        let Some(message) = encode(event) else {
            return 0;
        };
        let registry = self.registry.read().await;
        let mut sent = 0;
        for (conn_id, conn) in registry.connections.iter() {
            if conn.user_id.is_none() && conn.viewing_salon != Some(salon_id) {
                continue;
            }
            if conn.sender.send(message.clone()).is_ok() {
                sent += 1;
            } else {
                tracing::debug!(conn_id = %conn_id, "Skipping closed connection");
            }
        }
        sent
    }

    /// Deliver an event to one identity. Returns whether a send was attempted
    /// on an open connection.
    pub async fn send_to_user(&self, user_id: i32, event: &QueueEvent) -> bool {
        let registry = self.registry.read().await;
        let Some(conn) = registry
            .by_user
            .get(&user_id)
            .and_then(|id| registry.connections.get(id))
        else {
            return false;
        };
        match encode(event) {
            Some(message) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Reply on a specific connection (control messages)
    pub async fn send_to_connection(&self, conn_id: &str, event: &QueueEvent) -> bool {
        let registry = self.registry.read().await;
        match (registry.connections.get(conn_id), encode(event)) {
            (Some(conn), Some(message)) => conn.sender.send(message).is_ok(),
            _ => false,
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }

    /// Send a Ping frame to every connection
    pub async fn ping_all(&self) {
        let registry = self.registry.read().await;
        for conn in registry.connections.values() {
            let _ = conn.sender.send(Message::Ping(Vec::new()));
        }
    }

    /// Send a Close frame to every connection, then clear the registry
    pub async fn shutdown_all(&self) {
        let mut registry = self.registry.write().await;
        let count = registry.connections.len();
        for conn in registry.connections.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        registry.connections.clear();
        registry.by_user.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }
}

/// Push the refreshed active queue of a salon to its viewers, then each
/// waiting customer's own position.
///
/// Best effort: a store failure is logged and the broadcast skipped.
pub async fn publish_snapshot(store: &dyn QueueStore, gateway: &Gateway, salon_id: i32) {
    let active = match store.active_entries(salon_id).await {
        Ok(active) => active,
        Err(e) => {
            tracing::warn!(salon_id, error = %e, "Could not load queue for broadcast");
            return;
        }
    };

    let queue = active_snapshot(active);
    for view in &queue {
        let event = QueueEvent::PositionUpdated {
            salon_id,
            entry_id: view.entry.id,
            position: view.position,
            total_active: view.total_active,
        };
        gateway.send_to_user(view.entry.customer_id, &event).await;
    }

    let sent = gateway
        .broadcast_to_salon(salon_id, &QueueEvent::QueueUpdated { salon_id, queue })
        .await;
    tracing::debug!(salon_id, sent, "Queue snapshot broadcast");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(message: Message) -> serde_json::Value {
        match message {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_one_connection_per_identity() {
        let gateway = Gateway::new();
        let (first, mut first_rx) = gateway.register().await;
        let (second, mut second_rx) = gateway.register().await;

        assert_eq!(gateway.authenticate(&first, 5).await, None);
        assert_eq!(gateway.authenticate(&second, 5).await, Some(first.clone()));
        assert!(matches!(first_rx.try_recv(), Ok(Message::Close(None))));
        assert_eq!(gateway.connection_count().await, 1);

        let event = QueueEvent::Authenticated { user_id: 5 };
        assert!(gateway.send_to_user(5, &event).await);
        assert_eq!(text(second_rx.try_recv().unwrap())["type"], "authenticated");

        // Cleanup of the evicted socket must not unbind the new one
        assert_eq!(gateway.unregister(&first).await, None);
        assert!(gateway.send_to_user(5, &event).await);
    }

    #[tokio::test]
    async fn test_send_to_absent_user() {
        let gateway = Gateway::new();
        let event = QueueEvent::Authenticated { user_id: 1 };
        assert!(!gateway.send_to_user(1, &event).await);
    }

    #[tokio::test]
    async fn test_salon_broadcast_reach() {
        let gateway = Gateway::new();
        let (authed, mut authed_rx) = gateway.register().await;
        let (viewer, mut viewer_rx) = gateway.register().await;
        let (_other, mut other_rx) = gateway.register().await;

        gateway.authenticate(&authed, 1).await;
        gateway.set_viewing(&viewer, Some(7)).await;

        let event = QueueEvent::ViewerCount { salon_id: 7, count: 1 };
        assert_eq!(gateway.broadcast_to_salon(7, &event).await, 2);
        assert!(authed_rx.try_recv().is_ok());
        assert!(viewer_rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_receiver_is_skipped() {
        let gateway = Gateway::new();
        let (conn, rx) = gateway.register().await;
        gateway.authenticate(&conn, 2).await;
        drop(rx);

        let event = QueueEvent::ViewerCount { salon_id: 1, count: 0 };
        assert_eq!(gateway.broadcast_to_salon(1, &event).await, 0);
        assert!(!gateway.send_to_user(2, &event).await);
    }
}
