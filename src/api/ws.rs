//! WebSocket endpoint for live queue updates
//!
//! Clients may connect anonymously to watch a salon page, and authenticate
//! (query `?token=` or an `authenticate` message) to receive events
//! addressed to them.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::{
    models::{queue::active_snapshot, ClientMessage, QueueEvent, UserClaims},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// HTTP handler that upgrades the connection to WebSocket
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Outbound frames are queued on the gateway channel and forwarded by a
/// sender task; inbound messages are handled on this task until the client
/// goes away.
async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let gateway = state.services.gateway.clone();
    let (conn_id, mut rx) = gateway.register().await;
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    if let Some(token) = token {
        authenticate(&state, &conn_id, &token).await;
    }

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => dispatch(&state, &conn_id, &text).await,
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

    state.services.presence.remove_viewer(&conn_id).await;
    gateway.unregister(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

async fn authenticate(state: &AppState, conn_id: &str, token: &str) {
    let gateway = &state.services.gateway;
    match UserClaims::from_token(token, &state.config.auth.jwt_secret) {
        Ok(claims) => {
            gateway.authenticate(conn_id, claims.user_id).await;
            gateway
                .send_to_connection(conn_id, &QueueEvent::Authenticated { user_id: claims.user_id })
                .await;
            tracing::debug!(conn_id = %conn_id, user_id = claims.user_id, "WebSocket authenticated");
        }
        Err(e) => {
            tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket token rejected");
            gateway
                .send_to_connection(
                    conn_id,
                    &QueueEvent::Error {
                        message: "Invalid token".to_string(),
                    },
                )
                .await;
        }
    }
}

/// Handle one client text frame
pub(crate) async fn dispatch(state: &AppState, conn_id: &str, text: &str) {
    let services = &state.services;
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            services
                .gateway
                .send_to_connection(
                    conn_id,
                    &QueueEvent::Error {
                        message: format!("Unrecognized message: {}", e),
                    },
                )
                .await;
            return;
        }
    };

    match message {
        ClientMessage::Authenticate { token } => authenticate(state, conn_id, &token).await,
        ClientMessage::ViewSalon { salon_id } => {
            services.gateway.set_viewing(conn_id, Some(salon_id)).await;
            services.presence.join_view(salon_id, conn_id).await;
            match services.store.active_entries(salon_id).await {
                Ok(active) => {
                    let queue = active_snapshot(active);
                    services
                        .gateway
                        .send_to_connection(conn_id, &QueueEvent::QueueUpdated { salon_id, queue })
                        .await;
                }
                Err(e) => tracing::warn!(salon_id, error = %e, "Could not load queue for viewer"),
            }
        }
        ClientMessage::LeaveSalon => {
            if let Some(salon_id) = services.presence.viewing(conn_id).await {
                services.presence.leave_view(salon_id, conn_id).await;
            }
            services.gateway.set_viewing(conn_id, None).await;
        }
        ClientMessage::Ping => {
            services.gateway.send_to_connection(conn_id, &QueueEvent::Pong).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::{
        config::AppConfig,
        models::Role,
        repository::memory::MemoryStore,
        services::{clock::SystemClock, notifications::NotificationDispatcher, Services},
    };

    async fn state() -> AppState {
        let config = AppConfig::default();
        let services = Services::new(
            Arc::new(MemoryStore::with_demo_data().await),
            Arc::new(SystemClock),
            NotificationDispatcher::noop(),
            &config,
        );
        AppState {
            config: Arc::new(config),
            services: Arc::new(services),
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            events.push(serde_json::from_str(&text).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn test_view_and_leave_salon() {
        let state = state().await;
        let (conn, mut rx) = state.services.gateway.register().await;

        dispatch(&state, &conn, r#"{"type":"view_salon","salon_id":1}"#).await;
        assert_eq!(state.services.presence.viewer_count(1).await, 1);
        let kinds: Vec<_> = drain(&mut rx).into_iter().map(|e| e["type"].clone()).collect();
        assert_eq!(kinds, vec!["viewer_count", "queue_updated"]);

        dispatch(&state, &conn, r#"{"type":"leave_salon"}"#).await;
        assert_eq!(state.services.presence.viewer_count(1).await, 0);
    }

    #[tokio::test]
    async fn test_authenticate_message() {
        let state = state().await;
        let (conn, mut rx) = state.services.gateway.register().await;

        let token = UserClaims::new(12, Role::Customer, chrono::Duration::hours(1))
            .create_token(&state.config.auth.jwt_secret)
            .unwrap();
        let text = serde_json::json!({"type": "authenticate", "token": token}).to_string();
        dispatch(&state, &conn, &text).await;

        let events = drain(&mut rx);
        assert_eq!(events[0]["type"], "authenticated");
        assert_eq!(events[0]["user_id"], 12);
        assert!(state.services.gateway.send_to_user(12, &QueueEvent::Pong).await);
    }

    #[tokio::test]
    async fn test_bad_messages_get_errors() {
        let state = state().await;
        let (conn, mut rx) = state.services.gateway.register().await;

        dispatch(&state, &conn, "not json").await;
        dispatch(&state, &conn, r#"{"type":"authenticate","token":"garbage"}"#).await;
        dispatch(&state, &conn, r#"{"type":"ping"}"#).await;

        let kinds: Vec<_> = drain(&mut rx).into_iter().map(|e| e["type"].clone()).collect();
        assert_eq!(kinds, vec!["error", "error", "pong"]);
    }
}
