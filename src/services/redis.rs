//! Redis-backed notification queue
//!
//! Notifications are pushed as JSON onto a list; the push/SMS worker pops
//! them from the other end.

use async_trait::async_trait;
use redis::{AsyncCommands, Client};

use super::notifications::{Notification, Notifier};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct RedisNotifier {
    client: Client,
    queue_key: String,
}

impl RedisNotifier {
    /// Create a new Redis notifier and check the server answers
    pub async fn new(url: &str, queue_key: &str) -> AppResult<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to connect to Redis: {}", e)))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("Redis connection test failed: {}", e)))?;

        Ok(Self {
            client,
            queue_key: queue_key.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| AppError::Internal(format!("Failed to encode notification: {}", e)))?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get Redis connection: {}", e)))?;

        conn.lpush::<_, _, ()>(&self.queue_key, payload)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to queue notification: {}", e)))?;

        tracing::debug!(user_id = notification.user_id, kind = ?notification.kind, "Notification queued");
        Ok(())
    }
}
