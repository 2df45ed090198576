//! Fire-and-forget notification dispatch
//!
//! The lifecycle engine never fails because a notification could not be
//! delivered: every error is logged here and swallowed.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use super::email::EmailService;
use crate::{
    error::AppResult,
    models::{QueueEntryView, Salon},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CustomerJoined,
    TurnApproaching,
    CheckInRejected,
    ServiceCompleted,
    MarkedNoShow,
}

/// A message for one user, picked up by the push/SMS worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub user_id: i32,
    pub kind: NotificationKind,
    pub salon_id: i32,
    pub entry_id: Uuid,
    pub title: String,
    pub body: String,
}

/// Delivery channel for user notifications
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> AppResult<()>;
}

/// Used when no push backend is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        tracing::debug!(user_id = notification.user_id, kind = ?notification.kind, "Notification dropped (no backend)");
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    push: Arc<dyn Notifier>,
    email: Option<EmailService>,
}

impl NotificationDispatcher {
    pub fn new(push: Arc<dyn Notifier>, email: Option<EmailService>) -> Self {
        Self { push, email }
    }

    /// Dispatcher that drops everything
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopNotifier), None)
    }

    pub async fn send(&self, notification: Notification) {
        if let Err(e) = self.push.notify(&notification).await {
            tracing::warn!(
                user_id = notification.user_id,
                kind = ?notification.kind,
                error = %e,
                "Notification dispatch failed"
            );
        }
    }

    /// Tell a salon owner a customer joined, by push and (when configured) mail
    pub async fn customer_joined(&self, salon: &Salon, view: &QueueEntryView) {
        self.send(Notification {
            user_id: salon.owner_id,
            kind: NotificationKind::CustomerJoined,
            salon_id: salon.id,
            entry_id: view.entry.id,
            title: "New customer in queue".to_string(),
            body: format!(
                "A customer joined {} at position {} ({} in queue)",
                salon.name, view.position, view.total_active
            ),
        })
        .await;

        if let (Some(email), Some(to)) = (&self.email, &salon.contact_email) {
            let email = email.clone();
            let to = to.clone();
            let salon_name = salon.name.clone();
            let position = view.position;
            // SMTP is slow; do not hold up the join response
            tokio::spawn(async move {
                if let Err(e) = email.send_join_notice(&to, &salon_name, position).await {
                    tracing::warn!(error = %e, "Join notice email failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn sample() -> Notification {
        Notification {
            user_id: 3,
            kind: NotificationKind::TurnApproaching,
            salon_id: 1,
            entry_id: Uuid::new_v4(),
            title: "t".to_string(),
            body: "b".to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_swallowed() {
        let mut push = MockNotifier::new();
        push.expect_notify()
            .times(1)
            .returning(|_| Err(AppError::Internal("redis down".to_string())));

        let dispatcher = NotificationDispatcher::new(Arc::new(push), None);
        dispatcher.send(sample()).await;
    }
}
