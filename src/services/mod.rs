//! Business logic services

pub mod broadcast;
pub mod clock;
pub mod email;
pub mod notifications;
pub mod presence;
pub mod queue;
pub mod redis;
pub mod sweeper;
pub mod verification;

use std::sync::Arc;

use crate::{config::AppConfig, repository::QueueStore};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn QueueStore>,
    pub gateway: Arc<broadcast::Gateway>,
    pub presence: Arc<presence::PresenceTracker>,
    pub queue: queue::QueueService,
    pub sweeper: Arc<sweeper::TimeoutSweeper>,
}

impl Services {
    /// Wire every service around one store, clock and notification channel
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn clock::Clock>,
        notifier: notifications::NotificationDispatcher,
        config: &AppConfig,
    ) -> Self {
        let gateway = Arc::new(broadcast::Gateway::new());
        let presence = Arc::new(presence::PresenceTracker::new(gateway.clone()));
        let queue = queue::QueueService::new(
            store.clone(),
            clock,
            gateway.clone(),
            notifier,
            config.loyalty.clone(),
            config.verification.clone(),
        );
        let sweeper = Arc::new(sweeper::TimeoutSweeper::new(
            queue.clone(),
            config.sweeper.clone(),
        ));

        Self {
            store,
            gateway,
            presence,
            queue,
            sweeper,
        }
    }
}
