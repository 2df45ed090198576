//! Repository layer for queue persistence
//!
//! [`QueueStore`] is the seam between the queue engine and storage. The
//! PostgreSQL [`Repository`] is used in production; [`memory::MemoryStore`]
//! backs demos and the test suite.

pub mod checkins;
pub mod loyalty;
pub mod memory;
pub mod queue;
pub mod salons;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        queue::{NewQueueEntry, StatusChange},
        CheckInRecord, Offer, QueueEntry, QueueStatus, Salon, SalonService,
    },
};

/// Loyalty credit applied in the same write as a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoyaltyAward {
    pub customer_id: i32,
    pub salon_id: i32,
    pub points: i32,
}

/// Storage operations required by the queue engine and the sweeper
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Cheap connectivity check used by readiness probes
    async fn ping(&self) -> AppResult<()>;

    async fn get_salon(&self, salon_id: i32) -> AppResult<Salon>;

    /// Services with the given ids that belong to the salon
    async fn salon_services(&self, salon_id: i32, ids: &[i32]) -> AppResult<Vec<SalonService>>;

    /// Offers with the given ids that belong to the salon
    async fn salon_offers(&self, salon_id: i32, ids: &[i32]) -> AppResult<Vec<Offer>>;

    async fn loyalty_balance(&self, customer_id: i32, salon_id: i32) -> AppResult<i32>;

    async fn loyalty_total(&self, customer_id: i32) -> AppResult<i32>;

    /// Insert a new entry and debit its `points_spent`, atomically.
    ///
    /// Fails with `Conflict` when the customer already holds an active entry
    /// at the salon. The initial position is the active count plus one.
    async fn create_entry(&self, entry: &NewQueueEntry) -> AppResult<QueueEntry>;

    async fn get_entry(&self, id: Uuid) -> AppResult<QueueEntry>;

    /// Hard delete
    async fn delete_entry(&self, id: Uuid) -> AppResult<()>;

    /// Active entries of a salon, unordered
    async fn active_entries(&self, salon_id: i32) -> AppResult<Vec<QueueEntry>>;

    async fn has_active_entry(&self, salon_id: i32, customer_id: i32) -> AppResult<bool>;

    /// Every entry of a customer, newest first
    async fn customer_entries(&self, customer_id: i32) -> AppResult<Vec<QueueEntry>>;

    /// Entries of a salon created at or after `since`, plus older ones still active
    async fn salon_entries_since(
        &self,
        salon_id: i32,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<QueueEntry>>;

    /// Compare-and-swap status update.
    ///
    /// Applies `change` only if the stored status still equals `expected`,
    /// crediting `award` in the same write. Returns `None` when the status
    /// no longer matches (or the entry is gone).
    async fn transition(
        &self,
        id: Uuid,
        expected: QueueStatus,
        change: &StatusChange,
        award: Option<LoyaltyAward>,
    ) -> AppResult<Option<QueueEntry>>;

    /// `pending_verification` entries whose check-in attempt is older than `cutoff`
    async fn expired_check_ins(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<QueueEntry>>;

    /// `waiting`/`notified` entries created before `cutoff`
    async fn expired_waiting(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<QueueEntry>>;

    async fn record_check_in(&self, record: &CheckInRecord) -> AppResult<()>;

    /// Number of no-show and expired outcomes logged for a customer
    async fn count_strikes(&self, customer_id: i32) -> AppResult<i64>;
}

/// SQL list of active statuses, for `status IN ...` clauses
pub(crate) const ACTIVE_STATUSES_SQL: &str =
    "('waiting', 'notified', 'pending_verification', 'nearby', 'in_progress')";

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub queue: queue::QueueRepository,
    pub salons: salons::SalonsRepository,
    pub loyalty: loyalty::LoyaltyRepository,
    pub checkins: checkins::CheckInsRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            queue: queue::QueueRepository::new(pool.clone()),
            salons: salons::SalonsRepository::new(pool.clone()),
            loyalty: loyalty::LoyaltyRepository::new(pool.clone()),
            checkins: checkins::CheckInsRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl QueueStore for Repository {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_salon(&self, salon_id: i32) -> AppResult<Salon> {
        self.salons.get_by_id(salon_id).await
    }

    async fn salon_services(&self, salon_id: i32, ids: &[i32]) -> AppResult<Vec<SalonService>> {
        self.salons.services(salon_id, ids).await
    }

    async fn salon_offers(&self, salon_id: i32, ids: &[i32]) -> AppResult<Vec<Offer>> {
        self.salons.offers(salon_id, ids).await
    }

    async fn loyalty_balance(&self, customer_id: i32, salon_id: i32) -> AppResult<i32> {
        self.loyalty.balance(customer_id, salon_id).await
    }

    async fn loyalty_total(&self, customer_id: i32) -> AppResult<i32> {
        self.loyalty.total(customer_id).await
    }

    async fn create_entry(&self, entry: &NewQueueEntry) -> AppResult<QueueEntry> {
        self.queue.create(entry).await
    }

    async fn get_entry(&self, id: Uuid) -> AppResult<QueueEntry> {
        self.queue.get_by_id(id).await
    }

    async fn delete_entry(&self, id: Uuid) -> AppResult<()> {
        self.queue.delete(id).await
    }

    async fn active_entries(&self, salon_id: i32) -> AppResult<Vec<QueueEntry>> {
        self.queue.active_for_salon(salon_id).await
    }

    async fn has_active_entry(&self, salon_id: i32, customer_id: i32) -> AppResult<bool> {
        self.queue.has_active(salon_id, customer_id).await
    }

    async fn customer_entries(&self, customer_id: i32) -> AppResult<Vec<QueueEntry>> {
        self.queue.for_customer(customer_id).await
    }

    async fn salon_entries_since(
        &self,
        salon_id: i32,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<QueueEntry>> {
        self.queue.for_salon_since(salon_id, since).await
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: QueueStatus,
        change: &StatusChange,
        award: Option<LoyaltyAward>,
    ) -> AppResult<Option<QueueEntry>> {
        self.queue.transition(id, expected, change, award).await
    }

    async fn expired_check_ins(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<QueueEntry>> {
        self.queue.expired_check_ins(cutoff).await
    }

    async fn expired_waiting(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<QueueEntry>> {
        self.queue.expired_waiting(cutoff).await
    }

    async fn record_check_in(&self, record: &CheckInRecord) -> AppResult<()> {
        self.checkins.record(record).await
    }

    async fn count_strikes(&self, customer_id: i32) -> AppResult<i64> {
        self.checkins.count_strikes(customer_id).await
    }
}
