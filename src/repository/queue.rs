//! Queue entries repository

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use super::{loyalty, LoyaltyAward, ACTIVE_STATUSES_SQL};
use crate::{
    error::{AppError, AppResult},
    models::{
        queue::{NewQueueEntry, StatusChange},
        QueueEntry, QueueStatus,
    },
};

#[derive(Clone)]
pub struct QueueRepository {
    pool: Pool<Postgres>,
}

// Raised by the partial unique index on active (salon, customer) pairs
fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn already_queued() -> AppError {
    AppError::Conflict("Customer is already in this salon's queue".to_string())
}

impl QueueRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get entry by ID
    pub async fn get_by_id(&self, id: Uuid) -> AppResult<QueueEntry> {
        sqlx::query_as::<_, QueueEntry>("SELECT * FROM queue_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Queue entry {} not found", id)))
    }

    /// Insert an entry and debit the loyalty points it spent
    pub async fn create(&self, entry: &NewQueueEntry) -> AppResult<QueueEntry> {
        let mut tx = self.pool.begin().await?;

        let already_active: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM queue_entries WHERE salon_id = $1 AND customer_id = $2 AND status IN {})",
            ACTIVE_STATUSES_SQL
        ))
        .bind(entry.salon_id)
        .bind(entry.customer_id)
        .fetch_one(&mut *tx)
        .await?;

        if already_active {
            return Err(already_queued());
        }

        let active_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM queue_entries WHERE salon_id = $1 AND status IN {}",
            ACTIVE_STATUSES_SQL
        ))
        .bind(entry.salon_id)
        .fetch_one(&mut *tx)
        .await?;

        let created = sqlx::query_as::<_, QueueEntry>(
            r#"
            INSERT INTO queue_entries (
                id, salon_id, customer_id, service_ids, offer_ids,
                subtotal, discount_amount, points_spent, total_price,
                status, initial_position, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(entry.id)
        .bind(entry.salon_id)
        .bind(entry.customer_id)
        .bind(&entry.service_ids)
        .bind(&entry.offer_ids)
        .bind(entry.subtotal)
        .bind(entry.discount_amount)
        .bind(entry.points_spent)
        .bind(entry.total_price)
        .bind(QueueStatus::Waiting)
        .bind(active_count as i32 + 1)
        .bind(entry.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                already_queued()
            } else {
                AppError::Database(e)
            }
        })?;

        if entry.points_spent > 0 {
            loyalty::debit(&mut *tx, entry.customer_id, entry.salon_id, entry.points_spent).await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    /// Delete an entry
    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Queue entry {} not found", id)));
        }
        Ok(())
    }

    /// Active entries of a salon
    pub async fn active_for_salon(&self, salon_id: i32) -> AppResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT * FROM queue_entries WHERE salon_id = $1 AND status IN {} ORDER BY created_at, id",
            ACTIVE_STATUSES_SQL
        ))
        .bind(salon_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn has_active(&self, salon_id: i32, customer_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM queue_entries WHERE salon_id = $1 AND customer_id = $2 AND status IN {})",
            ACTIVE_STATUSES_SQL
        ))
        .bind(salon_id)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// All entries of a customer, newest first
    pub async fn for_customer(&self, customer_id: i32) -> AppResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntry>(
            "SELECT * FROM queue_entries WHERE customer_id = $1 ORDER BY created_at DESC",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Recent entries of a salon plus any older ones still active
    pub async fn for_salon_since(
        &self,
        salon_id: i32,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            SELECT * FROM queue_entries
            WHERE salon_id = $1 AND (created_at >= $2 OR status IN {})
            ORDER BY created_at, id
            "#,
            ACTIVE_STATUSES_SQL
        ))
        .bind(salon_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Conditional status update, crediting loyalty points in the same transaction
    pub async fn transition(
        &self,
        id: Uuid,
        expected: QueueStatus,
        change: &StatusChange,
        award: Option<LoyaltyAward>,
    ) -> AppResult<Option<QueueEntry>> {
        let mut tx = self.pool.begin().await?;

        let (lat, lng) = change.reported_location.unzip();
        let updated = sqlx::query_as::<_, QueueEntry>(
            r#"
            UPDATE queue_entries SET
                status = COALESCE($3, status),
                notified_at = COALESCE(notified_at, $4),
                check_in_attempted_at = CASE WHEN $16 THEN NULL ELSE COALESCE(check_in_attempted_at, $5) END,
                verified_at = CASE WHEN $16 THEN NULL ELSE COALESCE(verified_at, $6) END,
                service_started_at = COALESCE(service_started_at, $7),
                service_completed_at = COALESCE(service_completed_at, $8),
                no_show_marked_at = COALESCE(no_show_marked_at, $9),
                no_show_reason = COALESCE($10, no_show_reason),
                verification_method = CASE WHEN $16 THEN NULL ELSE COALESCE($11, verification_method) END,
                verified_by = CASE WHEN $16 THEN NULL ELSE COALESCE($12, verified_by) END,
                verification_distance_m = CASE WHEN $16 THEN NULL ELSE COALESCE($13, verification_distance_m) END,
                reported_latitude = CASE WHEN $16 THEN NULL ELSE COALESCE($14, reported_latitude) END,
                reported_longitude = CASE WHEN $16 THEN NULL ELSE COALESCE($15, reported_longitude) END
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(change.status)
        .bind(change.notified_at)
        .bind(change.check_in_attempted_at)
        .bind(change.verified_at)
        .bind(change.service_started_at)
        .bind(change.service_completed_at)
        .bind(change.no_show_marked_at)
        .bind(change.no_show_reason.as_deref())
        .bind(change.verification_method)
        .bind(change.verified_by)
        .bind(change.verification_distance_m)
        .bind(lat)
        .bind(lng)
        .bind(change.reset_check_in)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(entry) = updated else {
            return Ok(None);
        };

        if let Some(award) = award {
            loyalty::credit(&mut *tx, award.customer_id, award.salon_id, award.points).await?;
        }

        tx.commit().await?;
        Ok(Some(entry))
    }

    /// Check-in attempts that were never verified in time
    pub async fn expired_check_ins(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntry>(
            r#"
            SELECT * FROM queue_entries
            WHERE status = 'pending_verification' AND check_in_attempted_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Entries left waiting past the queue timeout
    pub async fn expired_waiting(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntry>(
            r#"
            SELECT * FROM queue_entries
            WHERE status IN ('waiting', 'notified') AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
