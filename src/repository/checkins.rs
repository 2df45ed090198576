//! Check-in outcome log repository

use sqlx::{Pool, Postgres};

use crate::{error::AppResult, models::CheckInRecord};

#[derive(Clone)]
pub struct CheckInsRepository {
    pool: Pool<Postgres>,
}

impl CheckInsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Append an outcome
    pub async fn record(&self, record: &CheckInRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO checkin_log (customer_id, salon_id, entry_id, outcome, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.customer_id)
        .bind(record.salon_id)
        .bind(record.entry_id)
        .bind(record.outcome)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count no-show and expired outcomes for a customer
    pub async fn count_strikes(&self, customer_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM checkin_log WHERE customer_id = $1 AND outcome IN ('no_show', 'expired')",
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
