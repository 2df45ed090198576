//! Loyalty balances (per salon and running total)

use sqlx::{PgConnection, Pool, Postgres};

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct LoyaltyRepository {
    pool: Pool<Postgres>,
}

impl LoyaltyRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Points a customer holds at one salon
    pub async fn balance(&self, customer_id: i32, salon_id: i32) -> AppResult<i32> {
        let points: Option<i32> = sqlx::query_scalar(
            "SELECT points FROM loyalty_accounts WHERE customer_id = $1 AND salon_id = $2",
        )
        .bind(customer_id)
        .bind(salon_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(points.unwrap_or(0))
    }

    /// Running total across all salons
    pub async fn total(&self, customer_id: i32) -> AppResult<i32> {
        let points: Option<i32> =
            sqlx::query_scalar("SELECT total_points FROM loyalty_totals WHERE customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(points.unwrap_or(0))
    }
}

/// Credit points on both balances. Runs inside the caller's transaction.
pub(crate) async fn credit(
    conn: &mut PgConnection,
    customer_id: i32,
    salon_id: i32,
    points: i32,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO loyalty_accounts (customer_id, salon_id, points)
        VALUES ($1, $2, $3)
        ON CONFLICT (customer_id, salon_id)
        DO UPDATE SET points = loyalty_accounts.points + EXCLUDED.points
        "#,
    )
    .bind(customer_id)
    .bind(salon_id)
    .bind(points)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO loyalty_totals (customer_id, total_points)
        VALUES ($1, $2)
        ON CONFLICT (customer_id)
        DO UPDATE SET total_points = loyalty_totals.total_points + EXCLUDED.total_points
        "#,
    )
    .bind(customer_id)
    .bind(points)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Debit points from both balances. Runs inside the caller's transaction.
pub(crate) async fn debit(
    conn: &mut PgConnection,
    customer_id: i32,
    salon_id: i32,
    points: i32,
) -> AppResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE loyalty_accounts SET points = points - $3
        WHERE customer_id = $1 AND salon_id = $2 AND points >= $3
        "#,
    )
    .bind(customer_id)
    .bind(salon_id)
    .bind(points)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::BusinessRule(
            "Insufficient loyalty points".to_string(),
        ));
    }

    sqlx::query(
        "UPDATE loyalty_totals SET total_points = GREATEST(total_points - $2, 0) WHERE customer_id = $1",
    )
    .bind(customer_id)
    .bind(points)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
