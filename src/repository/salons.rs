//! Salon catalog repository (read-only from the queue engine's side)

use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{Offer, Salon, SalonService},
};

#[derive(Clone)]
pub struct SalonsRepository {
    pool: Pool<Postgres>,
}

impl SalonsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get salon by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Salon> {
        sqlx::query_as::<_, Salon>(
            "SELECT id, owner_id, name, contact_email, latitude, longitude FROM salons WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Salon with id {} not found", id)))
    }

    /// Services of a salon among the given ids
    pub async fn services(&self, salon_id: i32, ids: &[i32]) -> AppResult<Vec<SalonService>> {
        let rows = sqlx::query_as::<_, SalonService>(
            r#"
            SELECT id, salon_id, name, price, duration_minutes
            FROM salon_services
            WHERE salon_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(salon_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Offers of a salon among the given ids
    pub async fn offers(&self, salon_id: i32, ids: &[i32]) -> AppResult<Vec<Offer>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, Offer>(
            r#"
            SELECT id, salon_id, title, discount_percent, valid_until, is_active
            FROM offers
            WHERE salon_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(salon_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
