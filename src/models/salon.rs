//! Salon catalog records read by the queue engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Salon record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Salon {
    pub id: i32,
    pub owner_id: i32,
    pub name: String,
    /// Where join notifications for the owner are mailed
    pub contact_email: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Salon {
    pub fn location(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// Service offered by a salon
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct SalonService {
    pub id: i32,
    pub salon_id: i32,
    pub name: String,
    /// Price in minor units
    pub price: i64,
    pub duration_minutes: i32,
}

/// Percentage offer a customer can apply when joining
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Offer {
    pub id: i32,
    pub salon_id: i32,
    pub title: String,
    pub discount_percent: i32,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Offer {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.valid_until.map(|until| until > now).unwrap_or(true)
    }
}
