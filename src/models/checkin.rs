//! Check-in outcome log (reputation signal for arrival verification)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CheckInOutcome {
    Verified,
    Rejected,
    Expired,
    NoShow,
}

impl CheckInOutcome {
    /// Outcomes that count against automatic verification
    pub fn is_strike(&self) -> bool {
        matches!(self, CheckInOutcome::Expired | CheckInOutcome::NoShow)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CheckInRecord {
    pub customer_id: i32,
    pub salon_id: i32,
    pub entry_id: Uuid,
    pub outcome: CheckInOutcome,
    pub recorded_at: DateTime<Utc>,
}
