//! Queue entry model, status machine and live position computation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, FromRow, Postgres};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Lifecycle status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Notified,
    PendingVerification,
    Nearby,
    InProgress,
    Completed,
    NoShow,
}

impl QueueStatus {
    /// Statuses that hold a place in the queue
    pub const ACTIVE: [QueueStatus; 5] = [
        QueueStatus::Waiting,
        QueueStatus::Notified,
        QueueStatus::PendingVerification,
        QueueStatus::Nearby,
        QueueStatus::InProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Notified => "notified",
            QueueStatus::PendingVerification => "pending_verification",
            QueueStatus::Nearby => "nearby",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Completed => "completed",
            QueueStatus::NoShow => "no_show",
        }
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::NoShow)
    }

    /// Rank along the main chain; `NoShow` sits outside it.
    fn stage(&self) -> Option<u8> {
        match self {
            QueueStatus::Waiting => Some(0),
            QueueStatus::Notified => Some(1),
            QueueStatus::PendingVerification => Some(2),
            QueueStatus::Nearby => Some(3),
            QueueStatus::InProgress => Some(4),
            QueueStatus::Completed => Some(5),
            QueueStatus::NoShow => None,
        }
    }

    /// Whether a user-driven update may move an entry from `self` to `next`.
    ///
    /// Forward moves along the chain may skip stages. The one backward edge,
    /// `PendingVerification -> Notified`, is reserved for the timeout sweep
    /// and manual rejection, and is not reachable through this check.
    pub fn can_advance_to(&self, next: QueueStatus) -> bool {
        match (self.stage(), next.stage()) {
            (Some(from), Some(to)) => to > from,
            (Some(_), None) => matches!(
                self,
                QueueStatus::Waiting | QueueStatus::Notified | QueueStatus::PendingVerification
            ),
            (None, _) => false,
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "waiting" => Ok(QueueStatus::Waiting),
            "notified" => Ok(QueueStatus::Notified),
            "pending_verification" => Ok(QueueStatus::PendingVerification),
            "nearby" => Ok(QueueStatus::Nearby),
            "in_progress" => Ok(QueueStatus::InProgress),
            "completed" => Ok(QueueStatus::Completed),
            "no_show" => Ok(QueueStatus::NoShow),
            _ => Err(format!("Invalid queue status: {}", s)),
        }
    }
}

// SQLx conversion for QueueStatus (stored as VARCHAR)
impl sqlx::Type<Postgres> for QueueStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for QueueStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for QueueStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// How a customer's arrival was confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum VerificationMethod {
    AutomaticLocation,
    Manual,
    AdminOverride,
}

/// Queue entry from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct QueueEntry {
    pub id: Uuid,
    pub salon_id: i32,
    pub customer_id: i32,
    pub service_ids: Vec<i32>,
    pub offer_ids: Vec<i32>,
    /// Sum of service prices (minor units)
    pub subtotal: i64,
    /// Offer plus loyalty discount applied at join time
    pub discount_amount: i64,
    /// Loyalty points debited at join time
    pub points_spent: i32,
    pub total_price: i64,
    pub status: QueueStatus,
    /// Position assigned when the entry was created. Not authoritative once
    /// other entries move; use `recompute_position` for display.
    pub initial_position: i32,
    pub created_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub check_in_attempted_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub service_started_at: Option<DateTime<Utc>>,
    pub service_completed_at: Option<DateTime<Utc>>,
    pub no_show_marked_at: Option<DateTime<Utc>>,
    pub verification_method: Option<VerificationMethod>,
    pub verified_by: Option<i32>,
    pub verification_distance_m: Option<f64>,
    pub reported_latitude: Option<f64>,
    pub reported_longitude: Option<f64>,
    pub no_show_reason: Option<String>,
}

impl QueueEntry {
    fn rank_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

/// Everything needed to insert a new entry
#[derive(Debug, Clone)]
pub struct NewQueueEntry {
    pub id: Uuid,
    pub salon_id: i32,
    pub customer_id: i32,
    pub service_ids: Vec<i32>,
    pub offer_ids: Vec<i32>,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub points_spent: i32,
    pub total_price: i64,
    pub created_at: DateTime<Utc>,
}

/// Field changes applied together with a status compare-and-swap.
///
/// `None` leaves a column untouched. Stage timestamps are only written when
/// the column is still NULL.
#[derive(Debug, Clone, Default)]
pub struct StatusChange {
    pub status: Option<QueueStatus>,
    pub notified_at: Option<DateTime<Utc>>,
    pub check_in_attempted_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub service_started_at: Option<DateTime<Utc>>,
    pub service_completed_at: Option<DateTime<Utc>>,
    pub no_show_marked_at: Option<DateTime<Utc>>,
    pub no_show_reason: Option<String>,
    pub verification_method: Option<VerificationMethod>,
    pub verified_by: Option<i32>,
    pub verification_distance_m: Option<f64>,
    pub reported_location: Option<(f64, f64)>,
    /// Clear check-in and verification fields (revert to `notified`)
    pub reset_check_in: bool,
}

impl StatusChange {
    /// Move to `status`, stamping the timestamp that belongs to that stage
    pub fn to(status: QueueStatus, now: DateTime<Utc>) -> Self {
        let mut change = StatusChange {
            status: Some(status),
            ..Default::default()
        };
        match status {
            QueueStatus::Waiting => {}
            QueueStatus::Notified => change.notified_at = Some(now),
            QueueStatus::PendingVerification => change.check_in_attempted_at = Some(now),
            QueueStatus::Nearby => change.verified_at = Some(now),
            QueueStatus::InProgress => change.service_started_at = Some(now),
            QueueStatus::Completed => change.service_completed_at = Some(now),
            QueueStatus::NoShow => change.no_show_marked_at = Some(now),
        }
        change
    }

    /// Revert an expired or rejected check-in back to `notified`.
    ///
    /// `notified_at` is filled in for entries that checked in early from `waiting`.
    pub fn revert_check_in(now: DateTime<Utc>) -> Self {
        StatusChange {
            status: Some(QueueStatus::Notified),
            notified_at: Some(now),
            reset_check_in: true,
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.no_show_reason = Some(reason.into());
        self
    }

    /// Apply this change to an in-memory entry, following the same rules as the SQL update
    pub fn apply(&self, entry: &mut QueueEntry) {
        if let Some(status) = self.status {
            entry.status = status;
        }
        if self.reset_check_in {
            entry.check_in_attempted_at = None;
            entry.verified_at = None;
            entry.verification_method = None;
            entry.verified_by = None;
            entry.verification_distance_m = None;
            entry.reported_latitude = None;
            entry.reported_longitude = None;
        }
        fn stamp(slot: &mut Option<DateTime<Utc>>, value: Option<DateTime<Utc>>) {
            if slot.is_none() {
                *slot = value;
            }
        }
        stamp(&mut entry.notified_at, self.notified_at);
        stamp(&mut entry.check_in_attempted_at, self.check_in_attempted_at);
        stamp(&mut entry.verified_at, self.verified_at);
        stamp(&mut entry.service_started_at, self.service_started_at);
        stamp(&mut entry.service_completed_at, self.service_completed_at);
        stamp(&mut entry.no_show_marked_at, self.no_show_marked_at);
        if self.no_show_reason.is_some() {
            entry.no_show_reason = self.no_show_reason.clone();
        }
        if self.verification_method.is_some() {
            entry.verification_method = self.verification_method;
        }
        if self.verified_by.is_some() {
            entry.verified_by = self.verified_by;
        }
        if self.verification_distance_m.is_some() {
            entry.verification_distance_m = self.verification_distance_m;
        }
        if let Some((lat, lng)) = self.reported_location {
            entry.reported_latitude = Some(lat);
            entry.reported_longitude = Some(lng);
        }
    }
}

/// Live position of `entry` among a salon's active entries.
///
/// Entries being served or already finished report 0. Everyone else is
/// ranked by join time among the active entries that are not in service.
pub fn recompute_position(entry: &QueueEntry, active: &[QueueEntry]) -> i32 {
    if entry.status == QueueStatus::InProgress || entry.status.is_terminal() {
        return 0;
    }
    let key = entry.rank_key();
    let ahead = active
        .iter()
        .filter(|e| e.id != entry.id)
        .filter(|e| e.status.is_active() && e.status != QueueStatus::InProgress)
        .filter(|e| e.rank_key() < key)
        .count();
    ahead as i32 + 1
}

/// Queue entry enriched with its live position
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueueEntryView {
    #[serde(flatten)]
    pub entry: QueueEntry,
    /// Live position (0 while being served or once finished)
    pub position: i32,
    /// Number of active entries in the salon's queue
    pub total_active: i32,
}

impl QueueEntryView {
    pub fn build(entry: QueueEntry, active: &[QueueEntry]) -> Self {
        let position = recompute_position(&entry, active);
        Self {
            entry,
            position,
            total_active: active.len() as i32,
        }
    }
}

/// Active entries of a salon with live positions, in serving order
pub fn active_snapshot(mut active: Vec<QueueEntry>) -> Vec<QueueEntryView> {
    active.retain(|e| e.status.is_active());
    active.sort_by_key(|e| (e.status != QueueStatus::InProgress, e.rank_key()));
    active
        .iter()
        .map(|e| QueueEntryView::build(e.clone(), &active))
        .collect()
}

fn unique_ids(ids: &[i32]) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    if ids.iter().all(|id| seen.insert(*id)) {
        Ok(())
    } else {
        let mut err = ValidationError::new("duplicate");
        err.message = Some("duplicate ids are not allowed".into());
        Err(err)
    }
}

/// Join a salon's queue
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct JoinQueue {
    /// Requested services, in order
    #[validate(
        length(min = 1, message = "at least one service is required"),
        custom(function = "unique_ids")
    )]
    pub service_ids: Vec<i32>,
    #[serde(default)]
    #[validate(custom(function = "unique_ids"))]
    pub offer_ids: Vec<i32>,
    /// Spend loyalty points on the best tier the balance covers
    #[serde(default)]
    pub use_points: bool,
}

/// Status change request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateStatus {
    pub status: QueueStatus,
}

/// Customer arrival report
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckIn {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

/// Manual verification decision by the salon owner
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyArrival {
    pub approve: bool,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn entry_at(status: QueueStatus, created_at: DateTime<Utc>) -> QueueEntry {
        QueueEntry {
            id: Uuid::new_v4(),
            salon_id: 1,
            customer_id: 1,
            service_ids: vec![1],
            offer_ids: vec![],
            subtotal: 1000,
            discount_amount: 0,
            points_spent: 0,
            total_price: 1000,
            status,
            initial_position: 1,
            created_at,
            notified_at: None,
            check_in_attempted_at: None,
            verified_at: None,
            service_started_at: None,
            service_completed_at: None,
            no_show_marked_at: None,
            verification_method: None,
            verified_by: None,
            verification_distance_m: None,
            reported_latitude: None,
            reported_longitude: None,
            no_show_reason: None,
        }
    }

    #[test]
    fn test_positions_are_dense() {
        let t0 = Utc::now();
        let active: Vec<QueueEntry> = [
            QueueStatus::Nearby,
            QueueStatus::Waiting,
            QueueStatus::PendingVerification,
            QueueStatus::Notified,
        ]
        .iter()
        .enumerate()
        .map(|(i, s)| entry_at(*s, t0 + Duration::seconds(i as i64)))
        .collect();

        let mut positions: Vec<i32> = active
            .iter()
            .map(|e| recompute_position(e, &active))
            .collect();
        positions.sort();
        assert_eq!(positions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_in_progress_and_terminal_are_zero() {
        let t0 = Utc::now();
        let serving = entry_at(QueueStatus::InProgress, t0);
        let next = entry_at(QueueStatus::Waiting, t0 + Duration::seconds(5));
        let done = entry_at(QueueStatus::Completed, t0 - Duration::seconds(5));
        let active = vec![serving.clone(), next.clone()];

        assert_eq!(recompute_position(&serving, &active), 0);
        assert_eq!(recompute_position(&done, &active), 0);
        assert_eq!(recompute_position(&next, &active), 1);
    }

    #[test]
    fn test_same_timestamp_is_stable() {
        let t0 = Utc::now();
        let a = entry_at(QueueStatus::Waiting, t0);
        let b = entry_at(QueueStatus::Waiting, t0);
        let active = vec![a.clone(), b.clone()];
        let mut positions = vec![
            recompute_position(&a, &active),
            recompute_position(&b, &active),
        ];
        positions.sort();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn test_transitions() {
        use QueueStatus::*;
        assert!(Waiting.can_advance_to(Notified));
        assert!(Waiting.can_advance_to(InProgress));
        assert!(Nearby.can_advance_to(Completed));
        assert!(PendingVerification.can_advance_to(NoShow));
        assert!(!PendingVerification.can_advance_to(Notified));
        assert!(!Nearby.can_advance_to(NoShow));
        assert!(!InProgress.can_advance_to(Waiting));
        assert!(!Completed.can_advance_to(Completed));
        assert!(!NoShow.can_advance_to(Completed));
    }

    #[test]
    fn test_stamps_set_once() {
        let t0 = Utc::now();
        let mut e = entry_at(QueueStatus::Waiting, t0);
        StatusChange::to(QueueStatus::Notified, t0).apply(&mut e);
        StatusChange::to(QueueStatus::Notified, t0 + Duration::minutes(1)).apply(&mut e);
        assert_eq!(e.notified_at, Some(t0));
    }

    #[test]
    fn test_revert_clears_check_in() {
        let t0 = Utc::now();
        let mut e = entry_at(QueueStatus::Notified, t0);
        let mut change = StatusChange::to(QueueStatus::PendingVerification, t0);
        change.reported_location = Some((48.85, 2.35));
        change.apply(&mut e);
        assert_eq!(e.status, QueueStatus::PendingVerification);
        assert!(e.reported_latitude.is_some());

        StatusChange::revert_check_in(t0 + Duration::minutes(5)).apply(&mut e);
        assert_eq!(e.status, QueueStatus::Notified);
        assert!(e.check_in_attempted_at.is_none());
        assert!(e.reported_latitude.is_none());
    }

    #[test]
    fn test_revert_of_early_check_in_stamps_notified() {
        let t0 = Utc::now();
        let mut e = entry_at(QueueStatus::Waiting, t0);
        StatusChange::to(QueueStatus::PendingVerification, t0).apply(&mut e);
        assert!(e.notified_at.is_none());

        let reverted_at = t0 + Duration::minutes(5);
        StatusChange::revert_check_in(reverted_at).apply(&mut e);
        assert_eq!(e.notified_at, Some(reverted_at));

        // An earlier call keeps its stamp
        StatusChange::to(QueueStatus::PendingVerification, reverted_at).apply(&mut e);
        StatusChange::revert_check_in(reverted_at + Duration::minutes(5)).apply(&mut e);
        assert_eq!(e.notified_at, Some(reverted_at));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("in-progress".parse::<QueueStatus>(), Ok(QueueStatus::InProgress));
        assert_eq!("no_show".parse::<QueueStatus>(), Ok(QueueStatus::NoShow));
        assert!("cancelled".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn test_join_validation() {
        let ok = JoinQueue {
            service_ids: vec![1, 2],
            offer_ids: vec![],
            use_points: false,
        };
        assert!(ok.validate().is_ok());

        let dup = JoinQueue {
            service_ids: vec![1, 1],
            offer_ids: vec![],
            use_points: false,
        };
        assert!(dup.validate().is_err());
    }
}
