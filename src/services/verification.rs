//! Arrival check-in and verification
//!
//! A check-in moves the entry to `pending_verification`. It is confirmed on
//! the spot when the reported location is within range of the salon and the
//! customer's record is clean enough; otherwise the salon decides, or the
//! timeout sweep sends the entry back to `notified`.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use super::{
    broadcast::publish_snapshot,
    notifications::{Notification, NotificationKind},
    queue::QueueService,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        queue::StatusChange, Actor, CheckIn, CheckInOutcome, QueueEntry, QueueEntryView,
        QueueStatus, VerificationMethod,
    },
};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two `(latitude, longitude)` points
pub fn haversine_meters(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().min(1.0).asin()
}

impl QueueService {
    /// Customer reports arrival at the salon
    pub async fn check_in(&self, actor: Actor, entry_id: Uuid, request: CheckIn) -> AppResult<QueueEntryView> {
        request.validate()?;

        let entry = self.store.get_entry(entry_id).await?;
        if entry.customer_id != actor.user_id {
            return Err(AppError::Authorization(
                "Only the customer can check in for this entry".to_string(),
            ));
        }
        if !matches!(entry.status, QueueStatus::Waiting | QueueStatus::Notified) {
            return Err(AppError::BusinessRule(format!(
                "Cannot check in while {}",
                entry.status
            )));
        }

        let salon = self.store.get_salon(entry.salon_id).await?;
        let reported = (request.latitude, request.longitude);
        let distance = salon.location().map(|at| haversine_meters(reported, at));

        let now = self.clock.now();
        let mut change = StatusChange::to(QueueStatus::PendingVerification, now);
        change.reported_location = Some(reported);
        change.verification_distance_m = distance;
        let pending = self.apply_change(&entry, &change, None).await?;

        let in_range = distance
            .map(|d| d <= self.verification.radius_meters)
            .unwrap_or(false);
        let trusted = in_range
            && self.store.count_strikes(actor.user_id).await? < self.verification.max_strikes;

        if !trusted {
            tracing::info!(
                entry_id = %entry_id,
                salon_id = salon.id,
                distance_m = ?distance,
                in_range,
                "Check-in awaiting verification"
            );
            publish_snapshot(self.store.as_ref(), &self.gateway, salon.id).await;
            return self.view(pending).await;
        }

        let Some(verified) = self.auto_verify(&pending, now).await? else {
            // The check-in is already stored; report where the entry ended up
            tracing::info!(entry_id = %entry_id, "Entry changed before automatic verification");
            publish_snapshot(self.store.as_ref(), &self.gateway, salon.id).await;
            let current = self.store.get_entry(entry_id).await?;
            return self.view(current).await;
        };

        tracing::info!(entry_id = %entry_id, salon_id = salon.id, distance_m = ?distance, "Check-in verified automatically");
        self.log_outcome(&verified, CheckInOutcome::Verified).await;
        self.announce(&verified, 0).await;
        self.view(verified).await
    }

    /// Second step of an in-range check-in. `None` when the entry left
    /// `pending_verification` after the first write.
    pub(crate) async fn auto_verify(
        &self,
        pending: &QueueEntry,
        now: DateTime<Utc>,
    ) -> AppResult<Option<QueueEntry>> {
        let mut verify = StatusChange::to(QueueStatus::Nearby, now);
        verify.verification_method = Some(VerificationMethod::AutomaticLocation);
        match self.apply_change(pending, &verify, None).await {
            Ok(verified) => Ok(Some(verified)),
            Err(AppError::Conflict(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Salon owner (or admin) confirms or rejects a pending check-in
    pub async fn verify(&self, actor: Actor, entry_id: Uuid, approve: bool) -> AppResult<QueueEntryView> {
        let entry = self.store.get_entry(entry_id).await?;
        let salon = self.store.get_salon(entry.salon_id).await?;
        actor.require_salon_owner(salon.owner_id)?;

        if entry.status != QueueStatus::PendingVerification {
            return Err(AppError::BusinessRule(format!(
                "No check-in to verify while {}",
                entry.status
            )));
        }

        if approve {
            let mut change = StatusChange::to(QueueStatus::Nearby, self.clock.now());
            change.verification_method = Some(if actor.is_admin() {
                VerificationMethod::AdminOverride
            } else {
                VerificationMethod::Manual
            });
            change.verified_by = Some(actor.user_id);
            let verified = self.apply_change(&entry, &change, None).await?;

            tracing::info!(entry_id = %entry_id, verified_by = actor.user_id, "Check-in approved");
            self.log_outcome(&verified, CheckInOutcome::Verified).await;
            self.announce(&verified, 0).await;
            return self.view(verified).await;
        }

        let reverted = self
            .apply_change(&entry, &StatusChange::revert_check_in(self.clock.now()), None)
            .await?;

        tracing::info!(entry_id = %entry_id, rejected_by = actor.user_id, "Check-in rejected");
        self.log_outcome(&reverted, CheckInOutcome::Rejected).await;
        publish_snapshot(self.store.as_ref(), &self.gateway, reverted.salon_id).await;
        self.notifier
            .send(Notification {
                user_id: reverted.customer_id,
                kind: NotificationKind::CheckInRejected,
                salon_id: salon.id,
                entry_id: reverted.id,
                title: "Check-in not confirmed".to_string(),
                body: format!("{} could not confirm your arrival", salon.name),
            })
            .await;

        self.view(reverted).await
    }
}
