//! Queue lifecycle engine
//!
//! Joining, status changes and leaving. Every status write is a
//! compare-and-swap on the status read just before, so two concurrent
//! updates can never both apply (and completion points are credited once).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveTime, TimeZone, Utc};
use uuid::Uuid;
use validator::Validate;

use super::{
    broadcast::{publish_snapshot, Gateway},
    clock::Clock,
    notifications::{Notification, NotificationDispatcher, NotificationKind},
};
use crate::{
    config::{LoyaltyConfig, LoyaltyTier, VerificationConfig},
    error::{AppError, AppResult},
    models::{
        queue::{active_snapshot, NewQueueEntry, StatusChange},
        Actor, CheckInOutcome, CheckInRecord, JoinQueue, Offer, QueueEntry, QueueEntryView,
        QueueEvent, QueueStatus, Salon, SalonService, VerificationMethod,
    },
    repository::{LoyaltyAward, QueueStore},
};

/// Reason stored when the salon marks a no-show by hand
pub const MANUAL_NO_SHOW_REASON: &str = "marked by salon";

/// Amounts computed at join time (minor units)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    pub subtotal: i64,
    pub discount_amount: i64,
    pub points_spent: i32,
    pub total_price: i64,
}

/// Price a set of services.
///
/// Offer percentages add up (capped at 100). A loyalty tier, when given,
/// applies to what is left after offers and costs its `min_points`.
pub fn price_entry(
    services: &[SalonService],
    offers: &[Offer],
    tier: Option<&LoyaltyTier>,
) -> Pricing {
    let subtotal: i64 = services.iter().map(|s| s.price).sum();
    let offer_percent = offers
        .iter()
        .map(|o| o.discount_percent.max(0))
        .sum::<i32>()
        .min(100);
    let offer_discount = subtotal * offer_percent as i64 / 100;
    let after_offers = subtotal - offer_discount;

    let (loyalty_discount, points_spent) = match tier {
        Some(tier) => (
            after_offers * tier.discount_percent.clamp(0, 100) as i64 / 100,
            tier.min_points,
        ),
        None => (0, 0),
    };

    let discount_amount = offer_discount + loyalty_discount;
    Pricing {
        subtotal,
        discount_amount,
        points_spent,
        total_price: subtotal - discount_amount,
    }
}

/// Event announcing that an entry reached its current stage
pub fn stage_event(entry: &QueueEntry, points_awarded: i32) -> Option<QueueEvent> {
    let (salon_id, entry_id, customer_id) = (entry.salon_id, entry.id, entry.customer_id);
    match entry.status {
        QueueStatus::Nearby => Some(QueueEvent::CustomerArrived {
            salon_id,
            entry_id,
            customer_id,
        }),
        QueueStatus::InProgress => Some(QueueEvent::ServiceStarting {
            salon_id,
            entry_id,
            customer_id,
        }),
        QueueStatus::Completed => Some(QueueEvent::ServiceCompleted {
            salon_id,
            entry_id,
            customer_id,
            points_awarded,
        }),
        QueueStatus::NoShow => Some(QueueEvent::NoShow {
            salon_id,
            entry_id,
            customer_id,
            reason: entry.no_show_reason.clone(),
        }),
        QueueStatus::Waiting | QueueStatus::Notified | QueueStatus::PendingVerification => None,
    }
}

#[derive(Clone)]
pub struct QueueService {
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) gateway: Arc<Gateway>,
    pub(crate) notifier: NotificationDispatcher,
    pub(crate) loyalty: LoyaltyConfig,
    pub(crate) verification: VerificationConfig,
}

impl QueueService {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        gateway: Arc<Gateway>,
        notifier: NotificationDispatcher,
        loyalty: LoyaltyConfig,
        verification: VerificationConfig,
    ) -> Self {
        Self {
            store,
            clock,
            gateway,
            notifier,
            loyalty,
            verification,
        }
    }

    /// Join a salon's queue
    pub async fn join(&self, actor: Actor, salon_id: i32, request: JoinQueue) -> AppResult<QueueEntryView> {
        request.validate()?;

        let salon = self.store.get_salon(salon_id).await?;

        let services = self.store.salon_services(salon_id, &request.service_ids).await?;
        if services.len() != request.service_ids.len() {
            return Err(AppError::NotFound(format!(
                "One or more services not found for salon {}",
                salon_id
            )));
        }
        // Keep the requested order
        let services: Vec<SalonService> = request
            .service_ids
            .iter()
            .filter_map(|id| services.iter().find(|s| s.id == *id).cloned())
            .collect();

        let now = self.clock.now();
        let offers = self.store.salon_offers(salon_id, &request.offer_ids).await?;
        if offers.len() != request.offer_ids.len() || offers.iter().any(|o| !o.is_valid_at(now)) {
            return Err(AppError::Validation(
                "offer_ids: one or more offers are unknown, inactive or expired".to_string(),
            ));
        }

        if self.store.has_active_entry(salon_id, actor.user_id).await? {
            return Err(AppError::Conflict(
                "Customer is already in this salon's queue".to_string(),
            ));
        }

        let tier = if request.use_points {
            let balance = self.store.loyalty_balance(actor.user_id, salon_id).await?;
            self.loyalty.best_tier(balance).cloned()
        } else {
            None
        };
        let pricing = price_entry(&services, &offers, tier.as_ref());

        let new_entry = NewQueueEntry {
            id: Uuid::new_v4(),
            salon_id,
            customer_id: actor.user_id,
            service_ids: request.service_ids,
            offer_ids: request.offer_ids,
            subtotal: pricing.subtotal,
            discount_amount: pricing.discount_amount,
            points_spent: pricing.points_spent,
            total_price: pricing.total_price,
            created_at: now,
        };
        let entry = self.store.create_entry(&new_entry).await?;

        tracing::info!(
            entry_id = %entry.id,
            salon_id,
            customer_id = actor.user_id,
            initial_position = entry.initial_position,
            total_price = entry.total_price,
            "Customer joined queue"
        );

        let view = self.view(entry).await?;
        self.gateway
            .broadcast_to_salon(
                salon_id,
                &QueueEvent::QueueJoined {
                    salon_id,
                    entry: view.clone(),
                },
            )
            .await;
        publish_snapshot(self.store.as_ref(), &self.gateway, salon_id).await;
        self.notifier.customer_joined(&salon, &view).await;

        Ok(view)
    }

    /// Move an entry to a new status on behalf of `actor`
    pub async fn update_status(
        &self,
        actor: Actor,
        entry_id: Uuid,
        status: QueueStatus,
    ) -> AppResult<QueueEntryView> {
        let entry = self.store.get_entry(entry_id).await?;
        let salon = self.store.get_salon(entry.salon_id).await?;
        let manages_salon = authorize_update(&actor, &entry, &salon, status)?;

        if entry.status == status {
            return self.view(entry).await;
        }
        if !entry.status.can_advance_to(status) {
            return Err(AppError::BusinessRule(format!(
                "Cannot move a queue entry from {} to {}",
                entry.status, status
            )));
        }

        let now = self.clock.now();
        let mut change = StatusChange::to(status, now);
        match status {
            QueueStatus::NoShow => change = change.with_reason(MANUAL_NO_SHOW_REASON),
            QueueStatus::Nearby if manages_salon => {
                change.verification_method = Some(if actor.is_admin() {
                    VerificationMethod::AdminOverride
                } else {
                    VerificationMethod::Manual
                });
                change.verified_by = Some(actor.user_id);
            }
            _ => {}
        }

        let award = (status == QueueStatus::Completed && self.loyalty.completion_bonus > 0).then(|| {
            LoyaltyAward {
                customer_id: entry.customer_id,
                salon_id: entry.salon_id,
                points: self.loyalty.completion_bonus,
            }
        });
        let points_awarded = award.map(|a| a.points).unwrap_or(0);

        let updated = self.apply_change(&entry, &change, award).await?;
        tracing::info!(
            entry_id = %updated.id,
            salon_id = updated.salon_id,
            from = %entry.status,
            to = %updated.status,
            actor = actor.user_id,
            "Queue entry status changed"
        );

        if status == QueueStatus::NoShow {
            self.log_outcome(&updated, CheckInOutcome::NoShow).await;
        }
        self.announce(&updated, points_awarded).await;

        let notice = match status {
            QueueStatus::Notified => Some((
                NotificationKind::TurnApproaching,
                "Your turn is coming".to_string(),
                format!("Please head to {} now", salon.name),
            )),
            QueueStatus::Completed => Some((
                NotificationKind::ServiceCompleted,
                "Thanks for visiting".to_string(),
                format!("You earned {} points at {}", points_awarded, salon.name),
            )),
            _ => None,
        };
        if let Some((kind, title, body)) = notice {
            self.notifier
                .send(Notification {
                    user_id: updated.customer_id,
                    kind,
                    salon_id: salon.id,
                    entry_id: updated.id,
                    title,
                    body,
                })
                .await;
        }

        self.view(updated).await
    }

    /// Remove the caller's own entry from the queue
    pub async fn leave(&self, actor: Actor, entry_id: Uuid) -> AppResult<()> {
        let entry = self.store.get_entry(entry_id).await?;
        if entry.customer_id != actor.user_id {
            return Err(AppError::Authorization(
                "Only the customer can leave their own queue entry".to_string(),
            ));
        }

        self.store.delete_entry(entry_id).await?;
        tracing::info!(entry_id = %entry_id, salon_id = entry.salon_id, "Customer left queue");

        publish_snapshot(self.store.as_ref(), &self.gateway, entry.salon_id).await;
        Ok(())
    }

    /// All of the caller's entries, newest first, with live positions
    pub async fn customer_entries(&self, actor: Actor) -> AppResult<Vec<QueueEntryView>> {
        let entries = self.store.customer_entries(actor.user_id).await?;

        let mut active_by_salon: HashMap<i32, Vec<QueueEntry>> = HashMap::new();
        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            if !active_by_salon.contains_key(&entry.salon_id) {
                let active = self.store.active_entries(entry.salon_id).await?;
                active_by_salon.insert(entry.salon_id, active);
            }
            let active = active_by_salon
                .get(&entry.salon_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            views.push(QueueEntryView::build(entry, active));
        }
        Ok(views)
    }

    /// Today's queue for a salon plus anything older still active (owner view)
    pub async fn salon_queue(&self, actor: Actor, salon_id: i32) -> AppResult<Vec<QueueEntryView>> {
        let salon = self.store.get_salon(salon_id).await?;
        actor.require_salon_owner(salon.owner_id)?;

        let today = self.clock.now().date_naive().and_time(NaiveTime::MIN);
        let since = Utc.from_utc_datetime(&today);

        let entries = self.store.salon_entries_since(salon_id, since).await?;
        let active = self.store.active_entries(salon_id).await?;
        Ok(entries
            .into_iter()
            .map(|e| QueueEntryView::build(e, &active))
            .collect())
    }

    /// Active entries of a salon with live positions, in serving order
    pub async fn active_snapshot(&self, salon_id: i32) -> AppResult<Vec<QueueEntryView>> {
        let active = self.store.active_entries(salon_id).await?;
        Ok(active_snapshot(active))
    }

    pub(crate) async fn view(&self, entry: QueueEntry) -> AppResult<QueueEntryView> {
        let active = self.store.active_entries(entry.salon_id).await?;
        Ok(QueueEntryView::build(entry, &active))
    }

    /// CAS from the status `entry` was read with
    pub(crate) async fn apply_change(
        &self,
        entry: &QueueEntry,
        change: &StatusChange,
        award: Option<LoyaltyAward>,
    ) -> AppResult<QueueEntry> {
        self.store
            .transition(entry.id, entry.status, change, award)
            .await?
            .ok_or_else(|| {
                AppError::Conflict("Queue entry was modified concurrently".to_string())
            })
    }

    /// Stage event to the salon and the customer, then the refreshed snapshot
    pub(crate) async fn announce(&self, entry: &QueueEntry, points_awarded: i32) {
        if let Some(event) = stage_event(entry, points_awarded) {
            self.gateway.broadcast_to_salon(entry.salon_id, &event).await;
            self.gateway.send_to_user(entry.customer_id, &event).await;
        }
        publish_snapshot(self.store.as_ref(), &self.gateway, entry.salon_id).await;
    }

    pub(crate) async fn log_outcome(&self, entry: &QueueEntry, outcome: CheckInOutcome) {
        let record = CheckInRecord {
            customer_id: entry.customer_id,
            salon_id: entry.salon_id,
            entry_id: entry.id,
            outcome,
            recorded_at: self.clock.now(),
        };
        if let Err(e) = self.store.record_check_in(&record).await {
            tracing::warn!(entry_id = %entry.id, ?outcome, error = %e, "Failed to log check-in outcome");
        }
    }
}

/// Check `actor` may request `status` on `entry`.
///
/// Returns whether the actor manages the salon (owner or admin).
fn authorize_update(actor: &Actor, entry: &QueueEntry, salon: &Salon, status: QueueStatus) -> AppResult<bool> {
    if actor.is_admin() || actor.user_id == salon.owner_id {
        return Ok(true);
    }
    if actor.user_id != entry.customer_id {
        return Err(AppError::Authorization(
            "Not allowed to update this queue entry".to_string(),
        ));
    }
    // Arrival goes through check_in and verify, never a bare status write
    match status {
        QueueStatus::Notified => Ok(false),
        _ => Err(AppError::Authorization(format!(
            "Customers cannot set status {}",
            status
        ))),
    }
}
