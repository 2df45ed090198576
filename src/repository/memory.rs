//! In-memory `QueueStore`
//!
//! Every operation runs under one mutex, so the multi-step writes
//! (create + debit, CAS + credit) are atomic just like their SQL
//! counterparts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{LoyaltyAward, QueueStore};
use crate::{
    error::{AppError, AppResult},
    models::{
        queue::{NewQueueEntry, StatusChange},
        CheckInRecord, Offer, QueueEntry, QueueStatus, Salon, SalonService,
    },
};

#[derive(Default)]
struct State {
    salons: HashMap<i32, Salon>,
    services: HashMap<i32, SalonService>,
    offers: HashMap<i32, Offer>,
    entries: HashMap<Uuid, QueueEntry>,
    loyalty: HashMap<(i32, i32), i32>,
    loyalty_totals: HashMap<i32, i32>,
    checkins: Vec<CheckInRecord>,
}

impl State {
    fn active_for_salon(&self, salon_id: i32) -> impl Iterator<Item = &QueueEntry> {
        self.entries
            .values()
            .filter(move |e| e.salon_id == salon_id && e.status.is_active())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding one salon (id 1, owned by user 1) with a small menu
    pub async fn with_demo_data() -> Self {
        let store = Self::new();
        store
            .insert_salon(Salon {
                id: 1,
                owner_id: 1,
                name: "Demo Salon".to_string(),
                contact_email: None,
                latitude: Some(48.8566),
                longitude: Some(2.3522),
            })
            .await;
        for (id, name, price) in [(1, "Haircut", 2500), (2, "Beard trim", 1200), (3, "Colour", 6000)] {
            store
                .insert_service(SalonService {
                    id,
                    salon_id: 1,
                    name: name.to_string(),
                    price,
                    duration_minutes: 30,
                })
                .await;
        }
        store
            .insert_offer(Offer {
                id: 1,
                salon_id: 1,
                title: "Weekday special".to_string(),
                discount_percent: 10,
                valid_until: None,
                is_active: true,
            })
            .await;
        store
    }

    pub async fn insert_salon(&self, salon: Salon) {
        self.state.lock().await.salons.insert(salon.id, salon);
    }

    pub async fn insert_service(&self, service: SalonService) {
        self.state.lock().await.services.insert(service.id, service);
    }

    pub async fn insert_offer(&self, offer: Offer) {
        self.state.lock().await.offers.insert(offer.id, offer);
    }

    /// Set a customer's per-salon balance, adjusting the running total by the difference
    pub async fn set_points(&self, customer_id: i32, salon_id: i32, points: i32) {
        let mut state = self.state.lock().await;
        let previous = state.loyalty.insert((customer_id, salon_id), points).unwrap_or(0);
        *state.loyalty_totals.entry(customer_id).or_insert(0) += points - previous;
    }

    pub async fn check_in_log(&self) -> Vec<CheckInRecord> {
        self.state.lock().await.checkins.clone()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn get_salon(&self, salon_id: i32) -> AppResult<Salon> {
        self.state
            .lock()
            .await
            .salons
            .get(&salon_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Salon with id {} not found", salon_id)))
    }

    async fn salon_services(&self, salon_id: i32, ids: &[i32]) -> AppResult<Vec<SalonService>> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.services.get(id))
            .filter(|s| s.salon_id == salon_id)
            .cloned()
            .collect())
    }

    async fn salon_offers(&self, salon_id: i32, ids: &[i32]) -> AppResult<Vec<Offer>> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.offers.get(id))
            .filter(|o| o.salon_id == salon_id)
            .cloned()
            .collect())
    }

    async fn loyalty_balance(&self, customer_id: i32, salon_id: i32) -> AppResult<i32> {
        let state = self.state.lock().await;
        Ok(state.loyalty.get(&(customer_id, salon_id)).copied().unwrap_or(0))
    }

    async fn loyalty_total(&self, customer_id: i32) -> AppResult<i32> {
        let state = self.state.lock().await;
        Ok(state.loyalty_totals.get(&customer_id).copied().unwrap_or(0))
    }

    async fn create_entry(&self, new: &NewQueueEntry) -> AppResult<QueueEntry> {
        let mut state = self.state.lock().await;

        if state
            .active_for_salon(new.salon_id)
            .any(|e| e.customer_id == new.customer_id)
        {
            return Err(AppError::Conflict(
                "Customer is already in this salon's queue".to_string(),
            ));
        }

        if new.points_spent > 0 {
            let key = (new.customer_id, new.salon_id);
            let balance = state.loyalty.get(&key).copied().unwrap_or(0);
            if balance < new.points_spent {
                return Err(AppError::BusinessRule(
                    "Insufficient loyalty points".to_string(),
                ));
            }
            state.loyalty.insert(key, balance - new.points_spent);
            let total = state.loyalty_totals.entry(new.customer_id).or_insert(0);
            *total = (*total - new.points_spent).max(0);
        }

        let initial_position = state.active_for_salon(new.salon_id).count() as i32 + 1;
        let entry = QueueEntry {
            id: new.id,
            salon_id: new.salon_id,
            customer_id: new.customer_id,
            service_ids: new.service_ids.clone(),
            offer_ids: new.offer_ids.clone(),
            subtotal: new.subtotal,
            discount_amount: new.discount_amount,
            points_spent: new.points_spent,
            total_price: new.total_price,
            status: QueueStatus::Waiting,
            initial_position,
            created_at: new.created_at,
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
        };
        state.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&self, id: Uuid) -> AppResult<QueueEntry> {
        self.state
            .lock()
            .await
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Queue entry {} not found", id)))
    }

    async fn delete_entry(&self, id: Uuid) -> AppResult<()> {
        self.state
            .lock()
            .await
            .entries
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Queue entry {} not found", id)))
    }

    async fn active_entries(&self, salon_id: i32) -> AppResult<Vec<QueueEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<QueueEntry> = state.active_for_salon(salon_id).cloned().collect();
        entries.sort_by_key(|e| (e.created_at, e.id));
        Ok(entries)
    }

    async fn has_active_entry(&self, salon_id: i32, customer_id: i32) -> AppResult<bool> {
        let state = self.state.lock().await;
        let found = state
            .active_for_salon(salon_id)
            .any(|e| e.customer_id == customer_id);
        Ok(found)
    }

    async fn customer_entries(&self, customer_id: i32) -> AppResult<Vec<QueueEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<QueueEntry> = state
            .entries
            .values()
            .filter(|e| e.customer_id == customer_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn salon_entries_since(
        &self,
        salon_id: i32,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<QueueEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<QueueEntry> = state
            .entries
            .values()
            .filter(|e| e.salon_id == salon_id && (e.created_at >= since || e.status.is_active()))
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.created_at, e.id));
        Ok(entries)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: QueueStatus,
        change: &StatusChange,
        award: Option<LoyaltyAward>,
    ) -> AppResult<Option<QueueEntry>> {
        let mut state = self.state.lock().await;

        let updated = match state.entries.get_mut(&id) {
            Some(entry) if entry.status == expected => {
                change.apply(entry);
                entry.clone()
            }
            _ => return Ok(None),
        };

        if let Some(award) = award {
            *state
                .loyalty
                .entry((award.customer_id, award.salon_id))
                .or_insert(0) += award.points;
            *state.loyalty_totals.entry(award.customer_id).or_insert(0) += award.points;
        }

        Ok(Some(updated))
    }

    async fn expired_check_ins(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<QueueEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .values()
            .filter(|e| e.status == QueueStatus::PendingVerification)
            .filter(|e| e.check_in_attempted_at.map(|t| t < cutoff).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn expired_waiting(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<QueueEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .values()
            .filter(|e| matches!(e.status, QueueStatus::Waiting | QueueStatus::Notified))
            .filter(|e| e.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn record_check_in(&self, record: &CheckInRecord) -> AppResult<()> {
        self.state.lock().await.checkins.push(record.clone());
        Ok(())
    }

    async fn count_strikes(&self, customer_id: i32) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .checkins
            .iter()
            .filter(|r| r.customer_id == customer_id && r.outcome.is_strike())
            .count() as i64)
    }
}
