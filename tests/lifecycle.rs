//! End-to-end queue scenario against the in-memory store

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};

use salon_queue_server::{
    config::AppConfig,
    models::{Actor, CheckIn, CheckInOutcome, JoinQueue, QueueStatus, Role},
    repository::{memory::MemoryStore, QueueStore},
    services::{clock::ManualClock, notifications::NotificationDispatcher, Services},
    AppError,
};

struct World {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    services: Services,
}

async fn world() -> World {
    let store = Arc::new(MemoryStore::with_demo_data().await);
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap(),
    ));
    let services = Services::new(
        store.clone(),
        clock.clone(),
        NotificationDispatcher::noop(),
        &AppConfig::default(),
    );
    World {
        store,
        clock,
        services,
    }
}

fn customer(id: i32) -> Actor {
    Actor::new(id, Role::Customer)
}

fn owner() -> Actor {
    Actor::new(1, Role::SalonOwner)
}

fn join_request(service_ids: Vec<i32>) -> JoinQueue {
    JoinQueue {
        service_ids,
        offer_ids: vec![],
        use_points: false,
    }
}

#[tokio::test]
async fn test_full_day_at_the_salon() {
    let w = world().await;
    let queue = &w.services.queue;

    // Three customers join a minute apart
    let mut ids = Vec::new();
    for id in [20, 21, 22] {
        let view = assert_ok!(queue.join(customer(id), 1, join_request(vec![1])).await);
        ids.push(view.entry.id);
        w.clock.advance(Duration::minutes(1));
    }
    let positions: Vec<i32> = assert_ok!(queue.active_snapshot(1).await)
        .iter()
        .map(|v| v.position)
        .collect();
    assert_eq!(positions, vec![1, 2, 3]);

    // First customer is called, arrives at the door and gets served
    assert_ok!(queue.update_status(owner(), ids[0], QueueStatus::Notified).await);
    let arrived = assert_ok!(
        queue
            .check_in(
                customer(20),
                ids[0],
                CheckIn {
                    latitude: 48.8567,
                    longitude: 2.3523,
                },
            )
            .await
    );
    assert_eq!(arrived.entry.status, QueueStatus::Nearby);
    assert_ok!(queue.update_status(owner(), ids[0], QueueStatus::InProgress).await);

    // The others move up while the first is in the chair
    let mine = assert_ok!(queue.customer_entries(customer(21)).await);
    assert_eq!(mine[0].position, 1);

    let done = assert_ok!(queue.update_status(owner(), ids[0], QueueStatus::Completed).await);
    assert_eq!(done.position, 0);
    assert_eq!(assert_ok!(w.store.loyalty_balance(20, 1).await), 10);

    // Second customer checks in from too far away and nobody confirms
    assert_ok!(queue.update_status(owner(), ids[1], QueueStatus::Notified).await);
    let pending = assert_ok!(
        queue
            .check_in(
                customer(21),
                ids[1],
                CheckIn {
                    latitude: 48.90,
                    longitude: 2.40,
                },
            )
            .await
    );
    assert_eq!(pending.entry.status, QueueStatus::PendingVerification);

    w.clock.advance(Duration::minutes(6));
    assert_eq!(assert_ok!(w.services.sweeper.sweep_pending_verifications().await), 1);
    let reverted = assert_ok!(w.store.get_entry(ids[1]).await);
    assert_eq!(reverted.status, QueueStatus::Notified);

    // Half an hour later both remaining customers have timed out
    w.clock.advance(Duration::minutes(30));
    assert_eq!(assert_ok!(w.services.sweeper.sweep_queue_timeouts().await), 2);
    assert!(assert_ok!(queue.active_snapshot(1).await).is_empty());

    let outcomes: Vec<CheckInOutcome> = w
        .store
        .check_in_log()
        .await
        .into_iter()
        .map(|r| r.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![
            CheckInOutcome::Verified,
            CheckInOutcome::Expired,
            CheckInOutcome::NoShow,
            CheckInOutcome::NoShow,
        ]
    );

    // A finished visit can still not be reopened
    let err = assert_err!(queue.update_status(owner(), ids[2], QueueStatus::Waiting).await);
    assert!(matches!(err, AppError::BusinessRule(_)));
}

#[tokio::test]
async fn test_loyalty_points_pay_for_a_discount() {
    let w = world().await;
    let queue = &w.services.queue;
    w.store.set_points(30, 1, 205).await;

    let request = JoinQueue {
        service_ids: vec![3],
        offer_ids: vec![],
        use_points: true,
    };
    let view = assert_ok!(queue.join(customer(30), 1, request).await);
    assert_eq!(view.entry.points_spent, 200);
    assert_eq!(view.entry.total_price, 6000 - 1200);
    assert_eq!(assert_ok!(w.store.loyalty_balance(30, 1).await), 5);

    assert_ok!(queue.update_status(owner(), view.entry.id, QueueStatus::InProgress).await);
    assert_ok!(queue.update_status(owner(), view.entry.id, QueueStatus::Completed).await);
    assert_eq!(assert_ok!(w.store.loyalty_balance(30, 1).await), 15);
    assert_eq!(assert_ok!(w.store.loyalty_total(30).await), 15);
}
