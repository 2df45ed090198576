//! API integration tests
//!
//! Expect a server on localhost:8080 started with `store.backend = "memory"`
//! (demo salon 1 owned by user 1) and the default JWT secret, or the one in
//! `JWT_SECRET`.

use reqwest::{Client, StatusCode};
use salon_queue_server::models::{Role, UserClaims};
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

/// Mint a bearer token the server will accept
fn token_for(user_id: i32, role: Role) -> String {
    let secret = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "change-this-secret-in-production".to_string());
    UserClaims::new(user_id, role, chrono::Duration::hours(1))
        .create_token(&secret)
        .expect("Failed to create token")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_readiness() {
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore]
async fn test_join_requires_token() {
    let client = Client::new();

    let response = client
        .post(format!("{}/salons/1/queue", BASE_URL))
        .json(&json!({ "service_ids": [1] }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_queue_visit() {
    let client = Client::new();
    let customer = token_for(7001, Role::Customer);
    let owner = token_for(1, Role::SalonOwner);

    // Join
    let response = client
        .post(format!("{}/salons/1/queue", BASE_URL))
        .bearer_auth(&customer)
        .json(&json!({ "service_ids": [1, 2] }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CREATED);
    let entry: Value = response.json().await.expect("Failed to parse response");
    let entry_id = entry["id"].as_str().expect("No id in response").to_string();
    assert_eq!(entry["status"], "waiting");
    assert_eq!(entry["subtotal"], 3700);

    // Joining twice is refused
    let response = client
        .post(format!("{}/salons/1/queue", BASE_URL))
        .bearer_auth(&customer)
        .json(&json!({ "service_ids": [1] }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The customer cannot start their own service
    let response = client
        .put(format!("{}/queue/{}/status", BASE_URL, entry_id))
        .bearer_auth(&customer)
        .json(&json!({ "status": "in_progress" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The owner can
    let response = client
        .put(format!("{}/queue/{}/status", BASE_URL, entry_id))
        .bearer_auth(&owner)
        .json(&json!({ "status": "in_progress" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["position"], 0);

    // No going back
    let response = client
        .put(format!("{}/queue/{}/status", BASE_URL, entry_id))
        .bearer_auth(&owner)
        .json(&json!({ "status": "waiting" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = client
        .put(format!("{}/queue/{}/status", BASE_URL, entry_id))
        .bearer_auth(&owner)
        .json(&json!({ "status": "completed" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get(format!("{}/queue/me", BASE_URL))
        .bearer_auth(&customer)
        .send()
        .await
        .expect("Failed to send request");
    let entries: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(entries[0]["id"], entry_id.as_str());
    assert_eq!(entries[0]["status"], "completed");
}

#[tokio::test]
#[ignore]
async fn test_leave_queue() {
    let client = Client::new();
    let customer = token_for(7002, Role::Customer);

    let response = client
        .post(format!("{}/salons/1/queue", BASE_URL))
        .bearer_auth(&customer)
        .json(&json!({ "service_ids": [3] }))
        .send()
        .await
        .expect("Failed to send request");
    let entry: Value = response.json().await.expect("Failed to parse response");
    let entry_id = entry["id"].as_str().expect("No id in response").to_string();

    let response = client
        .delete(format!("{}/queue/{}", BASE_URL, entry_id))
        .bearer_auth(token_for(7003, Role::Customer))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .delete(format!("{}/queue/{}", BASE_URL, entry_id))
        .bearer_auth(&customer)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
#[ignore]
async fn test_salon_queue_is_owner_only() {
    let client = Client::new();

    let response = client
        .get(format!("{}/salons/1/queue", BASE_URL))
        .bearer_auth(token_for(7004, Role::Customer))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .get(format!("{}/salons/1/queue", BASE_URL))
        .bearer_auth(token_for(1, Role::SalonOwner))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body.is_array());
}

#[tokio::test]
#[ignore]
async fn test_viewer_count() {
    let client = Client::new();

    let response = client
        .get(format!("{}/salons/1/viewers", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["salon_id"], 1);
    assert!(body["count"].is_u64());
}
