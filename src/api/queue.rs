//! Queue endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{CheckIn, JoinQueue, QueueEntryView, UpdateStatus, VerifyArrival},
    AppState,
};

use super::AuthenticatedUser;

/// Live viewer count for a salon page
#[derive(Serialize, ToSchema)]
pub struct ViewerCountResponse {
    pub salon_id: i32,
    pub count: usize,
}

/// Join a salon's queue
#[utoipa::path(
    post,
    path = "/salons/{id}/queue",
    tag = "queue",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Salon ID")
    ),
    request_body = JoinQueue,
    responses(
        (status = 201, description = "Joined the queue", body = QueueEntryView),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Salon or service not found"),
        (status = 409, description = "Already in this salon's queue")
    )
)]
pub async fn join_queue(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(salon_id): Path<i32>,
    Json(request): Json<JoinQueue>,
) -> AppResult<(StatusCode, Json<QueueEntryView>)> {
    let view = state.services.queue.join(claims.actor(), salon_id, request).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Today's queue for a salon (owner dashboard)
#[utoipa::path(
    get,
    path = "/salons/{id}/queue",
    tag = "queue",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Salon ID")
    ),
    responses(
        (status = 200, description = "Salon queue", body = Vec<QueueEntryView>),
        (status = 403, description = "Not the salon owner"),
        (status = 404, description = "Salon not found")
    )
)]
pub async fn salon_queue(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(salon_id): Path<i32>,
) -> AppResult<Json<Vec<QueueEntryView>>> {
    let queue = state.services.queue.salon_queue(claims.actor(), salon_id).await?;
    Ok(Json(queue))
}

/// Number of people currently viewing a salon
#[utoipa::path(
    get,
    path = "/salons/{id}/viewers",
    tag = "queue",
    params(
        ("id" = i32, Path, description = "Salon ID")
    ),
    responses(
        (status = 200, description = "Viewer count", body = ViewerCountResponse)
    )
)]
pub async fn salon_viewers(
    State(state): State<AppState>,
    Path(salon_id): Path<i32>,
) -> Json<ViewerCountResponse> {
    let count = state.services.presence.viewer_count(salon_id).await;
    Json(ViewerCountResponse { salon_id, count })
}

/// The caller's queue entries, newest first
#[utoipa::path(
    get,
    path = "/queue/me",
    tag = "queue",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller's entries with live positions", body = Vec<QueueEntryView>)
    )
)]
pub async fn my_entries(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<QueueEntryView>>> {
    let entries = state.services.queue.customer_entries(claims.actor()).await?;
    Ok(Json(entries))
}

/// Change the status of a queue entry
#[utoipa::path(
    put,
    path = "/queue/{id}/status",
    tag = "queue",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Queue entry ID")
    ),
    request_body = UpdateStatus,
    responses(
        (status = 200, description = "Entry updated", body = QueueEntryView),
        (status = 403, description = "Not allowed"),
        (status = 404, description = "Entry not found"),
        (status = 409, description = "Entry was modified concurrently"),
        (status = 422, description = "Illegal transition")
    )
)]
pub async fn update_status(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(entry_id): Path<Uuid>,
    Json(request): Json<UpdateStatus>,
) -> AppResult<Json<QueueEntryView>> {
    let view = state
        .services
        .queue
        .update_status(claims.actor(), entry_id, request.status)
        .await?;
    Ok(Json(view))
}

/// Report arrival at the salon
#[utoipa::path(
    post,
    path = "/queue/{id}/check-in",
    tag = "queue",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Queue entry ID")
    ),
    request_body = CheckIn,
    responses(
        (status = 200, description = "Check-in recorded", body = QueueEntryView),
        (status = 400, description = "Invalid coordinates"),
        (status = 403, description = "Not the entry's customer"),
        (status = 422, description = "Entry cannot check in now")
    )
)]
pub async fn check_in(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(entry_id): Path<Uuid>,
    Json(request): Json<CheckIn>,
) -> AppResult<Json<QueueEntryView>> {
    let view = state.services.queue.check_in(claims.actor(), entry_id, request).await?;
    Ok(Json(view))
}

/// Approve or reject a pending check-in
#[utoipa::path(
    post,
    path = "/queue/{id}/verify",
    tag = "queue",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Queue entry ID")
    ),
    request_body = VerifyArrival,
    responses(
        (status = 200, description = "Verification applied", body = QueueEntryView),
        (status = 403, description = "Not the salon owner"),
        (status = 422, description = "No pending check-in")
    )
)]
pub async fn verify_arrival(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(entry_id): Path<Uuid>,
    Json(request): Json<VerifyArrival>,
) -> AppResult<Json<QueueEntryView>> {
    let view = state
        .services
        .queue
        .verify(claims.actor(), entry_id, request.approve)
        .await?;
    Ok(Json(view))
}

/// Leave the queue
#[utoipa::path(
    delete,
    path = "/queue/{id}",
    tag = "queue",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Queue entry ID")
    ),
    responses(
        (status = 204, description = "Left the queue"),
        (status = 403, description = "Not the entry's customer"),
        (status = 404, description = "Entry not found")
    )
)]
pub async fn leave_queue(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(entry_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.services.queue.leave(claims.actor(), entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
