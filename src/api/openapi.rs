//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{health, queue};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Salon Queue API",
        version = "0.3.0",
        description = "Virtual queue REST API for salons",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Queue
        queue::join_queue,
        queue::salon_queue,
        queue::salon_viewers,
        queue::my_entries,
        queue::update_status,
        queue::check_in,
        queue::verify_arrival,
        queue::leave_queue,
    ),
    components(
        schemas(
            crate::models::QueueEntry,
            crate::models::QueueEntryView,
            crate::models::QueueStatus,
            crate::models::VerificationMethod,
            crate::models::JoinQueue,
            crate::models::UpdateStatus,
            crate::models::CheckIn,
            crate::models::VerifyArrival,
            crate::models::Salon,
            crate::models::SalonService,
            crate::models::Offer,
            queue::ViewerCountResponse,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "queue", description = "Salon queue management")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
