use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

use crate::server::rest::{
    error::{ErrorDetails, ErrorResponse},
    handlers::{
        containers::{ContainerListResponse, ContainerResponse, LaunchResponse},
        events::{EventListResponse, EventResponse},
        exercises::{ExerciseListResponse, ExerciseSummary, UploadResponse},
    },
};
use crate::builder::BuiltImage;
use crate::shared::models::{ContainerStatus, ExerciseLevel};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::server::rest::openapi::health,
        crate::server::rest::openapi::version,
        crate::server::rest::openapi::upload_exercise,
        crate::server::rest::openapi::list_exercises,
        crate::server::rest::openapi::delete_exercise,
        crate::server::rest::openapi::launch_container,
        crate::server::rest::openapi::list_containers,
        crate::server::rest::openapi::stop_container,
        crate::server::rest::openapi::complete_container,
        crate::server::rest::openapi::admin_list_containers,
        crate::server::rest::openapi::admin_stop_container,
        crate::server::rest::openapi::list_events,
    ),
    components(
        schemas(
            ErrorResponse,
            ErrorDetails,
            UploadResponse,
            BuiltImage,
            ExerciseListResponse,
            ExerciseSummary,
            ExerciseLevel,
            LaunchResponse,
            ContainerListResponse,
            ContainerResponse,
            ContainerStatus,
            EventListResponse,
            EventResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Exercises", description = "Exercise catalog management"),
        (name = "Containers", description = "Sandbox container lifecycle"),
        (name = "Admin", description = "Administrative operations"),
    ),
    info(
        title = "Dojo REST API",
        version = "0.1.0",
        description = "Sandboxed training platform orchestrator",
    ),
    servers(
        (url = "/", description = "Current server"),
    ),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
)]
#[allow(dead_code)]
pub async fn health() {}

#[utoipa::path(
    get,
    path = "/version",
    tag = "Health",
    responses(
        (status = 200, description = "API version", body = String),
    ),
)]
#[allow(dead_code)]
pub async fn version() {}

#[utoipa::path(
    post,
    path = "/api/exercises/upload",
    tag = "Exercises",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Image built and catalog entry recorded", body = UploadResponse),
        (status = 400, description = "Invalid bundle or build failure", body = ErrorResponse),
        (status = 403, description = "Admin access required", body = ErrorResponse),
        (status = 413, description = "Archive exceeds the upload size cap"),
    ),
)]
#[allow(dead_code)]
pub async fn upload_exercise() {}

#[utoipa::path(
    get,
    path = "/api/exercises",
    tag = "Exercises",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Catalog with per-subject progress", body = ExerciseListResponse),
    ),
)]
#[allow(dead_code)]
pub async fn list_exercises() {}

#[utoipa::path(
    delete,
    path = "/api/exercises/{id}",
    tag = "Exercises",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Exercise id")),
    responses(
        (status = 200, description = "Exercise and image removed"),
        (status = 403, description = "Admin access required", body = ErrorResponse),
        (status = 404, description = "Unknown exercise", body = ErrorResponse),
    ),
)]
#[allow(dead_code)]
pub async fn delete_exercise() {}

#[utoipa::path(
    post,
    path = "/api/exercises/launch/{id}",
    tag = "Containers",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Exercise id")),
    responses(
        (status = 200, description = "Sandbox launched", body = LaunchResponse),
        (status = 400, description = "Already running or quota exceeded", body = ErrorResponse),
        (status = 404, description = "Unknown exercise", body = ErrorResponse),
    ),
)]
#[allow(dead_code)]
pub async fn launch_container() {}

#[utoipa::path(
    get,
    path = "/api/containers",
    tag = "Containers",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "The caller's running containers", body = ContainerListResponse),
    ),
)]
#[allow(dead_code)]
pub async fn list_containers() {}

#[utoipa::path(
    post,
    path = "/api/containers/{id}/stop",
    tag = "Containers",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Container id")),
    responses(
        (status = 200, description = "Container stopped"),
        (status = 403, description = "Not the owner", body = ErrorResponse),
        (status = 404, description = "Container not found", body = ErrorResponse),
    ),
)]
#[allow(dead_code)]
pub async fn stop_container() {}

#[utoipa::path(
    post,
    path = "/api/containers/{id}/complete",
    tag = "Containers",
    params(("id" = String, Path, description = "Sandbox subdomain")),
    responses(
        (status = 200, description = "Completion recorded"),
        (status = 404, description = "Unknown subdomain", body = ErrorResponse),
    ),
)]
#[allow(dead_code)]
pub async fn complete_container() {}

#[utoipa::path(
    get,
    path = "/api/admin/containers",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All running containers", body = ContainerListResponse),
        (status = 403, description = "Admin access required", body = ErrorResponse),
    ),
)]
#[allow(dead_code)]
pub async fn admin_list_containers() {}

#[utoipa::path(
    post,
    path = "/api/admin/containers/{id}/stop",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Container id")),
    responses(
        (status = 200, description = "Container stopped"),
        (status = 403, description = "Admin access required", body = ErrorResponse),
        (status = 404, description = "Container not found", body = ErrorResponse),
    ),
)]
#[allow(dead_code)]
pub async fn admin_stop_container() {}

#[utoipa::path(
    get,
    path = "/api/admin/events",
    tag = "Admin",
    security(("bearer_auth" = [])),
    params(
        ("limit" = Option<i64>, Query, description = "Page size, capped at 1000"),
        ("before_id" = Option<i64>, Query, description = "Return events older than this id"),
    ),
    responses(
        (status = 200, description = "Journal page, newest first", body = EventListResponse),
        (status = 403, description = "Admin access required", body = ErrorResponse),
    ),
)]
#[allow(dead_code)]
pub async fn list_events() {}
